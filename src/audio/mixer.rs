// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
// Render side of the audio graph. The mixer owns every player chain and runs on
// whichever thread renders output; the control side only talks to it through the
// command channel, so no locks are taken while mixing.
use std::f32::consts::FRAC_PI_4;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::pitch::PitchTransposer;
use crate::samples::SampleBank;

/// Parameters for one scheduled shot. Chains are addressed by the sample's position in
/// the bank and a slot in that sample's pool.
#[derive(Clone, Debug, PartialEq)]
pub struct Shot {
    pub generation: u64,
    pub entry: usize,
    pub slot: usize,
    /// Linear gain, already clamped to [0, 1].
    pub volume: f32,
    /// Transposition in cents. Zero bypasses the transposer.
    pub cents: f32,
    /// Stereo position in [-1, 1].
    pub pan: f32,
}

/// Commands from the control side of the graph.
pub enum GraphCommand {
    /// Replaces the sample bank and rebuilds every chain.
    Install {
        generation: u64,
        bank: Arc<SampleBank>,
    },
    /// Starts a shot, restarting the chain if it was still playing.
    Trigger(Shot),
    /// Stops every chain and releases the bank.
    Clear { generation: u64 },
}

/// Counters shared with the control side.
#[derive(Default, Debug)]
pub struct MixerStats {
    active_voices: AtomicUsize,
    shots_started: AtomicU64,
}

impl MixerStats {
    /// Chains that were playing at the end of the last rendered block.
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub fn shots_started(&self) -> u64 {
        self.shots_started.load(Ordering::Relaxed)
    }
}

/// One PlayerNode → PitchTransposer → mixer chain.
struct Chain {
    playing: bool,
    position: usize,
    volume: f32,
    left_gain: f32,
    right_gain: f32,
    transposer: PitchTransposer,
}

impl Chain {
    fn new(sample_rate: u32) -> Chain {
        Chain {
            playing: false,
            position: 0,
            volume: 0.0,
            left_gain: 1.0,
            right_gain: 1.0,
            transposer: PitchTransposer::new(sample_rate),
        }
    }

    fn start(&mut self, shot: &Shot) {
        let (left_gain, right_gain) = pan_gains(shot.pan);
        self.playing = true;
        self.position = 0;
        self.volume = shot.volume;
        self.left_gain = left_gain;
        self.right_gain = right_gain;
        self.transposer.set_cents(shot.cents);
    }
}

/// Equal-power pan law, normalised so the centre is unity gain on both sides.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
    let theta = (pan + 1.0) * FRAC_PI_4;
    (
        theta.cos() * std::f32::consts::SQRT_2,
        theta.sin() * std::f32::consts::SQRT_2,
    )
}

/// Core audio mixing logic that's independent of any audio backend.
pub struct Mixer {
    commands: Receiver<GraphCommand>,
    num_channels: u16,
    sample_rate: u32,
    pool_size: usize,
    generation: u64,
    bank: Option<Arc<SampleBank>>,
    chains: Vec<Chain>,
    stats: Arc<MixerStats>,
}

impl Mixer {
    /// Creates a new mixer reading commands from the given channel.
    pub fn new(
        commands: Receiver<GraphCommand>,
        num_channels: u16,
        sample_rate: u32,
        pool_size: usize,
    ) -> Mixer {
        Mixer {
            commands,
            num_channels: num_channels.max(1),
            sample_rate,
            pool_size: pool_size.max(1),
            generation: 0,
            bank: None,
            chains: Vec::new(),
            stats: Arc::new(MixerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MixerStats> {
        self.stats.clone()
    }

    /// Reports into existing stats instead of fresh ones.
    pub fn with_stats(self, stats: Arc<MixerStats>) -> Mixer {
        Mixer { stats, ..self }
    }

    /// Gets the number of output channels
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Applies every pending command.
    pub fn process_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                GraphCommand::Install { generation, bank } => {
                    self.chains = (0..bank.len() * self.pool_size)
                        .map(|_| Chain::new(self.sample_rate))
                        .collect();
                    self.bank = Some(bank);
                    self.generation = generation;
                }
                GraphCommand::Trigger(shot) => self.trigger(&shot),
                GraphCommand::Clear { generation } => {
                    self.chains.clear();
                    self.bank = None;
                    self.generation = generation;
                }
            }
        }
    }

    fn trigger(&mut self, shot: &Shot) {
        // Shots scheduled against a previous bank are dropped.
        if shot.generation != self.generation || shot.slot >= self.pool_size {
            return;
        }
        let index = shot.entry * self.pool_size + shot.slot;
        if let Some(chain) = self.chains.get_mut(index) {
            chain.start(shot);
            self.stats.shots_started.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mixes `num_frames` frames into `output`, which is interleaved with the mixer's
    /// channel count. Pending commands are applied first.
    pub fn process_into_output(&mut self, output: &mut [f32], num_frames: usize) {
        self.process_commands();

        let channels = self.num_channels as usize;
        let len = (num_frames * channels).min(output.len());
        let output = &mut output[..len];
        output.fill(0.0);

        let Some(bank) = &self.bank else {
            self.stats.active_voices.store(0, Ordering::Relaxed);
            return;
        };

        let mut active = 0;
        for (index, chain) in self.chains.iter_mut().enumerate() {
            if !chain.playing {
                continue;
            }
            let Some(entry) = bank.entry(index / self.pool_size) else {
                chain.playing = false;
                continue;
            };
            let frames = entry.sample.frames();

            for frame in output.chunks_exact_mut(channels) {
                if chain.position >= frames {
                    chain.playing = false;
                    break;
                }
                let (l, r) = chain.transposer.frame(&entry.sample, chain.position);
                chain.position += 1;

                let l = l * chain.volume * chain.left_gain;
                let r = r * chain.volume * chain.right_gain;
                if channels == 1 {
                    frame[0] += (l + r) * 0.5;
                } else {
                    frame[0] += l;
                    frame[1] += r;
                }
            }
            if chain.position >= frames {
                chain.playing = false;
            }
            if chain.playing {
                active += 1;
            }
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.stats.active_voices.store(active, Ordering::Relaxed);
    }

    /// Processes multiple frames of audio mixing
    pub fn process_frames(&mut self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0; num_frames * self.num_channels as usize];
        self.process_into_output(&mut frames, num_frames);
        frames
    }

    /// Playback position of every chain of a sample, None when the chain is idle.
    #[cfg(test)]
    fn positions(&self, entry: usize) -> Vec<Option<usize>> {
        (0..self.pool_size)
            .map(|slot| {
                let chain = &self.chains[entry * self.pool_size + slot];
                chain.playing.then_some(chain.position)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::Sender;

    use super::*;
    use crate::samples::LoadedSample;

    fn constant_bank(level: f32, frames: usize) -> Arc<SampleBank> {
        let mut bank = SampleBank::new(48000);
        bank.insert("a.wav", LoadedSample::from_stereo(vec![level; frames * 2]), 1.0);
        Arc::new(bank)
    }

    fn shot(slot: usize) -> Shot {
        Shot {
            generation: 1,
            entry: 0,
            slot,
            volume: 1.0,
            cents: 0.0,
            pan: 0.0,
        }
    }

    fn mixer(channels: u16, pool_size: usize) -> (Sender<GraphCommand>, Mixer) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Mixer::new(rx, channels, 48000, pool_size))
    }

    #[test]
    fn test_basic_mixing() {
        let (tx, mut mixer) = mixer(2, 3);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.25, 2),
        })
        .unwrap();
        tx.send(GraphCommand::Trigger(shot(0))).unwrap();

        let frames = mixer.process_frames(3);
        assert_eq!(frames.len(), 6);
        assert!((frames[0] - 0.25).abs() < 1e-6);
        assert!((frames[1] - 0.25).abs() < 1e-6);
        assert!((frames[2] - 0.25).abs() < 1e-6);
        // The sample is two frames long.
        assert_eq!(frames[4], 0.0);
        assert_eq!(frames[5], 0.0);
        assert_eq!(mixer.stats().active_voices(), 0);
        assert_eq!(mixer.stats().shots_started(), 1);
    }

    #[test]
    fn test_polyphony_evicts_oldest() {
        let (tx, mut mixer) = mixer(2, 3);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.1, 1000),
        })
        .unwrap();

        // Three overlapping shots use three chains and all keep playing.
        for slot in 0..3 {
            tx.send(GraphCommand::Trigger(shot(slot))).unwrap();
            mixer.process_frames(10);
        }
        assert_eq!(mixer.positions(0), vec![Some(30), Some(20), Some(10)]);
        assert_eq!(mixer.stats().active_voices(), 3);

        // The fourth wraps around and restarts only the oldest chain.
        tx.send(GraphCommand::Trigger(shot(0))).unwrap();
        let frames = mixer.process_frames(10);
        assert_eq!(mixer.positions(0), vec![Some(10), Some(30), Some(20)]);
        assert_eq!(mixer.stats().active_voices(), 3);
        assert!((frames[0] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let (tx, mut mixer) = mixer(2, 2);
        tx.send(GraphCommand::Install {
            generation: 2,
            bank: constant_bank(0.5, 100),
        })
        .unwrap();
        tx.send(GraphCommand::Trigger(shot(0))).unwrap();

        let frames = mixer.process_frames(4);
        assert!(frames.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.stats().shots_started(), 0);
    }

    #[test]
    fn test_clear_stops_everything() {
        let (tx, mut mixer) = mixer(2, 2);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.5, 100),
        })
        .unwrap();
        tx.send(GraphCommand::Trigger(shot(0))).unwrap();
        mixer.process_frames(4);
        assert_eq!(mixer.stats().active_voices(), 1);

        tx.send(GraphCommand::Clear { generation: 2 }).unwrap();
        let frames = mixer.process_frames(4);
        assert!(frames.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.stats().active_voices(), 0);
    }

    #[test]
    fn test_pan_and_channel_layouts() {
        let (left, right) = pan_gains(0.0);
        assert!((left - 1.0).abs() < 1e-6);
        assert!((right - 1.0).abs() < 1e-6);

        let (left, right) = pan_gains(-1.0);
        assert!((left - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!(right.abs() < 1e-6);

        // Out of range pans are clamped.
        assert_eq!(pan_gains(5.0), pan_gains(1.0));

        // Mono output folds both sides; extra channels stay silent.
        let (tx, mut mono) = mixer(1, 2);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.4, 10),
        })
        .unwrap();
        tx.send(GraphCommand::Trigger(shot(0))).unwrap();
        let frames = mono.process_frames(1);
        assert!((frames[0] - 0.4).abs() < 1e-6);

        let (tx, mut surround) = mixer(4, 2);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.4, 10),
        })
        .unwrap();
        tx.send(GraphCommand::Trigger(Shot {
            pan: 1.0,
            ..shot(0)
        }))
        .unwrap();
        let frames = surround.process_frames(1);
        assert!(frames[0].abs() < 1e-6);
        assert!((frames[1] - 0.4 * std::f32::consts::SQRT_2).abs() < 1e-5);
        assert_eq!(frames[2], 0.0);
        assert_eq!(frames[3], 0.0);
    }

    #[test]
    fn test_output_is_clamped() {
        let (tx, mut mixer) = mixer(2, 5);
        tx.send(GraphCommand::Install {
            generation: 1,
            bank: constant_bank(0.9, 10),
        })
        .unwrap();
        for slot in 0..5 {
            tx.send(GraphCommand::Trigger(shot(slot))).unwrap();
        }
        let frames = mixer.process_frames(1);
        assert_eq!(frames[0], 1.0);
        assert_eq!(frames[1], 1.0);
    }
}
