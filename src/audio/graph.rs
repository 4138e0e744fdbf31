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

//! Control side of the audio graph.
//!
//! Every sample in the installed bank gets a pool of identical player chains. `play`
//! picks the next chain of the pool round-robin, draws the per-shot pitch and pan, and
//! schedules the shot on the mixer. Parameter changes only affect shots scheduled after
//! them.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, info, warn};

use super::mixer::{GraphCommand, MixerStats};
use super::pitch::MAX_CENTS;
use super::{AudioError, Device, Mixer, OutputHandle, Shot};
use crate::samples::SampleBank;
use crate::settings::AppSettings;

/// Largest pitch range the transposer supports, in semitones.
pub const MAX_PITCH_RANGE: f32 = MAX_CENTS / 100.0;

/// Live parameters read for every shot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShotParams {
    pub master_volume: f32,
    pub pitch_enabled: bool,
    /// Semitones either side of the original pitch.
    pub pitch_range: f32,
    pub spatial_enabled: bool,
    /// Largest pan either side of centre.
    pub spatial_width: f32,
}

impl Default for ShotParams {
    fn default() -> Self {
        ShotParams::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for ShotParams {
    fn from(settings: &AppSettings) -> Self {
        ShotParams {
            master_volume: settings.master_volume,
            pitch_enabled: settings.enable_pitch_variation,
            pitch_range: settings.pitch_variation_amount,
            spatial_enabled: settings.enable_spatial_audio,
            spatial_width: settings.spatial_audio_width,
        }
    }
}

impl ShotParams {
    fn sanitized(self) -> ShotParams {
        let finite_or = |value: f32, default: f32| if value.is_finite() { value } else { default };
        ShotParams {
            master_volume: finite_or(self.master_volume, 0.0).clamp(0.0, 1.0),
            pitch_range: finite_or(self.pitch_range, 0.0).clamp(0.0, MAX_PITCH_RANGE),
            spatial_width: finite_or(self.spatial_width, 0.0).clamp(0.0, 1.0),
            ..self
        }
    }
}

struct Installed {
    generation: u64,
    bank: Arc<SampleBank>,
    /// Next chain of each sample's pool.
    cursors: Vec<AtomicUsize>,
}

/// A polyphonic sample player with per-shot pitch and pan.
pub struct AudioGraph {
    device: Arc<dyn Device>,
    pool_size: usize,
    commands: Sender<GraphCommand>,
    /// Lets a new mixer pick up queued commands if a device start fails.
    commands_rx: Receiver<GraphCommand>,
    /// Held until the first bank is installed, then handed to the device.
    mixer: Mutex<Option<Mixer>>,
    stats: Arc<MixerStats>,
    output: Mutex<Option<Box<dyn OutputHandle>>>,
    installed: RwLock<Option<Installed>>,
    params: RwLock<ShotParams>,
    generation: AtomicU64,
    dropped_shots: AtomicU64,
    stopped: AtomicBool,
}

impl AudioGraph {
    /// Creates a graph for the device. Output isn't started until samples are installed.
    pub fn new(device: Arc<dyn Device>, pool_size: usize) -> AudioGraph {
        let pool_size = pool_size.max(2);
        let (commands, commands_rx) = crossbeam_channel::unbounded();
        let mixer = Mixer::new(
            commands_rx.clone(),
            device.channels(),
            device.sample_rate(),
            pool_size,
        );
        let stats = mixer.stats();
        AudioGraph {
            device,
            pool_size,
            commands,
            commands_rx,
            mixer: Mutex::new(Some(mixer)),
            stats,
            output: Mutex::new(None),
            installed: RwLock::new(None),
            params: RwLock::new(ShotParams::default()),
            generation: AtomicU64::new(0),
            dropped_shots: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// The rate samples must be decoded at.
    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Replaces the playable samples. The previous bank is released by the mixer once the
    /// new one is in place. An empty bank is the same as `clear_all`.
    pub fn install(&self, bank: Arc<SampleBank>) -> Result<(), AudioError> {
        if bank.is_empty() {
            self.clear_all();
            return Ok(());
        }

        {
            let mut installed = self.installed.write();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let cursors = (0..bank.len()).map(|_| AtomicUsize::new(0)).collect();
            self.send(GraphCommand::Install {
                generation,
                bank: bank.clone(),
            });
            *installed = Some(Installed {
                generation,
                bank: bank.clone(),
                cursors,
            });
            debug!(
                generation,
                samples = bank.len(),
                chains = bank.len() * self.pool_size,
                "Installed sample bank"
            );
        }

        self.ensure_started()
    }

    /// Stops every chain and releases every buffer.
    pub fn clear_all(&self) {
        let mut installed = self.installed.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        installed.take();
        self.send(GraphCommand::Clear { generation });
        debug!(generation, "Cleared all chains");
    }

    fn ensure_started(&self) -> Result<(), AudioError> {
        let mut output = self.output.lock();
        if output.is_some() {
            return Ok(());
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AudioError::Stopped);
        }
        let mixer = match self.mixer.lock().take() {
            Some(mixer) => mixer,
            None => Mixer::new(
                self.commands_rx.clone(),
                self.device.channels(),
                self.device.sample_rate(),
                self.pool_size,
            )
            .with_stats(self.stats.clone()),
        };
        match self.device.start(mixer) {
            Ok(handle) => {
                *output = Some(handle);
                info!(device = %self.device, "Audio graph started");
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.device, err = %e, "Unable to start audio output, will retry");
                Err(e)
            }
        }
    }

    /// True once output is running.
    pub fn is_started(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Stops output. The graph can't be started again.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if self.output.lock().take().is_some() {
            info!("Audio graph stopped");
        }
    }

    pub fn set_params(&self, params: ShotParams) {
        *self.params.write() = params.sanitized();
    }

    pub fn set_master_volume(&self, volume: f32) {
        let mut params = self.params.write();
        *params = ShotParams {
            master_volume: volume,
            ..*params
        }
        .sanitized();
    }

    pub fn params(&self) -> ShotParams {
        *self.params.read()
    }

    /// Plays a sample. Returns the scheduled shot, or None if the sample isn't loaded.
    pub fn play<R: Rng + ?Sized>(
        &self,
        filename: &str,
        multiplier: f32,
        rng: &mut R,
    ) -> Option<Shot> {
        let installed = self.installed.read();
        let found = installed.as_ref().and_then(|installed| {
            installed
                .bank
                .position(filename)
                .map(|entry| (installed, entry))
        });
        let Some((installed, entry)) = found else {
            warn!(sample = filename, "Sample is not loaded, dropping shot");
            self.dropped_shots.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let slot = installed.cursors[entry].fetch_add(1, Ordering::Relaxed) % self.pool_size;
        let params = *self.params.read();
        let gain = installed.bank.entry(entry).map_or(1.0, |e| e.gain);
        let multiplier = if multiplier.is_finite() { multiplier } else { 1.0 };

        let cents = if params.pitch_enabled && params.pitch_range > 0.0 {
            rng.gen_range(-params.pitch_range..=params.pitch_range) * 100.0
        } else {
            0.0
        };
        let pan = if params.spatial_enabled && params.spatial_width > 0.0 {
            rng.gen_range(-params.spatial_width..=params.spatial_width)
                .clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let shot = Shot {
            generation: installed.generation,
            entry,
            slot,
            volume: (params.master_volume * gain * multiplier).clamp(0.0, 1.0),
            cents,
            pan,
        };
        self.send(GraphCommand::Trigger(shot.clone()));
        Some(shot)
    }

    fn send(&self, command: GraphCommand) {
        if self.commands.send(command).is_err() {
            warn!("Mixer is gone, dropping command");
        }
    }

    /// Shots dropped because their sample wasn't loaded.
    pub fn dropped_shots(&self) -> u64 {
        self.dropped_shots.load(Ordering::Relaxed)
    }

    /// Shots the mixer has started.
    pub fn shots_started(&self) -> u64 {
        self.stats.shots_started()
    }

    pub fn active_voices(&self) -> usize {
        self.stats.active_voices()
    }

    /// Number of samples currently playable.
    pub fn loaded_samples(&self) -> usize {
        self.installed
            .read()
            .as_ref()
            .map_or(0, |installed| installed.bank.len())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::audio::mock;
    use crate::samples::LoadedSample;

    fn bank(files: &[&str]) -> Arc<SampleBank> {
        let mut bank = SampleBank::new(48000);
        for file in files {
            bank.insert(file, LoadedSample::from_stereo(vec![0.2; 4800 * 2]), 1.0);
        }
        Arc::new(bank)
    }

    fn graph(pool_size: usize) -> (Arc<mock::Device>, AudioGraph) {
        let device = Arc::new(mock::Device::get("mock", 48000, 2));
        let graph = AudioGraph::new(device.clone(), pool_size);
        (device, graph)
    }

    #[test]
    fn test_starts_on_first_load() -> Result<(), Box<dyn Error>> {
        let (device, graph) = graph(5);
        assert!(!graph.is_started());

        // An empty bank doesn't start output.
        graph.install(Arc::new(SampleBank::new(48000)))?;
        assert!(!graph.is_started());
        assert!(!device.is_started());

        graph.install(bank(&["a.wav"]))?;
        assert!(graph.is_started());
        assert!(device.is_started());
        assert_eq!(graph.loaded_samples(), 1);

        graph.stop();
        assert!(!device.is_started());
        Ok(())
    }

    #[test]
    fn test_missing_sample_is_dropped() -> Result<(), Box<dyn Error>> {
        let (_device, graph) = graph(5);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(graph.play("a.wav", 1.0, &mut rng).is_none());

        graph.install(bank(&["a.wav"]))?;
        assert!(graph.play("gone.wav", 1.0, &mut rng).is_none());
        assert_eq!(graph.dropped_shots(), 2);
        assert!(graph.play("a.wav", 1.0, &mut rng).is_some());
        Ok(())
    }

    #[test]
    fn test_round_robin_slots() -> Result<(), Box<dyn Error>> {
        let (_device, graph) = graph(3);
        graph.install(bank(&["a.wav", "b.wav"]))?;
        let mut rng = StdRng::seed_from_u64(1);

        let slots: Vec<usize> = (0..7)
            .filter_map(|_| graph.play("a.wav", 1.0, &mut rng))
            .map(|shot| shot.slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);

        // Pools are independent.
        let shot = graph.play("b.wav", 1.0, &mut rng).ok_or("no shot")?;
        assert_eq!((shot.entry, shot.slot), (1, 0));
        Ok(())
    }

    #[test]
    fn test_volume_is_clamped() -> Result<(), Box<dyn Error>> {
        let (_device, graph) = graph(5);
        graph.install(bank(&["a.wav"]))?;
        let mut rng = StdRng::seed_from_u64(1);

        graph.set_master_volume(0.5);
        let shot = graph.play("a.wav", 0.6, &mut rng).ok_or("no shot")?;
        assert!((shot.volume - 0.3).abs() < 1e-6);

        graph.set_master_volume(1.0);
        let shot = graph.play("a.wav", 3.0, &mut rng).ok_or("no shot")?;
        assert_eq!(shot.volume, 1.0);

        graph.set_master_volume(7.0);
        assert_eq!(graph.params().master_volume, 1.0);
        Ok(())
    }

    #[test]
    fn test_pitch_and_pan_bounds() -> Result<(), Box<dyn Error>> {
        let (_device, graph) = graph(5);
        graph.install(bank(&["a.wav"]))?;
        let mut rng = StdRng::seed_from_u64(42);

        // Disabled: no variation at all.
        let shot = graph.play("a.wav", 1.0, &mut rng).ok_or("no shot")?;
        assert_eq!((shot.cents, shot.pan), (0.0, 0.0));

        graph.set_params(ShotParams {
            master_volume: 1.0,
            pitch_enabled: true,
            pitch_range: 2.0,
            spatial_enabled: true,
            spatial_width: 0.3,
        });
        let mut varied = 0;
        for _ in 0..1000 {
            let shot = graph.play("a.wav", 1.0, &mut rng).ok_or("no shot")?;
            assert!((-200.0..=200.0).contains(&shot.cents));
            assert!((-0.3..=0.3).contains(&shot.pan));
            if shot.cents != 0.0 && shot.pan != 0.0 {
                varied += 1;
            }
        }
        assert!(varied > 900);

        // Ranges beyond what the transposer supports are clamped.
        graph.set_params(ShotParams {
            master_volume: 1.0,
            pitch_enabled: true,
            pitch_range: 40.0,
            spatial_enabled: true,
            spatial_width: 3.0,
        });
        for _ in 0..1000 {
            let shot = graph.play("a.wav", 1.0, &mut rng).ok_or("no shot")?;
            assert!((-MAX_CENTS..=MAX_CENTS).contains(&shot.cents));
            assert!((-1.0..=1.0).contains(&shot.pan));
        }
        Ok(())
    }

    #[test]
    fn test_shots_reach_the_output() -> Result<(), Box<dyn Error>> {
        let (device, graph) = graph(5);
        graph.install(bank(&["a.wav"]))?;
        let mut rng = StdRng::seed_from_u64(3);

        graph.set_master_volume(1.0);
        graph.play("a.wav", 1.0, &mut rng).ok_or("no shot")?;
        let rendered = device.render(16);
        assert!((rendered[0] - 0.2).abs() < 1e-5);
        assert_eq!(graph.shots_started(), 1);
        assert_eq!(graph.active_voices(), 1);

        // Rebinding to a bank without the sample drops further shots for it.
        graph.install(bank(&["b.wav"]))?;
        assert!(graph.play("a.wav", 1.0, &mut rng).is_none());
        graph.play("b.wav", 1.0, &mut rng).ok_or("no shot")?;
        device.render(16);
        assert_eq!(graph.shots_started(), 2);

        graph.clear_all();
        let rendered = device.render(16);
        assert!(rendered.iter().all(|s| *s == 0.0));
        assert_eq!(graph.loaded_samples(), 0);
        Ok(())
    }

    /// Fails its first starts, then behaves like the mock device.
    struct FlakyDevice {
        inner: mock::Device,
        failures: AtomicUsize,
    }

    impl std::fmt::Display for FlakyDevice {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky {}", self.inner)
        }
    }

    impl Device for FlakyDevice {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn channels(&self) -> u16 {
            self.inner.channels()
        }

        fn start(&self, mixer: Mixer) -> Result<Box<dyn OutputHandle>, AudioError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AudioError::Device("busy".to_string()));
            }
            self.inner.start(mixer)
        }

        fn to_mock(&self) -> Result<Arc<mock::Device>, AudioError> {
            Ok(Arc::new(self.inner.clone()))
        }
    }

    #[test]
    fn test_failed_start_is_retried() -> Result<(), Box<dyn Error>> {
        let device = Arc::new(FlakyDevice {
            inner: mock::Device::get("mock", 48000, 2),
            failures: AtomicUsize::new(1),
        });
        let output = device.to_mock()?;
        let graph = AudioGraph::new(device, 5);

        assert!(matches!(
            graph.install(bank(&["a.wav"])),
            Err(AudioError::Device(_))
        ));
        assert!(!graph.is_started());

        graph.install(bank(&["a.wav"]))?;
        assert!(graph.is_started());
        assert!(output.is_started());

        let mut rng = StdRng::seed_from_u64(5);
        graph.set_master_volume(1.0);
        graph.play("a.wav", 1.0, &mut rng).ok_or("no shot")?;
        let rendered = output.render(16);
        assert!((rendered[0] - 0.2).abs() < 1e-5);
        assert_eq!(graph.shots_started(), 1);

        graph.stop();
        assert!(matches!(
            graph.install(bank(&["a.wav"])),
            Err(AudioError::Stopped)
        ));
        Ok(())
    }
}
