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

//! Sample decoding into the mixer's canonical format.
//!
//! Samples are loaded entirely into memory as interleaved stereo f32 at the output
//! sample rate, so the render thread never touches the filesystem or a decoder.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::audio::sample_source::{create_sample_source_from_file, SampleSource, SampleSourceError};

/// A decoded sample, stereo interleaved at the output sample rate.
/// The sample data is stored in an Arc so every chain playing it shares one buffer.
#[derive(Clone, Debug)]
pub struct LoadedSample {
    data: Arc<Vec<f32>>,
}

impl LoadedSample {
    /// Wraps interleaved stereo samples.
    pub fn from_stereo(data: Vec<f32>) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
        }
    }

    /// Number of stereo frames.
    pub fn frames(&self) -> usize {
        self.data.len() / 2
    }

    /// Gets a frame by index. Frames outside the buffer are silent.
    pub fn frame(&self, index: usize) -> (f32, f32) {
        match self.data.get(index * 2..index * 2 + 2) {
            Some(frame) => (frame[0], frame[1]),
            None => (0.0, 0.0),
        }
    }

    /// Gets a frame at a fractional position using linear interpolation.
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        if position < 0.0 {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let (l0, r0) = self.frame(index);
        if frac == 0.0 {
            return (l0, r0);
        }
        let (l1, r1) = self.frame(index + 1);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Decodes sample files for a given output sample rate.
#[derive(Debug, Clone, Copy)]
pub struct SampleLoader {
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Loads a sample from a file into memory.
    pub fn load(&self, path: &Path) -> Result<LoadedSample, SampleSourceError> {
        let mut source = create_sample_source_from_file(path)?;
        let loaded = self.load_source(&mut source)?;
        debug!(
            path = ?path,
            frames = loaded.frames(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample decoded"
        );
        Ok(loaded)
    }

    /// Reads a source to the end and converts it to stereo at the target rate.
    pub fn load_source<S: SampleSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<LoadedSample, SampleSourceError> {
        let channel_count = source.channel_count().max(1);
        let source_sample_rate = source.sample_rate();

        let mut samples = Vec::new();
        while let Some(block) = source.next_block()? {
            samples.extend(block);
        }
        if samples.len() < channel_count as usize {
            return Err(SampleSourceError::Empty);
        }

        let stereo = to_stereo(&samples, channel_count);
        let stereo = if source_sample_rate != self.target_sample_rate && source_sample_rate > 0 {
            debug!(
                source_rate = source_sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(&stereo, 2, source_sample_rate, self.target_sample_rate)
        } else {
            stereo
        };

        Ok(LoadedSample::from_stereo(stereo))
    }
}

/// Maps any channel layout to stereo. Mono is duplicated to both sides; layouts with
/// more than two channels keep the front pair.
fn to_stereo(samples: &[f32], channel_count: u16) -> Vec<f32> {
    let channels = channel_count as usize;
    match channels {
        2 => samples[..samples.len() - samples.len() % 2].to_vec(),
        1 => samples.iter().flat_map(|s| [*s, *s]).collect(),
        _ => samples
            .chunks_exact(channels)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Transcodes samples from one sample rate to another using linear interpolation.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}
