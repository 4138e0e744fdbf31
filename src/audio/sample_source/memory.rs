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
use std::time::Duration;

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// An in-memory sample source that hands out its samples in fixed-size blocks.
pub struct MemorySampleSource {
    samples: Vec<f32>,
    position: usize,
    block_frames: usize,
    channel_count: u16,
    sample_rate: u32,
}

impl MemorySampleSource {
    pub fn new(samples: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            block_frames: 64,
            channel_count,
            sample_rate,
        }
    }
}

impl SampleSource for MemorySampleSource {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, SampleSourceError> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.position + self.block_frames * self.channel_count as usize)
            .min(self.samples.len());
        let block = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(block))
    }

    fn channel_count(&self) -> u16 {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        let frames = self.samples.len() / self.channel_count.max(1) as usize;
        Some(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64))
    }
}
