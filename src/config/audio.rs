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
use serde::Deserialize;

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_BLOCK_FRAMES: usize = 128;
const DEFAULT_POOL_SIZE: usize = 5;
const MIN_POOL_SIZE: usize = 2;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The audio device. "default" is the host's default output; names starting with
    /// "mock" select the mock device.
    device: Option<String>,

    /// Output sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Output channel count (default: 2).
    channels: Option<u16>,

    /// Frames mixed per block by the render thread (default: 128). Smaller blocks
    /// lower latency at the cost of more wakeups.
    block_frames: Option<usize>,

    /// Chains per sample for polyphony (default: 5, at least 2).
    pool_size: Option<usize>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the output sample rate (default: 48000)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.filter(|rate| *rate > 0).unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the output channel count (default: 2)
    pub fn channels(&self) -> u16 {
        self.channels.filter(|channels| *channels > 0).unwrap_or(DEFAULT_CHANNELS)
    }

    /// Returns the mixer block size in frames (default: 128)
    pub fn block_frames(&self) -> usize {
        self.block_frames.unwrap_or(DEFAULT_BLOCK_FRAMES).max(16)
    }

    /// Returns the number of chains per sample (default: 5, never below 2)
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(DEFAULT_POOL_SIZE).max(MIN_POOL_SIZE)
    }
}
