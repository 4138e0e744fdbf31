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
use std::{fmt, sync::Arc};

use crate::config;

pub mod cpal;
pub mod error;
pub mod graph;
pub mod mixer;
pub mod mock;
pub mod pitch;
pub mod sample_source;
pub mod thread_priority;

pub use error::AudioError;
pub use graph::{AudioGraph, ShotParams};
pub use mixer::{Mixer, Shot};

/// An output device the mixer can render into.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// The sample rate the mixer must render at.
    fn sample_rate(&self) -> u32;

    /// The number of interleaved output channels.
    fn channels(&self) -> u16;

    /// Hands the mixer to the device and starts output. Output stops when the returned
    /// handle is dropped.
    fn start(&self, mixer: Mixer) -> Result<Box<dyn OutputHandle>, AudioError>;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, AudioError>;
}

/// Keeps a running output alive. Dropping it stops the output.
pub trait OutputHandle: std::marker::Send {}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, AudioError> {
    cpal::Device::list()
}

/// Gets a device with the given configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, AudioError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(
            device,
            config.sample_rate(),
            config.channels(),
        )));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
