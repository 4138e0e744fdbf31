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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{AudioError, Mixer, OutputHandle};

/// A mock device. Nothing is played; the mixer is rendered on demand instead.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    channels: u16,
    mixer: Arc<Mutex<Option<Mixer>>>,
    is_started: Arc<AtomicBool>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str, sample_rate: u32, channels: u16) -> Device {
        Device {
            name: name.to_string(),
            sample_rate,
            channels,
            mixer: Arc::new(Mutex::new(None)),
            is_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if the device has a running output.
    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::Relaxed)
    }

    /// Renders the given number of frames. Returns silence if the output isn't running.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * self.channels as usize];
        if let Some(mixer) = self.mixer.lock().as_mut() {
            mixer.process_into_output(&mut output, frames);
        }
        output
    }
}

/// Stops the mock output when dropped.
struct Output {
    mixer: Arc<Mutex<Option<Mixer>>>,
    is_started: Arc<AtomicBool>,
}

impl OutputHandle for Output {}

impl Drop for Output {
    fn drop(&mut self) {
        self.mixer.lock().take();
        self.is_started.store(false, Ordering::Relaxed);
    }
}

impl crate::audio::Device for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&self, mixer: Mixer) -> Result<Box<dyn OutputHandle>, AudioError> {
        let span = span!(Level::INFO, "output (mock)");
        let _enter = span.enter();

        let mut slot = self.mixer.lock();
        if slot.is_some() {
            return Err(AudioError::AlreadyStarted);
        }
        *slot = Some(mixer);
        self.is_started.store(true, Ordering::Relaxed);
        info!(device = self.name, "Mock output started.");

        Ok(Box::new(Output {
            mixer: self.mixer.clone(),
            is_started: self.is_started.clone(),
        }))
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, AudioError> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
