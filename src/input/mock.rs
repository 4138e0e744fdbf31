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
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::info;

use super::{RawKeyEvent, SourceError};

/// A mock key source. Events are injected by hand instead of coming from a hook.
#[derive(Clone)]
pub struct Source {
    name: String,
    events_tx: Arc<Mutex<Option<Sender<RawKeyEvent>>>>,
    fail_with: Arc<Mutex<Option<SourceError>>>,
}

impl Source {
    /// Gets the given mock source.
    pub fn get(name: &str) -> Source {
        Source {
            name: name.to_string(),
            events_tx: Arc::new(Mutex::new(None)),
            fail_with: Arc::new(Mutex::new(None)),
        }
    }

    /// Makes every following start fail with the given error.
    pub fn fail_start_with(&self, error: Option<SourceError>) {
        *self.fail_with.lock() = error;
    }

    /// Injects an event as if the hook observed it. Returns false if the source is stopped.
    pub fn inject(&self, event: RawKeyEvent) -> bool {
        match self.events_tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl super::KeySource for Source {
    fn start(&self, events_tx: Sender<RawKeyEvent>) -> Result<(), SourceError> {
        if let Some(error) = self.fail_with.lock().clone() {
            return Err(error);
        }

        let mut current = self.events_tx.lock();
        if current.is_none() {
            info!(source = self.name, "Mock key source started.");
            *current = Some(events_tx);
        }
        Ok(())
    }

    fn stop(&self) {
        if self.events_tx.lock().take().is_some() {
            info!(source = self.name, "Mock key source stopped.");
        }
    }

    fn is_running(&self) -> bool {
        self.events_tx.lock().is_some()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
