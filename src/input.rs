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

//! Global keyboard capture.
//!
//! A key source installs an OS-level hook that observes every keyboard event in the
//! session without consuming it and forwards raw tuples to a channel. The hook never
//! blocks: all per-event work happens on the consumer side of the channel.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::keys::Keycode;

#[cfg(target_os = "linux")]
pub mod evdev;
pub mod filter;
#[cfg(target_os = "linux")]
mod keymap;
pub mod mock;

pub use filter::KeyEdgeFilter;

/// The raw event types a hook can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    KeyDown,
    KeyUp,
    /// A modifier changed state. The OS does not say which direction.
    FlagsChanged,
}

/// A raw keyboard event as observed by the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub key: Keycode,
    pub kind: RawKind,
    pub is_autorepeat: bool,
}

impl RawKeyEvent {
    pub fn down(key: Keycode) -> RawKeyEvent {
        RawKeyEvent {
            key,
            kind: RawKind::KeyDown,
            is_autorepeat: false,
        }
    }

    pub fn repeat(key: Keycode) -> RawKeyEvent {
        RawKeyEvent {
            key,
            kind: RawKind::KeyDown,
            is_autorepeat: true,
        }
    }

    pub fn up(key: Keycode) -> RawKeyEvent {
        RawKeyEvent {
            key,
            kind: RawKind::KeyUp,
            is_autorepeat: false,
        }
    }

    pub fn flags_changed(key: Keycode) -> RawKeyEvent {
        RawKeyEvent {
            key,
            kind: RawKind::FlagsChanged,
            is_autorepeat: false,
        }
    }
}

/// Hook installation failures. Both are terminal for the current session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("not authorized to observe keyboard events")]
    NotAuthorized,

    #[error("keyboard hook failed: {0}")]
    HookFailed(String),
}

/// A global keyboard hook.
pub trait KeySource: fmt::Display + Send + Sync {
    /// Installs the hook and starts forwarding raw events to `events_tx`.
    /// Starting an already running source is a no-op.
    fn start(&self, events_tx: Sender<RawKeyEvent>) -> Result<(), SourceError>;

    /// Tears the hook down synchronously. No events are sent after this returns.
    fn stop(&self);

    /// Returns true while the hook is installed.
    fn is_running(&self) -> bool;
}

/// Gets the key source with the given name. Names starting with "mock" select the mock
/// source; anything else selects the platform hook.
pub fn get_source(name: &str) -> Result<Arc<dyn KeySource>, SourceError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Source::get(name)));
    }

    platform_source()
}

#[cfg(target_os = "linux")]
fn platform_source() -> Result<Arc<dyn KeySource>, SourceError> {
    Ok(Arc::new(evdev::Source::new()))
}

#[cfg(not(target_os = "linux"))]
fn platform_source() -> Result<Arc<dyn KeySource>, SourceError> {
    Err(SourceError::HookFailed("unsupported platform".to_string()))
}

/// Lists the input devices the platform hook would read.
#[cfg(target_os = "linux")]
pub fn list_keyboards() -> Result<Vec<String>, SourceError> {
    evdev::list_keyboards()
}

/// Lists the input devices the platform hook would read.
#[cfg(not(target_os = "linux"))]
pub fn list_keyboards() -> Result<Vec<String>, SourceError> {
    Err(SourceError::HookFailed("unsupported platform".to_string()))
}
