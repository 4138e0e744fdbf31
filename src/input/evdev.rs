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

//! Linux keyboard hook reading every keyboard under /dev/input.
//!
//! Devices are opened read-only and never grabbed, so other applications keep seeing
//! every event.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use evdev::{Device, EventType, InputEvent, Key};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, span, warn, Level};

use super::keymap;
use super::{RawKeyEvent, SourceError};

const INPUT_DIR: &str = "/dev/input";

/// A running hook: the reader thread and the means to shut it down.
struct Hook {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
    /// Cleared by the reader thread when it exits on its own.
    alive: Arc<AtomicBool>,
}

impl Hook {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn remove(self) {
        // The reader thread may already have exited if every device went away.
        let _ = self.shutdown_tx.send(());
        if self.join.join().is_err() {
            error!("Keyboard hook thread panicked.");
        }
    }
}

/// Why the hook's readers stopped.
#[derive(Debug, PartialEq)]
enum HookExit {
    Shutdown,
    DevicesGone,
}

/// The evdev key source.
pub struct Source {
    hook: Mutex<Option<Hook>>,
}

impl Source {
    pub fn new() -> Source {
        Source {
            hook: Mutex::new(None),
        }
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::new()
    }
}

impl super::KeySource for Source {
    fn start(&self, events_tx: Sender<RawKeyEvent>) -> Result<(), SourceError> {
        let mut hook = self.hook.lock();
        if let Some(running) = hook.take() {
            if running.is_alive() {
                *hook = Some(running);
                return Ok(());
            }
            running.remove();
            info!("Keyboard hook lost its devices, reinstalling.");
        }

        let keyboards = open_keyboards()?;
        let device_count = keyboards.len();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = alive.clone();
        let join = thread::Builder::new()
            .name("keyasmr-hook".to_string())
            .spawn(move || {
                run_hook(keyboards, events_tx, shutdown_rx);
                reader_alive.store(false, Ordering::SeqCst);
            })
            .map_err(|e| SourceError::HookFailed(e.to_string()))?;

        info!(devices = device_count, "Keyboard hook installed.");
        *hook = Some(Hook {
            shutdown_tx,
            join,
            alive,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(hook) = self.hook.lock().take() else {
            return;
        };
        hook.remove();
        info!("Keyboard hook removed.");
    }

    fn is_running(&self) -> bool {
        self.hook.lock().as_ref().is_some_and(Hook::is_alive)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evdev ({})", INPUT_DIR)
    }
}

/// Lists the keyboards the hook would read.
pub fn list_keyboards() -> Result<Vec<String>, SourceError> {
    Ok(open_keyboards()?
        .into_iter()
        .map(|(path, device)| {
            format!(
                "{}: {}",
                path.display(),
                device.name().unwrap_or("unknown device")
            )
        })
        .collect())
}

/// Opens every keyboard-like event device. Fails with NotAuthorized if candidates exist
/// but none could be opened because of permissions.
fn open_keyboards() -> Result<Vec<(PathBuf, Device)>, SourceError> {
    let entries = fs::read_dir(INPUT_DIR).map_err(|e| {
        SourceError::HookFailed(format!("unable to read {}: {}", INPUT_DIR, e))
    })?;

    let mut denied = 0;
    let mut keyboards = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_event_node(&path) {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                if is_keyboard(&device) {
                    debug!(path = %path.display(), name = device.name(), "Found keyboard.");
                    keyboards.push((path, device));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => denied += 1,
            Err(e) => debug!(path = %path.display(), err = %e, "Skipping input device."),
        }
    }

    if keyboards.is_empty() {
        if denied > 0 {
            warn!(
                denied,
                "Input devices exist but could not be opened; add the user to the input group."
            );
            return Err(SourceError::NotAuthorized);
        }
        return Err(SourceError::HookFailed(
            "no keyboard devices found".to_string(),
        ));
    }

    keyboards.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyboards)
}

fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("event"))
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
}

/// Reads all devices until the shutdown signal arrives.
fn run_hook(
    keyboards: Vec<(PathBuf, Device)>,
    events_tx: Sender<RawKeyEvent>,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let span = span!(Level::INFO, "keyboard hook");
    let _enter = span.enter();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(err = %e, "Unable to start keyboard hook runtime.");
            return;
        }
    };

    runtime.block_on(async move {
        let mut readers = JoinSet::new();
        for (path, device) in keyboards {
            let mut stream = match device.into_event_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "Unable to stream keyboard events.");
                    continue;
                }
            };

            let events_tx = events_tx.clone();
            readers.spawn(async move {
                loop {
                    match stream.next_event().await {
                        Ok(event) => {
                            if let Some(raw) = translate(&event) {
                                if events_tx.send(raw).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(path = %path.display(), err = %e, "Keyboard device read failed.");
                            return;
                        }
                    }
                }
            });
        }

        if supervise(readers, shutdown_rx).await == HookExit::DevicesGone {
            warn!("Every keyboard device stopped, keyboard hook is no longer listening.");
        }
    });
}

/// Waits for shutdown or for every reader to finish, then stops the remaining readers.
async fn supervise(mut readers: JoinSet<()>, shutdown_rx: oneshot::Receiver<()>) -> HookExit {
    let exit = tokio::select! {
        _ = shutdown_rx => HookExit::Shutdown,
        _ = async { while readers.join_next().await.is_some() {} } => HookExit::DevicesGone,
    };
    readers.shutdown().await;
    exit
}

/// Converts a kernel input event into a raw key event. Non-key events are ignored.
fn translate(event: &InputEvent) -> Option<RawKeyEvent> {
    if event.event_type() != EventType::KEY {
        return None;
    }

    let key = keymap::to_virtual(event.code());
    match event.value() {
        0 => Some(RawKeyEvent::up(key)),
        1 => Some(RawKeyEvent::down(key)),
        2 => Some(RawKeyEvent::repeat(key)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_key_values() {
        let down = InputEvent::new(EventType::KEY, Key::KEY_A.code(), 1);
        let repeat = InputEvent::new(EventType::KEY, Key::KEY_A.code(), 2);
        let up = InputEvent::new(EventType::KEY, Key::KEY_A.code(), 0);

        assert_eq!(translate(&down), Some(RawKeyEvent::down(0)));
        assert_eq!(translate(&repeat), Some(RawKeyEvent::repeat(0)));
        assert_eq!(translate(&up), Some(RawKeyEvent::up(0)));
    }

    #[test]
    fn test_translate_ignores_other_events() {
        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        assert_eq!(translate(&sync), None);
    }

    #[tokio::test]
    async fn test_supervise_reports_lost_devices() {
        let mut readers = JoinSet::new();
        readers.spawn(async {});
        readers.spawn(async {});
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        assert_eq!(supervise(readers, shutdown_rx).await, HookExit::DevicesGone);

        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        assert_eq!(
            supervise(JoinSet::new(), shutdown_rx).await,
            HookExit::DevicesGone
        );
    }

    #[tokio::test]
    async fn test_supervise_stops_readers_on_shutdown() {
        let mut readers = JoinSet::new();
        readers.spawn(std::future::pending::<()>());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        assert!(shutdown_tx.send(()).is_ok());
        assert_eq!(supervise(readers, shutdown_rx).await, HookExit::Shutdown);
    }

    #[test]
    fn test_event_node_names() {
        assert!(is_event_node(Path::new("/dev/input/event3")));
        assert!(!is_event_node(Path::new("/dev/input/mice")));
        assert!(!is_event_node(Path::new("/dev/input/by-id")));
    }
}
