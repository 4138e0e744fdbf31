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
use std::error::Error;
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, warn, Instrument, Level};

use crate::pack::PackId;
use crate::service::{Service, Signal};

pub mod stdin;

/// Controller events that will trigger behavior in the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Turns key sounds on or off.
    Enable(bool),

    /// Sets the master volume.
    Volume(f32),

    /// Selects an installed pack.
    Select(PackId),

    /// Rescans the packs directory.
    Rescan,

    /// Lists installed packs.
    Packs,

    /// Prints what the service is doing.
    Status,

    /// Installs a bundle.
    Import(PathBuf),

    /// Copies an installed pack's bundle somewhere else.
    Export(PackId, PathBuf),

    /// Deletes an installed pack.
    Delete(PackId),

    /// Changes a setting by its stored name.
    Set { field: String, value: String },

    /// Stops the controller.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives the service from a front end.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver. Service signals are logged.
    pub fn new(
        service: Arc<Service>,
        driver: Arc<dyn Driver>,
    ) -> Result<Controller, Box<dyn Error>> {
        let signals = service.subscribe();
        thread::Builder::new()
            .name("keyasmr-signals".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "signals");
                let _enter = span.enter();
                for signal in signals {
                    log_signal(&signal);
                }
            })?;

        Ok(Controller {
            handle: tokio::spawn(
                Controller::trigger_events(service, driver)
                    .instrument(span!(Level::INFO, "controller")),
            ),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Applies events from the driver until it stops or asks to quit.
    async fn trigger_events(service: Arc<Service>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        info!(packs = service.packs().len(), "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = ?event, "Received event.");
            if event == Event::Quit {
                break;
            }
            match apply(&service, event) {
                Ok(reply) if !reply.is_empty() => println!("{}", reply),
                Ok(_) => {}
                Err(e) => error!("Error talking to service: {}", e),
            }
        }

        info!("Controller closing.");
        drop(events_rx);
        match join_handle.await {
            Ok(Err(e)) => error!("Event monitor failed: {}", e),
            Err(e) => error!("Error waiting for event monitor to stop: {}", e),
            Ok(Ok(())) => {}
        }
    }
}

/// Applies one event, returning text for the user.
pub fn apply(service: &Service, event: Event) -> Result<String, Box<dyn Error>> {
    Ok(match event {
        Event::Enable(enabled) => {
            service.enable(enabled)?;
            format!("Key sounds {}.", if enabled { "enabled" } else { "disabled" })
        }
        Event::Volume(volume) => {
            service.set_master_volume(volume);
            format!("Volume set to {:.2}.", service.settings().master_volume)
        }
        Event::Select(id) => {
            service.select_pack(&id)?;
            format!("Selected {}.", id)
        }
        Event::Rescan => {
            let packs = service.rescan_packs();
            format!("Found {} packs.", packs.len())
        }
        Event::Packs => list_packs(service),
        Event::Status => {
            let settings = service.settings();
            format!(
                "State: {}\nListening: {}\nPack: {}\nVolume: {:.2}\nPresses: {}",
                service.state(),
                service.is_listening(),
                service
                    .active_pack()
                    .map_or_else(|| "none".to_string(), |id| id.to_string()),
                settings.master_volume,
                service.stats().presses(),
            )
        }
        Event::Import(path) => {
            let dest = service.import_pack(&path)?;
            format!("Imported to {}.", dest.display())
        }
        Event::Export(id, dest) => {
            let target = service.export_pack(&id, &dest)?;
            format!("Exported to {}.", target.display())
        }
        Event::Delete(id) => {
            service.delete_pack(&id)?;
            format!("Deleted {}.", id)
        }
        Event::Set { field, value } => {
            service.update_setting(&field, &value)?;
            format!("{} = {}", field, value)
        }
        Event::Quit => String::new(),
    })
}

fn list_packs(service: &Service) -> String {
    let packs = service.packs();
    if packs.is_empty() {
        return format!("No packs found in {}.", service.packs_dir().display());
    }

    let bound = service.bound_pack();
    let mut listing = format!("Packs (count: {}):", packs.len());
    for pack in packs {
        let marker = if bound.as_ref() == Some(&pack.id) { "*" } else { "-" };
        let _ = write!(
            listing,
            "\n{} {} [{}] v{} by {} ({} samples)",
            marker, pack.name, pack.id, pack.version, pack.author, pack.sample_count
        );
        if !pack.missing_samples.is_empty() {
            let _ = write!(listing, " missing: {}", pack.missing_samples.join(", "));
        }
    }
    listing
}

fn log_signal(signal: &Signal) {
    match signal {
        Signal::PacksChanged(packs) => info!(count = packs.len(), "Packs changed."),
        Signal::SelectedPackChanged(Some(id)) => info!(pack = %id, "Selected pack changed."),
        Signal::SelectedPackChanged(None) => info!("No pack selected."),
        Signal::PermissionRequired => warn!(
            "Permission to read keyboard events is required. On Linux, add the user to the \
             'input' group."
        ),
        Signal::Error(message) => warn!(error = %message, "Service reported an error."),
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::sync::Arc;

    use super::{apply, Event};
    use crate::audio::mock;
    use crate::config::{Audio, Config};
    use crate::input;
    use crate::pack::PackId;
    use crate::service::Service;
    use crate::testutil::write_pack;

    fn service(dir: &std::path::Path) -> Result<Service, Box<dyn Error>> {
        let packs_dir = dir.join("packs");
        std::fs::create_dir_all(&packs_dir)?;
        write_pack(&packs_dir, "alpha", "Alpha", &[(18, "a.wav")], &["a.wav"])?;
        write_pack(&packs_dir, "beta", "Beta", &[(18, "b.wav"), (19, "missing.wav")], &["b.wav"])?;
        Service::new(
            Config::new(
                Audio::new("mock-output"),
                Some(packs_dir),
                Some(dir.join("preferences.json")),
            ),
            Arc::new(input::mock::Source::get("mock-keys")),
            Arc::new(mock::Device::get("mock-output", 48000, 2)),
        )
    }

    #[test]
    fn test_apply_events() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let service = service(temp.path())?;

        let listing = apply(&service, Event::Packs)?;
        assert!(listing.starts_with("Packs (count: 2):"));
        assert!(listing.contains("* Alpha [alpha]"));
        assert!(listing.contains("- Beta [beta]"));
        assert!(listing.contains("missing: missing.wav"));

        assert_eq!(apply(&service, Event::Volume(0.5))?, "Volume set to 0.50.");
        assert_eq!(apply(&service, Event::Volume(4.0))?, "Volume set to 1.00.");
        assert_eq!(
            apply(&service, Event::Select(PackId::from("beta")))?,
            "Selected beta."
        );
        assert!(apply(&service, Event::Select(PackId::from("nope"))).is_err());
        assert_eq!(apply(&service, Event::Enable(false))?, "Key sounds disabled.");
        assert!(!service.is_listening());
        assert!(apply(&service, Event::Status)?.contains("Listening: false"));

        assert_eq!(
            apply(
                &service,
                Event::Set {
                    field: "enableSpatialAudio".to_string(),
                    value: "true".to_string(),
                }
            )?,
            "enableSpatialAudio = true"
        );
        assert!(service.settings().enable_spatial_audio);

        let exported = apply(
            &service,
            Event::Export(PackId::from("alpha"), temp.path().join("out")),
        )?;
        assert!(exported.starts_with("Exported to"));
        assert_eq!(
            apply(&service, Event::Delete(PackId::from("alpha")))?,
            "Deleted alpha."
        );
        assert_eq!(apply(&service, Event::Rescan)?, "Found 1 packs.");

        let imported = apply(
            &service,
            Event::Import(temp.path().join("out").join("alpha.soundpack")),
        )?;
        assert!(imported.starts_with("Imported to"));
        assert_eq!(service.packs().len(), 2);
        Ok(())
    }
}
