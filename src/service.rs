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

//! The service facade: owns every component and exposes the commands a front end needs.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::audio::{AudioGraph, Device};
use crate::config::Config;
use crate::dispatcher::{Control, Dispatcher, DispatcherHandle, DispatcherState, DispatcherStats};
use crate::input::{KeySource, RawKeyEvent, SourceError};
use crate::pack::{PackError, PackId, PackStore, PackSummary, SoundPack};
use crate::samples::{PackBinder, SampleLoader};
use crate::settings::{AppSettings, SettingsError, SettingsStore};

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    PacksChanged(Vec<PackSummary>),
    SelectedPackChanged(Option<PackId>),
    /// The key hook needs a permission the process doesn't have.
    PermissionRequired,
    /// A user-visible failure.
    Error(String),
}

/// Fans signals out to every subscriber. A pending permission request is replayed to
/// late subscribers until the key source starts.
#[derive(Default)]
pub struct Signals {
    subscribers: Mutex<Vec<Sender<Signal>>>,
    permission_required: AtomicBool,
}

impl Signals {
    pub fn new() -> Signals {
        Signals::default()
    }

    pub fn subscribe(&self) -> Receiver<Signal> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut subscribers = self.subscribers.lock();
        if self.permission_required.load(Ordering::SeqCst) {
            let _ = tx.send(Signal::PermissionRequired);
        }
        subscribers.push(tx);
        rx
    }

    pub fn emit(&self, signal: Signal) {
        let mut subscribers = self.subscribers.lock();
        if signal == Signal::PermissionRequired {
            self.permission_required.store(true, Ordering::SeqCst);
        }
        subscribers.retain(|subscriber| subscriber.send(signal.clone()).is_ok());
    }

    /// Whether the key source is waiting on a permission.
    pub fn permission_required(&self) -> bool {
        self.permission_required.load(Ordering::SeqCst)
    }

    /// Forgets a pending permission request.
    pub fn permission_granted(&self) {
        self.permission_required.store(false, Ordering::SeqCst);
    }
}

/// The keyboard sound service.
pub struct Service {
    config: Config,
    settings: SettingsStore,
    store: RwLock<PackStore>,
    packs: RwLock<Vec<Arc<SoundPack>>>,
    bound: Mutex<Option<PackId>>,
    source: Arc<dyn KeySource>,
    events_tx: Sender<RawKeyEvent>,
    graph: Arc<AudioGraph>,
    binder: Arc<PackBinder>,
    dispatcher: DispatcherHandle,
    signals: Arc<Signals>,
}

impl Service {
    /// Loads settings, scans packs, binds the selected pack, and starts the key source if
    /// the service is enabled.
    pub fn new(
        config: Config,
        source: Arc<dyn KeySource>,
        device: Arc<dyn Device>,
    ) -> Result<Service, Box<dyn Error>> {
        let settings =
            SettingsStore::open(&config.preferences_file(), config.settings_debounce()?)?;
        let current = settings.get();
        let store = PackStore::open(&PackStore::resolve_dir(
            &current.custom_sound_pack_directory,
            config.packs_dir(),
        ))?;

        let graph = Arc::new(AudioGraph::new(device, config.audio().pool_size()));
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        let binder = Arc::new(PackBinder::new(
            SampleLoader::new(graph.sample_rate()),
            ready_tx,
        )?);
        let signals = Arc::new(Signals::new());

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let dispatcher = DispatcherHandle::spawn(
            Dispatcher::new(graph.clone(), current.clone(), StdRng::from_entropy()),
            events_rx,
            settings.subscribe(),
            ready_rx,
            binder.clone(),
            signals.clone(),
        )?;

        let service = Service {
            config,
            settings,
            store: RwLock::new(store),
            packs: RwLock::new(Vec::new()),
            bound: Mutex::new(None),
            source,
            events_tx,
            graph,
            binder,
            dispatcher,
            signals,
        };

        service.rescan_packs();
        if current.is_enabled {
            // Failures are reported through signals; the service still runs.
            let _ = service.start_source();
        }
        info!(
            source = %service.source,
            packs = service.packs.read().len(),
            enabled = current.is_enabled,
            "Service started."
        );
        Ok(service)
    }

    pub fn subscribe(&self) -> Receiver<Signal> {
        self.signals.subscribe()
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.get()
    }

    pub fn packs(&self) -> Vec<PackSummary> {
        self.packs.read().iter().map(|pack| pack.summary()).collect()
    }

    pub fn packs_dir(&self) -> PathBuf {
        self.store.read().dir().to_path_buf()
    }

    /// The pack that's bound, or being decoded for binding.
    pub fn bound_pack(&self) -> Option<PackId> {
        self.bound.lock().clone()
    }

    /// The pack key edges are currently played from.
    pub fn active_pack(&self) -> Option<PackId> {
        self.dispatcher.bound_pack()
    }

    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.dispatcher.stats()
    }

    pub fn graph(&self) -> &Arc<AudioGraph> {
        &self.graph
    }

    pub fn is_listening(&self) -> bool {
        self.source.is_running()
    }

    /// Turns key sounds on or off.
    pub fn enable(&self, enabled: bool) -> Result<(), SourceError> {
        self.settings.update(|settings| settings.is_enabled = enabled);
        if enabled {
            self.start_source()
        } else {
            self.stop_source();
            Ok(())
        }
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.settings.update(|settings| settings.master_volume = volume);
    }

    /// Selects and binds an installed pack.
    pub fn select_pack(&self, id: &PackId) -> Result<(), PackError> {
        let pack = self.find(id).inspect_err(|e| self.report(e))?;
        self.settings
            .update(|settings| settings.selected_sound_pack_id = Some(id.clone()));
        self.bind(pack);
        Ok(())
    }

    /// Rescans the packs directory, rebinding if the bound pack went away.
    pub fn rescan_packs(&self) -> Vec<PackSummary> {
        self.refresh_store();
        let packs: Vec<Arc<SoundPack>> = self
            .store
            .read()
            .enumerate()
            .into_iter()
            .map(Arc::new)
            .collect();
        let summaries: Vec<PackSummary> = packs.iter().map(|pack| pack.summary()).collect();
        for summary in summaries.iter().filter(|s| !s.missing_samples.is_empty()) {
            warn!(
                pack = %summary.id,
                missing = ?summary.missing_samples,
                "Pack maps samples it doesn't contain."
            );
        }
        *self.packs.write() = packs;
        self.signals.emit(Signal::PacksChanged(summaries.clone()));
        self.bind_selected();
        summaries
    }

    /// Installs a bundle from outside the packs directory.
    pub fn import_pack(&self, path: &Path) -> Result<PathBuf, PackError> {
        let dest = self.store.read().import(path).inspect_err(|e| self.report(e))?;
        self.rescan_packs();
        Ok(dest)
    }

    /// Copies an installed pack's bundle to `dest`.
    pub fn export_pack(&self, id: &PackId, dest: &Path) -> Result<PathBuf, PackError> {
        let pack = self.find(id).inspect_err(|e| self.report(e))?;
        self.store
            .read()
            .export(&pack, dest)
            .inspect_err(|e| self.report(e))
    }

    /// Deletes an installed pack. A bound pack is replaced by the next available one.
    pub fn delete_pack(&self, id: &PackId) -> Result<(), PackError> {
        self.store.read().delete(id).inspect_err(|e| self.report(e))?;
        self.rescan_packs();
        Ok(())
    }

    /// Changes one setting by its stored name.
    pub fn update_setting(&self, field: &str, value: &str) -> Result<AppSettings, SettingsError> {
        let updated = self
            .settings
            .update_setting(field, value)
            .inspect_err(|e| self.report(e))?;
        match field {
            "isEnabled" if updated.is_enabled => {
                let _ = self.start_source();
            }
            "isEnabled" => self.stop_source(),
            "selectedSoundPackId" => self.bind_selected(),
            "customSoundPackDirectory" => {
                self.rescan_packs();
            }
            _ => {}
        }
        Ok(updated)
    }

    /// Writes pending settings changes now.
    pub fn flush_settings(&self) -> Result<(), SettingsError> {
        self.settings.flush()
    }

    fn find(&self, id: &PackId) -> Result<Arc<SoundPack>, PackError> {
        self.packs
            .read()
            .iter()
            .find(|pack| pack.id == *id)
            .cloned()
            .ok_or_else(|| PackError::NotFound(id.clone()))
    }

    /// Binds the selected pack, or the first playable one when the selection is unset or
    /// unavailable.
    fn bind_selected(&self) {
        let selected = self.settings.get().selected_sound_pack_id;
        let chosen = {
            let packs = self.packs.read();
            selected
                .as_ref()
                .and_then(|id| packs.iter().find(|pack| pack.id == *id && pack.is_playable()))
                .or_else(|| packs.iter().find(|pack| pack.is_playable()))
                .cloned()
        };

        match chosen {
            Some(pack) => {
                if self.bound.lock().as_ref() != Some(&pack.id) {
                    if selected.is_some() && selected.as_ref() != Some(&pack.id) {
                        info!(
                            selected = ?selected,
                            fallback = %pack.id,
                            "Selected pack is unavailable, using the first playable pack."
                        );
                    }
                    self.bind(pack);
                }
            }
            None => self.unbind(),
        }
    }

    fn bind(&self, pack: Arc<SoundPack>) {
        let id = pack.id.clone();
        info!(pack = %id, name = %pack.name, "Binding sound pack.");
        *self.bound.lock() = Some(id.clone());
        self.binder.bind(pack);
        self.signals.emit(Signal::SelectedPackChanged(Some(id)));
    }

    fn unbind(&self) {
        if self.bound.lock().take().is_some() {
            self.binder.cancel();
            self.dispatcher.send(Control::Unbind);
            self.signals.emit(Signal::SelectedPackChanged(None));
        }
    }

    fn refresh_store(&self) {
        let dir = PackStore::resolve_dir(
            &self.settings.get().custom_sound_pack_directory,
            self.config.packs_dir(),
        );
        if dir == self.store.read().dir() {
            return;
        }
        match PackStore::open(&dir) {
            Ok(store) => {
                info!(dir = ?dir, "Packs directory changed.");
                *self.store.write() = store;
            }
            Err(e) => self.report(&e),
        }
    }

    fn start_source(&self) -> Result<(), SourceError> {
        match self.source.start(self.events_tx.clone()) {
            Ok(()) => {
                self.signals.permission_granted();
                info!(source = %self.source, "Listening for key events.");
                Ok(())
            }
            Err(e) => {
                if e == SourceError::NotAuthorized {
                    self.signals.emit(Signal::PermissionRequired);
                }
                self.report(&e);
                Err(e)
            }
        }
    }

    fn stop_source(&self) {
        if self.source.is_running() {
            self.source.stop();
            info!(source = %self.source, "Stopped listening for key events.");
        }
        self.dispatcher.send(Control::SourceStopped);
    }

    fn report(&self, e: &dyn Error) {
        error!(err = %e, "Service error.");
        self.signals.emit(Signal::Error(e.to_string()));
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.source.stop();
        self.graph.stop();
        if let Err(e) = self.settings.flush() {
            error!(err = %e, "Failed to save settings on shutdown.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::audio::mock;
    use crate::config::Audio;
    use crate::input;
    use crate::keys::SPACEBAR_KEY;
    use crate::testutil::{eventually, write_pack};

    struct Fixture {
        _temp: tempfile::TempDir,
        packs_dir: PathBuf,
        prefs: PathBuf,
        source: Arc<input::mock::Source>,
        device: Arc<mock::Device>,
    }

    impl Fixture {
        fn new() -> Result<Fixture, Box<dyn Error>> {
            let temp = tempfile::tempdir()?;
            let packs_dir = temp.path().join("packs");
            std::fs::create_dir_all(&packs_dir)?;
            Ok(Fixture {
                packs_dir,
                prefs: temp.path().join("preferences.json"),
                _temp: temp,
                source: Arc::new(input::mock::Source::get("mock-keys")),
                device: Arc::new(mock::Device::get("mock-output", 48000, 2)),
            })
        }

        fn service(&self) -> Result<Service, Box<dyn Error>> {
            let config = Config::new(
                Audio::new("mock-output"),
                Some(self.packs_dir.clone()),
                Some(self.prefs.clone()),
            );
            Service::new(config, self.source.clone(), self.device.clone())
        }

        fn pack(&self, stem: &str, name: &str, sounds: &[&str]) -> Result<PathBuf, Box<dyn Error>> {
            let press: Vec<(u16, &str)> = sounds.iter().map(|s| (18, *s)).collect();
            write_pack(&self.packs_dir, stem, name, &press, sounds)
        }
    }

    fn wait_bound(service: &Service, id: &str) {
        eventually(
            || {
                service.bound_pack() == Some(PackId::from(id))
                    && service.active_pack() == Some(PackId::from(id))
                    && service.state() == DispatcherState::Active
            },
            "Pack was never bound",
        );
    }

    fn drain(signals: &Receiver<Signal>) -> Vec<Signal> {
        signals.try_iter().collect()
    }

    #[test]
    fn test_binds_first_pack_and_plays() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("beta", "Beta", &["b.wav"])?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;

        let service = fixture.service()?;
        assert_eq!(service.packs().len(), 2);
        wait_bound(&service, "alpha");
        assert!(service.is_listening());
        assert!(fixture.device.is_started());

        // Auto-repeat collapses into one press.
        fixture.source.inject(RawKeyEvent::down(18));
        for _ in 0..10 {
            fixture.source.inject(RawKeyEvent::repeat(18));
        }
        fixture.source.inject(RawKeyEvent::up(18));
        eventually(|| service.stats().presses() == 1, "Press never dispatched");

        let rendered = fixture.device.render(256);
        assert!(rendered.iter().any(|s| *s != 0.0));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(service.stats().presses(), 1);
        Ok(())
    }

    #[test]
    fn test_select_pack() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;
        fixture.pack("beta", "Beta", &["b.wav"])?;

        let service = fixture.service()?;
        let signals = service.subscribe();
        wait_bound(&service, "alpha");

        service.select_pack(&PackId::from("beta"))?;
        wait_bound(&service, "beta");
        assert_eq!(
            service.settings().selected_sound_pack_id,
            Some(PackId::from("beta"))
        );
        assert!(drain(&signals).contains(&Signal::SelectedPackChanged(Some(PackId::from("beta")))));

        assert!(matches!(
            service.select_pack(&PackId::from("nope")),
            Err(PackError::NotFound(_))
        ));
        assert!(matches!(drain(&signals).as_slice(), [Signal::Error(_)]));

        // The selection survives a restart.
        drop(service);
        let service = fixture.service()?;
        wait_bound(&service, "beta");
        Ok(())
    }

    #[test]
    fn test_enable_and_disable() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;
        let service = fixture.service()?;
        wait_bound(&service, "alpha");

        service.enable(false)?;
        assert!(!service.is_listening());
        eventually(
            || service.state() == DispatcherState::Armed,
            "Dispatcher never disarmed",
        );
        assert!(!fixture.source.inject(RawKeyEvent::down(18)));

        service.enable(true)?;
        assert!(service.is_listening());
        wait_bound(&service, "alpha");
        fixture.source.inject(RawKeyEvent::down(18));
        eventually(|| service.stats().presses() == 1, "Press never dispatched");
        Ok(())
    }

    #[test]
    fn test_permission_required() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture
            .source
            .fail_start_with(Some(SourceError::NotAuthorized));
        let service = fixture.service()?;
        let signals = service.subscribe();
        assert!(!service.is_listening());

        service.enable(false)?;
        assert_eq!(service.enable(true), Err(SourceError::NotAuthorized));
        let received = drain(&signals);
        assert!(received.contains(&Signal::PermissionRequired));
        assert!(received.iter().any(|s| matches!(s, Signal::Error(_))));

        fixture.source.fail_start_with(None);
        service.enable(true)?;
        assert!(service.is_listening());
        Ok(())
    }

    #[test]
    fn test_permission_replayed_to_late_subscribers() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture
            .source
            .fail_start_with(Some(SourceError::NotAuthorized));
        let service = fixture.service()?;
        assert!(!service.is_listening());

        let signals = service.subscribe();
        assert_eq!(drain(&signals), vec![Signal::PermissionRequired]);

        fixture.source.fail_start_with(None);
        service.enable(true)?;
        let late = service.subscribe();
        assert!(drain(&late).is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_sample_is_silent() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        write_pack(
            &fixture.packs_dir,
            "holey",
            "Holey",
            &[(18, "a.wav"), (SPACEBAR_KEY, "gone.wav")],
            &["a.wav"],
        )?;
        let service = fixture.service()?;
        let signals = service.subscribe();
        wait_bound(&service, "holey");

        fixture.source.inject(RawKeyEvent::down(SPACEBAR_KEY));
        eventually(
            || service.graph().dropped_shots() == 1,
            "Missing sample was never dropped",
        );
        assert_eq!(service.stats().presses(), 0);
        assert!(drain(&signals).is_empty());
        Ok(())
    }

    #[test]
    fn test_import_export_delete() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;
        let elsewhere = tempfile::tempdir()?;
        let outside = write_pack(elsewhere.path(), "gamma", "Gamma", &[(18, "g.wav")], &["g.wav"])?;

        let service = fixture.service()?;
        let signals = service.subscribe();
        wait_bound(&service, "alpha");

        service.import_pack(&outside)?;
        assert_eq!(service.packs().len(), 2);
        assert!(drain(&signals)
            .iter()
            .any(|s| matches!(s, Signal::PacksChanged(packs) if packs.len() == 2)));

        let exported = service.export_pack(&PackId::from("gamma"), &elsewhere.path().join("out"))?;
        assert!(PackStore::validate(&exported));

        // Deleting the bound pack falls back to the remaining one.
        service.delete_pack(&PackId::from("alpha"))?;
        wait_bound(&service, "gamma");
        assert_eq!(service.packs().len(), 1);

        service.delete_pack(&PackId::from("gamma"))?;
        eventually(
            || service.bound_pack().is_none() && service.state() != DispatcherState::Active,
            "Pack was never unbound",
        );
        assert!(service.delete_pack(&PackId::from("gamma")).is_err());
        assert!(service.import_pack(Path::new("/does/not/exist")).is_err());
        Ok(())
    }

    #[test]
    fn test_update_setting() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;
        let service = fixture.service()?;
        let signals = service.subscribe();

        service.update_setting("enablePitchVariation", "true")?;
        service.update_setting("pitchVariationAmount", "2")?;
        eventually(
            || {
                let params = service.graph().params();
                params.pitch_enabled && params.pitch_range == 2.0
            },
            "Pitch settings never reached the graph",
        );

        service.set_master_volume(0.25);
        eventually(
            || service.graph().params().master_volume == 0.25,
            "Volume never reached the graph",
        );

        assert!(service.update_setting("masterVolume", "loud").is_err());
        assert!(service.update_setting("nope", "1").is_err());
        assert_eq!(service.settings().master_volume, 0.25);
        assert_eq!(
            drain(&signals)
                .iter()
                .filter(|s| matches!(s, Signal::Error(_)))
                .count(),
            2
        );

        service.update_setting("isEnabled", "false")?;
        assert!(!service.is_listening());

        service.flush_settings()?;
        let saved = AppSettings::load(&fixture.prefs)?;
        assert_eq!(saved.master_volume, 0.25);
        assert!(!saved.is_enabled);
        Ok(())
    }

    #[test]
    fn test_custom_pack_directory() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        fixture.pack("alpha", "Alpha", &["a.wav"])?;
        let custom = tempfile::tempdir()?;
        write_pack(custom.path(), "delta", "Delta", &[(18, "d.wav")], &["d.wav"])?;

        let service = fixture.service()?;
        wait_bound(&service, "alpha");

        service.update_setting("customSoundPackDirectory", &custom.path().to_string_lossy())?;
        assert_eq!(service.packs_dir(), custom.path());
        wait_bound(&service, "delta");

        // A directory that doesn't exist is ignored.
        service.update_setting("customSoundPackDirectory", "/does/not/exist")?;
        assert_eq!(service.packs_dir(), fixture.packs_dir);
        wait_bound(&service, "alpha");
        Ok(())
    }
}
