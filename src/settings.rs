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

//! Persisted user preferences.
//!
//! Settings live as a JSON object under the `appSettings` key of a preferences file.
//! Other keys of that file, and fields of the object this version doesn't know about,
//! survive read-modify-write. Writes are debounced on a background thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, span, warn, Level};

use crate::pack::PackId;

mod error;

pub use error::SettingsError;

/// The preferences key settings are stored under.
pub const SETTINGS_KEY: &str = "appSettings";

/// Largest pitch variation the transposer supports, in semitones.
pub const MAX_PITCH_VARIATION: f32 = 12.0;

const APP_DIR: &str = "KeyboardASMR";
const PREFERENCES_FILE: &str = "preferences.json";

/// The default preferences file, in the platform's config directory.
pub fn default_preferences_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(PREFERENCES_FILE)
}

/// User preferences.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// 0.0 - 1.0.
    pub master_volume: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_sound_pack_id: Option<PackId>,
    pub is_enabled: bool,
    pub launch_at_login: bool,
    pub enable_modifier_keys: bool,
    pub enable_function_keys: bool,
    pub reduce_volume_on_rapid_typing: bool,
    pub enable_pitch_variation: bool,
    /// Semitones either side, 0.0 - 12.0.
    pub pitch_variation_amount: f32,
    pub enable_spatial_audio: bool,
    /// 0.0 - 1.0.
    pub spatial_audio_width: f32,
    /// Overrides the packs directory when non-empty.
    pub custom_sound_pack_directory: String,

    /// Fields written by other versions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            master_volume: 0.7,
            selected_sound_pack_id: None,
            is_enabled: true,
            launch_at_login: false,
            enable_modifier_keys: true,
            enable_function_keys: true,
            reduce_volume_on_rapid_typing: true,
            enable_pitch_variation: false,
            pitch_variation_amount: 0.5,
            enable_spatial_audio: false,
            spatial_audio_width: 0.3,
            custom_sound_pack_directory: String::new(),
            extra: Map::new(),
        }
    }
}

impl AppSettings {
    /// Clamps every numeric field to its range.
    pub fn clamp(&mut self) {
        let defaults = AppSettings::default();
        self.master_volume = clamp_or(self.master_volume, 0.0, 1.0, defaults.master_volume);
        self.pitch_variation_amount = clamp_or(
            self.pitch_variation_amount,
            0.0,
            MAX_PITCH_VARIATION,
            defaults.pitch_variation_amount,
        );
        self.spatial_audio_width = clamp_or(
            self.spatial_audio_width,
            0.0,
            1.0,
            defaults.spatial_audio_width,
        );
    }

    /// Sets a field by its stored name from a string value. Nothing changes on error.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), SettingsError> {
        let value = value.trim();
        match field {
            "masterVolume" => self.master_volume = parse_f32(field, value)?,
            "selectedSoundPackId" => {
                self.selected_sound_pack_id = (!value.is_empty()).then(|| PackId::from(value))
            }
            "isEnabled" => self.is_enabled = parse_bool(field, value)?,
            "launchAtLogin" => self.launch_at_login = parse_bool(field, value)?,
            "enableModifierKeys" => self.enable_modifier_keys = parse_bool(field, value)?,
            "enableFunctionKeys" => self.enable_function_keys = parse_bool(field, value)?,
            "reduceVolumeOnRapidTyping" => {
                self.reduce_volume_on_rapid_typing = parse_bool(field, value)?
            }
            "enablePitchVariation" => self.enable_pitch_variation = parse_bool(field, value)?,
            "pitchVariationAmount" => self.pitch_variation_amount = parse_f32(field, value)?,
            "enableSpatialAudio" => self.enable_spatial_audio = parse_bool(field, value)?,
            "spatialAudioWidth" => self.spatial_audio_width = parse_f32(field, value)?,
            "customSoundPackDirectory" => self.custom_sound_pack_directory = value.to_string(),
            _ => return Err(SettingsError::UnknownField(field.to_string())),
        }
        self.clamp();
        Ok(())
    }

    /// Reads settings from a preferences file. A missing file or key yields defaults, and
    /// a field that can't be read keeps its default without affecting the others.
    pub fn load(path: &Path) -> Result<AppSettings, SettingsError> {
        let preferences = read_preferences(path)?;
        let mut settings = match preferences.get(SETTINGS_KEY) {
            Some(Value::Object(stored)) => AppSettings::from_fields(path, stored),
            Some(_) => {
                warn!(path = ?path, "Stored settings are not an object, using defaults");
                AppSettings::default()
            }
            None => AppSettings::default(),
        };
        settings.clamp();
        Ok(settings)
    }

    fn from_fields(path: &Path, stored: &Map<String, Value>) -> AppSettings {
        let mut fields = Map::new();
        for (field, value) in stored {
            let single = Map::from_iter([(field.clone(), value.clone())]);
            match serde_json::from_value::<AppSettings>(Value::Object(single)) {
                Ok(_) => {
                    fields.insert(field.clone(), value.clone());
                }
                Err(e) => warn!(
                    path = ?path,
                    field = %field,
                    err = %e,
                    "Unreadable setting, using its default"
                ),
            }
        }
        serde_json::from_value(Value::Object(fields)).unwrap_or_default()
    }

    /// Writes settings into a preferences file, keeping its other keys.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let mut preferences = match read_preferences(path) {
            Ok(preferences) => preferences,
            Err(SettingsError::Json { .. }) => {
                warn!(path = ?path, "Replacing malformed preferences file");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        let value = serde_json::to_value(self).map_err(json_error(path))?;
        preferences.insert(SETTINGS_KEY.to_string(), value);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let staging = path.with_extension("json.tmp");
        let contents =
            serde_json::to_vec_pretty(&Value::Object(preferences)).map_err(json_error(path))?;
        fs::write(&staging, contents).map_err(io_error(&staging))?;
        fs::rename(&staging, path).map_err(io_error(path))?;
        Ok(())
    }
}

fn clamp_or(value: f32, min: f32, max: f32, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

fn parse_f32(field: &str, value: &str) -> Result<f32, SettingsError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(field, value))
}

fn parse_bool(field: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, value)),
    }
}

fn invalid(field: &str, value: &str) -> SettingsError {
    SettingsError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError + '_ {
    move |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> SettingsError + '_ {
    move |source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    }
}

fn read_preferences(path: &Path) -> Result<Map<String, Value>, SettingsError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(io_error(path)(e)),
    };
    match serde_json::from_slice::<Value>(&contents).map_err(json_error(path))? {
        Value::Object(preferences) => Ok(preferences),
        other => Err(json_error(path)(
            <serde_json::Error as serde::de::Error>::custom(format!(
                "expected an object, found {}",
                other
            )),
        )),
    }
}

/// The live settings, shared by the service and persisted in the background.
pub struct SettingsStore {
    path: PathBuf,
    current: Arc<RwLock<AppSettings>>,
    subscribers: Mutex<Vec<Sender<AppSettings>>>,
    writes: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SettingsStore {
    /// Loads settings from the preferences file and starts the writer. Malformed
    /// preferences are replaced by defaults.
    pub fn open(path: &Path, debounce: Duration) -> Result<SettingsStore, SettingsError> {
        let settings = match AppSettings::load(path) {
            Ok(settings) => settings,
            Err(SettingsError::Json { path, source }) => {
                warn!(path = ?path, err = %source, "Malformed preferences, using defaults");
                AppSettings::default()
            }
            Err(e) => return Err(e),
        };
        info!(path = ?path, "Loaded settings");

        let current = Arc::new(RwLock::new(settings));
        let (writes_tx, writes_rx) = crossbeam_channel::unbounded();
        let join = {
            let path = path.to_path_buf();
            let current = current.clone();
            thread::Builder::new()
                .name("keyasmr-settings".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "settings writer");
                    let _enter = span.enter();
                    run_writer(&path, &current, writes_rx, debounce);
                })
                .map_err(SettingsError::Writer)?
        };

        Ok(SettingsStore {
            path: path.to_path_buf(),
            current,
            subscribers: Mutex::new(Vec::new()),
            writes: Some(writes_tx),
            join: Some(join),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current settings.
    pub fn get(&self) -> AppSettings {
        self.current.read().clone()
    }

    /// Receives a copy of the settings after every change.
    pub fn subscribe(&self) -> Receiver<AppSettings> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Changes the settings, notifies subscribers, and schedules a write.
    pub fn update<F>(&self, change: F) -> AppSettings
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut current = self.current.write();
        change(&mut current);
        current.clamp();
        let updated = current.clone();
        self.changed(&updated);
        updated
    }

    /// Sets one field by its stored name, e.g. `masterVolume`, from a string value.
    pub fn update_setting(&self, field: &str, value: &str) -> Result<AppSettings, SettingsError> {
        let mut current = self.current.write();
        let mut candidate = current.clone();
        candidate.set_field(field, value)?;
        *current = candidate.clone();
        debug!(field, value, "Setting changed");
        self.changed(&candidate);
        Ok(candidate)
    }

    /// Writes the current settings immediately.
    pub fn flush(&self) -> Result<(), SettingsError> {
        self.get().save(&self.path)
    }

    /// Notifies subscribers. Callers hold the write lock so snapshots arrive in order.
    fn changed(&self, settings: &AppSettings) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(settings.clone()).is_ok());
        if let Some(writes) = &self.writes {
            if writes.send(()).is_err() {
                warn!("Settings writer is not running");
            }
        }
    }
}

impl Drop for SettingsStore {
    fn drop(&mut self) {
        // Closing the channel makes the writer flush anything pending and exit.
        self.writes.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Settings writer thread panicked");
            }
        }
    }
}

fn run_writer(
    path: &Path,
    current: &RwLock<AppSettings>,
    writes: Receiver<()>,
    debounce: Duration,
) {
    while writes.recv().is_ok() {
        let mut closed = false;
        loop {
            match writes.recv_timeout(debounce) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        let settings = current.read().clone();
        match settings.save(path) {
            Ok(()) => debug!(path = ?path, "Saved settings"),
            Err(e) => error!(err = %e, "Failed to save settings"),
        }
        if closed {
            return;
        }
    }
}
