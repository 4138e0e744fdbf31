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
use std::path::{Path, PathBuf};
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

mod audio;
mod error;

pub use audio::Audio;
pub use error::ConfigError;

/// Prefix for environment overrides, e.g. KEYASMR_AUDIO__DEVICE=mock.
const ENV_PREFIX: &str = "KEYASMR";
const DEFAULT_SETTINGS_DEBOUNCE: &str = "500ms";
const DEFAULT_KEY_SOURCE: &str = "default";

/// The service configuration, read from an optional YAML file with environment overrides.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// Output device settings.
    #[serde(default)]
    audio: Audio,

    /// How long settings must be quiet before they're written (default: 500ms).
    settings_debounce: Option<String>,

    /// Default packs directory. The user's custom directory takes precedence.
    packs_dir: Option<PathBuf>,

    /// Where user preferences are stored.
    preferences_file: Option<PathBuf>,

    /// The key source. Names starting with "mock" select the mock source.
    key_source: Option<String>,
}

impl Config {
    /// Creates a configuration without reading any file.
    pub fn new(
        audio: Audio,
        packs_dir: Option<PathBuf>,
        preferences_file: Option<PathBuf>,
    ) -> Config {
        Config {
            audio,
            packs_dir,
            preferences_file,
            ..Default::default()
        }
    }

    /// Loads the configuration. A missing path yields defaults plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        Ok(builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Returns the settings write debounce.
    pub fn settings_debounce(&self) -> Result<Duration, ConfigError> {
        let value = self
            .settings_debounce
            .as_deref()
            .unwrap_or(DEFAULT_SETTINGS_DEBOUNCE);
        DurationString::from_string(value.to_string())
            .map(Duration::from)
            .map_err(|e| ConfigError::Duration {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns the key source name (default: the platform hook).
    pub fn key_source(&self) -> &str {
        self.key_source.as_deref().unwrap_or(DEFAULT_KEY_SOURCE)
    }

    pub fn packs_dir(&self) -> Option<&Path> {
        self.packs_dir.as_deref()
    }

    /// Returns the preferences file, defaulting to the platform's config directory.
    pub fn preferences_file(&self) -> PathBuf {
        match &self.preferences_file {
            Some(path) => path.clone(),
            None => crate::settings::default_preferences_file(),
        }
    }
}
