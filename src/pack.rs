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

//! Sound packs: the on-disk bundles that map keys to audio samples.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::keys::{Edge, Keycode};

mod error;
mod format;
pub mod store;

pub use error::PackError;
pub use store::PackStore;

/// File extensions accepted in a pack's sounds directory. Matched case-insensitively.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "m4a", "mp3", "aiff", "ogg"];

/// The suffix every pack bundle directory carries.
pub const BUNDLE_SUFFIX: &str = ".soundpack";

pub const METADATA_FILE: &str = "metadata.json";
pub const MAPPINGS_FILE: &str = "mappings.json";
pub const SOUNDS_DIR: &str = "sounds";

/// Returns true if the path has one of the accepted audio extensions.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// An opaque pack identifier. Usually an 8-4-4-4-12 hex string, but anything is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackId(String);

impl PackId {
    pub fn new(id: impl Into<String>) -> PackId {
        PackId(id.into())
    }

    /// Generates a fresh random identifier in canonical form.
    pub fn generate() -> PackId {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        PackId(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is in 8-4-4-4-12 hex form.
    pub fn is_canonical(&self) -> bool {
        let groups: Vec<&str> = self.0.split('-').collect();
        groups.len() == 5
            && groups
                .iter()
                .zip([8, 4, 4, 4, 12])
                .all(|(group, len)| {
                    group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit())
                })
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackId {
    fn from(id: &str) -> Self {
        PackId(id.to_string())
    }
}

/// Informational sample category. Playback ignores it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCategory {
    #[default]
    KeyPress,
    KeyRelease,
    Spacebar,
    Modifier,
    Function,
    Custom,
}

/// Metadata about one audio file in a pack.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub filename: String,
    /// Declared duration, if known. Informational.
    pub duration: Option<f64>,
    /// Per-sample gain in 0.0..=1.0.
    pub gain: f32,
    pub category: SampleCategory,
}

impl AudioSample {
    pub fn new(filename: impl Into<String>) -> AudioSample {
        AudioSample {
            filename: filename.into(),
            duration: None,
            gain: 1.0,
            category: SampleCategory::default(),
        }
    }
}

/// Per-key sample variants for press and release edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapping {
    press: BTreeMap<Keycode, Vec<String>>,
    release: BTreeMap<Keycode, Vec<String>>,
}

impl KeyMapping {
    pub fn new() -> KeyMapping {
        KeyMapping::default()
    }

    /// Sets a single press and/or release sample for a key. `None` leaves that edge untouched.
    pub fn set_sound(&mut self, key: Keycode, press: Option<&str>, release: Option<&str>) {
        if let Some(press) = press {
            self.press.insert(key, vec![press.to_string()]);
        }
        if let Some(release) = release {
            self.release.insert(key, vec![release.to_string()]);
        }
    }

    /// Sets the same press and/or release sample for every key in a group.
    pub fn set_sounds_for_group(
        &mut self,
        keys: &[Keycode],
        press: Option<&str>,
        release: Option<&str>,
    ) {
        for key in keys {
            self.set_sound(*key, press, release);
        }
    }

    /// Replaces the variants for one edge of a key. An empty list removes the key.
    pub fn set_variants(&mut self, key: Keycode, edge: Edge, variants: Vec<String>) {
        let map = self.map_mut(edge);
        if variants.is_empty() {
            map.remove(&key);
        } else {
            map.insert(key, variants);
        }
    }

    /// Gets the variants for one edge of a key.
    pub fn variants(&self, key: Keycode, edge: Edge) -> Option<&[String]> {
        match edge {
            Edge::Press => self.press_variants(key),
            Edge::Release => self.release_variants(key),
        }
    }

    pub fn press_variants(&self, key: Keycode) -> Option<&[String]> {
        self.press.get(&key).map(Vec::as_slice)
    }

    pub fn release_variants(&self, key: Keycode) -> Option<&[String]> {
        self.release.get(&key).map(Vec::as_slice)
    }

    /// Iterates over the press map in keycode order.
    pub fn press_map(&self) -> impl Iterator<Item = (Keycode, &[String])> {
        self.press.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Iterates over the release map in keycode order.
    pub fn release_map(&self) -> impl Iterator<Item = (Keycode, &[String])> {
        self.release.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Every sample filename mentioned by either map.
    pub fn referenced_files(&self) -> BTreeSet<&str> {
        self.press
            .values()
            .chain(self.release.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Returns the referenced filenames that have no entry in `sounds`.
    pub fn validate_against(&self, sounds: &BTreeMap<String, AudioSample>) -> Vec<String> {
        self.referenced_files()
            .into_iter()
            .filter(|file| !sounds.contains_key(*file))
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.press.is_empty() && self.release.is_empty()
    }

    fn map_mut(&mut self, edge: Edge) -> &mut BTreeMap<Keycode, Vec<String>> {
        match edge {
            Edge::Press => &mut self.press,
            Edge::Release => &mut self.release,
        }
    }
}

/// A sound pack and the bundle it was loaded from.
#[derive(Debug, Clone)]
pub struct SoundPack {
    pub id: PackId,
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub icon_filename: Option<String>,
    /// Samples keyed by filename.
    pub sounds: BTreeMap<String, AudioSample>,
    pub mapping: KeyMapping,
    /// The bundle directory sample filenames are resolved against.
    pub bundle_path: Option<PathBuf>,
}

impl SoundPack {
    /// Creates an empty pack with a fresh id.
    pub fn new(name: &str, author: &str, description: &str, version: &str) -> SoundPack {
        SoundPack {
            id: PackId::generate(),
            name: name.to_string(),
            author: author.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            icon_filename: None,
            sounds: BTreeMap::new(),
            mapping: KeyMapping::new(),
            bundle_path: None,
        }
    }

    /// Adds a sample entry, replacing any with the same filename.
    pub fn add_sample(&mut self, sample: AudioSample) {
        self.sounds.insert(sample.filename.clone(), sample);
    }

    /// Resolves a sample filename to its path inside the bundle.
    pub fn sample_path(&self, filename: &str) -> Option<PathBuf> {
        self.bundle_path
            .as_ref()
            .map(|bundle| bundle.join(SOUNDS_DIR).join(filename))
    }

    /// True if the pack has at least one sample to play.
    pub fn is_playable(&self) -> bool {
        !self.sounds.is_empty()
    }

    /// Gets the gain for a sample, or unity if the sample is unknown.
    pub fn gain(&self, filename: &str) -> f32 {
        self.sounds.get(filename).map_or(1.0, |s| s.gain)
    }

    pub fn summary(&self) -> PackSummary {
        PackSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            author: self.author.clone(),
            version: self.version.clone(),
            sample_count: self.sounds.len(),
            missing_samples: self.mapping.validate_against(&self.sounds),
            path: self.bundle_path.clone(),
        }
    }
}

impl fmt::Display for SoundPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} by {} ({} samples)",
            self.name,
            self.version,
            self.author,
            self.sounds.len()
        )
    }
}

/// A lightweight description of an installed pack, for listings and signals.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSummary {
    pub id: PackId,
    pub name: String,
    pub author: String,
    pub version: String,
    pub sample_count: usize,
    pub missing_samples: Vec<String>,
    pub path: Option<PathBuf>,
}
