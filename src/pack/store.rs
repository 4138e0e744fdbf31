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

//! Enumerates, parses and persists pack bundles in the packs directory.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::format::{Mappings, Metadata};
use super::{
    is_audio_file, AudioSample, PackError, PackId, SoundPack, BUNDLE_SUFFIX, MAPPINGS_FILE,
    METADATA_FILE, SOUNDS_DIR,
};
use crate::util::{copy_dir_all, filename_display};

/// The pack store, rooted at a packs directory.
#[derive(Debug, Clone)]
pub struct PackStore {
    dir: PathBuf,
}

impl PackStore {
    /// Opens the store, creating the packs directory if it's missing.
    pub fn open(dir: &Path) -> Result<PackStore, PackError> {
        fs::create_dir_all(dir).map_err(PackError::io(dir))?;
        Ok(PackStore {
            dir: dir.to_path_buf(),
        })
    }

    /// The platform default packs directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("KeyboardASMR")
            .join("SoundPacks")
    }

    /// Picks the packs directory: a non-empty, existing custom override first, then the
    /// configured directory, then the platform default.
    pub fn resolve_dir(custom: &str, configured: Option<&Path>) -> PathBuf {
        let custom = custom.trim();
        if !custom.is_empty() {
            let custom = PathBuf::from(custom);
            if custom.is_dir() {
                return custom;
            }
            warn!(dir = ?custom, "Custom sound pack directory does not exist, ignoring it.");
        }

        configured
            .map(Path::to_path_buf)
            .unwrap_or_else(PackStore::default_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns every parseable pack. Unparseable bundles are logged and skipped. When two
    /// bundles share an id, the most recently written one wins.
    pub fn enumerate(&self) -> Vec<SoundPack> {
        let mut bundles = match self.bundle_dirs() {
            Ok(bundles) => bundles,
            Err(e) => {
                warn!(dir = ?self.dir, err = %e, "Unable to read sound packs directory.");
                return Vec::new();
            }
        };
        bundles.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut packs: HashMap<PackId, SoundPack> = HashMap::new();
        for (path, _) in bundles {
            match PackStore::load(&path) {
                Ok(pack) => {
                    debug!(path = ?path, pack = %pack, "Loaded sound pack.");
                    if let Some(previous) = packs.insert(pack.id.clone(), pack) {
                        warn!(
                            id = %previous.id,
                            replaced = ?previous.bundle_path,
                            "Duplicate pack id, keeping the most recently written bundle."
                        );
                    }
                }
                Err(e) => warn!(path = ?path, err = %e, "Skipping unparseable sound pack."),
            }
        }

        let mut packs: Vec<SoundPack> = packs.into_values().collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        info!(dir = ?self.dir, count = packs.len(), "Scanned sound packs.");
        packs
    }

    /// Finds an installed pack by id.
    pub fn find(&self, id: &PackId) -> Result<SoundPack, PackError> {
        self.enumerate()
            .into_iter()
            .find(|pack| pack.id == *id)
            .ok_or_else(|| PackError::NotFound(id.clone()))
    }

    /// Loads a single bundle directory.
    pub fn load(dir: &Path) -> Result<SoundPack, PackError> {
        let metadata: Metadata = read_json(&dir.join(METADATA_FILE))?;
        let mappings: Mappings = read_json(&dir.join(MAPPINGS_FILE))?;

        let id = metadata
            .id
            .filter(|id| !id.trim().is_empty())
            .map(PackId::new)
            .unwrap_or_else(|| PackId::new(bundle_stem(dir)));

        let pack = SoundPack {
            id,
            name: metadata.name,
            author: metadata.author,
            description: metadata.description,
            version: metadata.version,
            icon_filename: metadata.icon_filename,
            sounds: scan_sounds(&dir.join(SOUNDS_DIR))?,
            mapping: mappings.into_mapping(dir),
            bundle_path: Some(dir.to_path_buf()),
        };

        let missing = pack.mapping.validate_against(&pack.sounds);
        if !missing.is_empty() {
            warn!(
                pack = pack.name,
                ?missing,
                "Mapping references samples that are not in the pack."
            );
        }
        Ok(pack)
    }

    /// Writes the pack to `<packs_dir>/<id>.soundpack`, replacing any existing bundle. The
    /// bundle is staged in a temporary directory and renamed into place.
    pub fn save(&self, pack: &SoundPack) -> Result<PathBuf, PackError> {
        let missing = pack.mapping.validate_against(&pack.sounds);
        if !missing.is_empty() {
            return Err(PackError::MissingSamples(missing));
        }

        let dest = self.dir.join(format!("{}{}", pack.id, BUNDLE_SUFFIX));
        let staging = self.staging_path(&dest);
        let result = write_bundle(pack, &staging).and_then(|_| replace_dir(&staging, &dest));
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        result?;

        info!(pack = pack.name, path = ?dest, "Saved sound pack.");
        Ok(dest)
    }

    /// Deletes every bundle carrying the given id.
    pub fn delete(&self, id: &PackId) -> Result<(), PackError> {
        let mut removed = 0;
        for (path, _) in self.bundle_dirs()? {
            if read_id(&path).as_ref() == Some(id) {
                fs::remove_dir_all(&path).map_err(PackError::io(&path))?;
                info!(id = %id, path = ?path, "Deleted sound pack.");
                removed += 1;
            }
        }

        if removed == 0 {
            return Err(PackError::NotFound(id.clone()));
        }
        Ok(())
    }

    /// Copies an external bundle into the packs directory, replacing a bundle of the same
    /// name. Returns the installed path.
    pub fn import(&self, src: &Path) -> Result<PathBuf, PackError> {
        if !PackStore::validate(src) {
            return Err(PackError::parse(
                src,
                "not a sound pack bundle (needs metadata.json, mappings.json and sounds/)",
            ));
        }
        let pack = PackStore::load(src)?;

        let mut name = filename_display(src).to_string();
        if !name.ends_with(BUNDLE_SUFFIX) {
            name.push_str(BUNDLE_SUFFIX);
        }
        let dest = self.dir.join(name);
        let staging = self.staging_path(&dest);
        let result = copy_dir_all(src, &staging)
            .map_err(PackError::io(src))
            .and_then(|_| replace_dir(&staging, &dest));
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        result?;

        info!(pack = pack.name, path = ?dest, "Imported sound pack.");
        Ok(dest)
    }

    /// Copies a pack's bundle to `dest`. If `dest` ends in `.soundpack` it names the
    /// bundle itself, otherwise it's the directory to export into.
    pub fn export(&self, pack: &SoundPack, dest: &Path) -> Result<PathBuf, PackError> {
        let Some(bundle) = pack.bundle_path.as_deref() else {
            return Err(PackError::NotFound(pack.id.clone()));
        };

        let target = if filename_display(dest).ends_with(BUNDLE_SUFFIX) {
            dest.to_path_buf()
        } else {
            fs::create_dir_all(dest).map_err(PackError::io(dest))?;
            dest.join(filename_display(bundle))
        };

        if target.exists() {
            fs::remove_dir_all(&target).map_err(PackError::io(&target))?;
        }
        copy_dir_all(bundle, &target).map_err(PackError::io(&target))?;

        info!(pack = pack.name, path = ?target, "Exported sound pack.");
        Ok(target)
    }

    /// True if the directory has both JSON files and a sounds directory.
    pub fn validate(dir: &Path) -> bool {
        let has_metadata = dir.join(METADATA_FILE).is_file();
        let has_mappings = dir.join(MAPPINGS_FILE).is_file();
        let has_sounds = dir.join(SOUNDS_DIR).is_dir();

        if !has_metadata {
            debug!(dir = ?dir, "Missing metadata.json");
        }
        if !has_mappings {
            debug!(dir = ?dir, "Missing mappings.json");
        }
        if !has_sounds {
            debug!(dir = ?dir, "Missing sounds directory");
        }
        has_metadata && has_mappings && has_sounds
    }

    /// Number of bundle directories, parseable or not.
    pub fn count(&self) -> usize {
        self.bundle_dirs().map_or(0, |bundles| bundles.len())
    }

    /// Lists the bundle directories with their last write time.
    fn bundle_dirs(&self) -> Result<Vec<(PathBuf, SystemTime)>, PackError> {
        let mut bundles = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(PackError::io(&self.dir))? {
            let path = entry.map_err(PackError::io(&self.dir))?.path();
            if !path.is_dir() || !filename_display(&path).ends_with(BUNDLE_SUFFIX) {
                continue;
            }
            let modified = fs::metadata(path.join(METADATA_FILE))
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            bundles.push((path, modified));
        }
        Ok(bundles)
    }

    fn staging_path(&self, dest: &Path) -> PathBuf {
        self.dir.join(format!(
            ".{}.tmp-{:08x}",
            filename_display(dest),
            rand::random::<u32>()
        ))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PackError> {
    let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PackError::parse(path, "file not found"),
        _ => PackError::io(path)(e),
    })?;
    serde_json::from_str(&contents).map_err(|e| PackError::parse(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PackError> {
    let contents = serde_json::to_string_pretty(value).map_err(|e| PackError::parse(path, e))?;
    fs::write(path, contents).map_err(PackError::io(path))
}

/// Reads just the id of a bundle, if it parses.
fn read_id(dir: &Path) -> Option<PackId> {
    let metadata: Metadata = read_json(&dir.join(METADATA_FILE)).ok()?;
    Some(
        metadata
            .id
            .filter(|id| !id.trim().is_empty())
            .map(PackId::new)
            .unwrap_or_else(|| PackId::new(bundle_stem(dir))),
    )
}

fn bundle_stem(dir: &Path) -> String {
    let name = filename_display(dir);
    name.strip_suffix(BUNDLE_SUFFIX).unwrap_or(name).to_string()
}

/// Lists the audio files in a sounds directory. A missing directory yields no samples.
fn scan_sounds(dir: &Path) -> Result<BTreeMap<String, AudioSample>, PackError> {
    let mut sounds = BTreeMap::new();
    if !dir.is_dir() {
        warn!(dir = ?dir, "Sounds directory not found.");
        return Ok(sounds);
    }

    for entry in fs::read_dir(dir).map_err(PackError::io(dir))? {
        let path = entry.map_err(PackError::io(dir))?.path();
        if path.is_file() && is_audio_file(&path) {
            let filename = filename_display(&path).to_string();
            sounds.insert(filename.clone(), AudioSample::new(filename));
        }
    }
    Ok(sounds)
}

fn write_bundle(pack: &SoundPack, staging: &Path) -> Result<(), PackError> {
    let sounds_dir = staging.join(SOUNDS_DIR);
    fs::create_dir_all(&sounds_dir).map_err(PackError::io(&sounds_dir))?;
    write_json(&staging.join(METADATA_FILE), &Metadata::from_pack(pack))?;
    write_json(
        &staging.join(MAPPINGS_FILE),
        &Mappings::from_mapping(&pack.mapping),
    )?;

    let Some(bundle) = pack.bundle_path.as_deref() else {
        return Ok(());
    };
    for filename in pack.sounds.keys() {
        let src = bundle.join(SOUNDS_DIR).join(filename);
        if src.is_file() {
            fs::copy(&src, sounds_dir.join(filename)).map_err(PackError::io(&src))?;
        }
    }
    if let Some(icon) = &pack.icon_filename {
        let src = bundle.join(icon);
        if src.is_file() {
            fs::copy(&src, staging.join(icon)).map_err(PackError::io(&src))?;
        }
    }
    Ok(())
}

/// Moves `staging` to `dest`, swapping out any existing directory at `dest`.
fn replace_dir(staging: &Path, dest: &Path) -> Result<(), PackError> {
    if !dest.exists() {
        return fs::rename(staging, dest).map_err(PackError::io(dest));
    }

    let backup = staging.with_extension("old");
    fs::rename(dest, &backup).map_err(PackError::io(dest))?;
    if let Err(e) = fs::rename(staging, dest) {
        let _ = fs::rename(&backup, dest);
        return Err(PackError::io(dest)(e));
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        warn!(path = ?backup, err = %e, "Unable to remove replaced bundle.");
    }
    Ok(())
}
