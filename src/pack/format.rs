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

//! JSON representations of `metadata.json` and `mappings.json`.
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{KeyMapping, SoundPack};
use crate::keys::{Edge, Keycode};

/// The contents of `metadata.json`.
#[derive(Deserialize, Serialize, Debug)]
pub(super) struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    #[serde(
        default,
        rename = "iconFilename",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon_filename: Option<String>,
}

impl Metadata {
    pub fn from_pack(pack: &SoundPack) -> Metadata {
        Metadata {
            id: Some(pack.id.to_string()),
            name: pack.name.clone(),
            author: pack.author.clone(),
            description: pack.description.clone(),
            version: pack.version.clone(),
            icon_filename: pack.icon_filename.clone(),
        }
    }
}

/// The contents of `mappings.json`. Keycodes are decimal strings.
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(super) struct Mappings {
    pub press_map: BTreeMap<String, Vec<String>>,
    pub release_map: BTreeMap<String, Vec<String>>,
}

impl Mappings {
    pub fn from_mapping(mapping: &KeyMapping) -> Mappings {
        Mappings {
            press_map: to_json(mapping.press_map()),
            release_map: to_json(mapping.release_map()),
        }
    }

    /// Converts into a key mapping. Entries with a non-numeric keycode or an empty variant
    /// list are skipped.
    pub fn into_mapping(self, path: &Path) -> KeyMapping {
        let mut mapping = KeyMapping::new();
        for (edge, entries) in [(Edge::Press, self.press_map), (Edge::Release, self.release_map)] {
            for (key, files) in entries {
                match key.trim().parse::<Keycode>() {
                    Ok(key) if !files.is_empty() => mapping.set_variants(key, edge, files),
                    Ok(key) => warn!(path = ?path, key, %edge, "Ignoring empty variant list."),
                    Err(_) => warn!(path = ?path, key, %edge, "Ignoring non-numeric keycode."),
                }
            }
        }
        mapping
    }
}

fn to_json<'a>(
    entries: impl Iterator<Item = (Keycode, &'a [String])>,
) -> BTreeMap<String, Vec<String>> {
    entries
        .map(|(key, files)| (key.to_string(), files.to_vec()))
        .collect()
}
