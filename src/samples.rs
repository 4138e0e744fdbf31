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

//! Pack sample decoding and caching.
//!
//! This module provides:
//! - Decoding of sample files into in-memory PCM at the output rate
//! - The sample bank handed to the audio graph when a pack is bound
//! - A background binder that decodes packs off the dispatcher thread

use std::collections::HashMap;

mod binder;
mod loader;

pub use binder::{PackBinder, PackReady};
pub use loader::{LoadedSample, SampleLoader};

/// A decoded sample and the gain declared for it by the pack.
#[derive(Debug, Clone)]
pub struct BankEntry {
    pub filename: String,
    pub sample: LoadedSample,
    pub gain: f32,
}

/// The decoded samples of one pack, indexed by filename. Immutable once built.
#[derive(Debug, Default)]
pub struct SampleBank {
    entries: Vec<BankEntry>,
    index: HashMap<String, usize>,
    sample_rate: u32,
}

impl SampleBank {
    pub fn new(sample_rate: u32) -> SampleBank {
        SampleBank {
            entries: Vec::new(),
            index: HashMap::new(),
            sample_rate,
        }
    }

    /// Adds a sample. A second sample with the same filename replaces the first.
    pub fn insert(&mut self, filename: &str, sample: LoadedSample, gain: f32) {
        let entry = BankEntry {
            filename: filename.to_string(),
            sample,
            gain,
        };
        match self.index.get(filename) {
            Some(position) => self.entries[*position] = entry,
            None => {
                self.index.insert(filename.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Looks up a sample by filename, returning its position in the bank.
    pub fn position(&self, filename: &str) -> Option<usize> {
        self.index.get(filename).copied()
    }

    pub fn get(&self, filename: &str) -> Option<&BankEntry> {
        self.position(filename).map(|position| &self.entries[position])
    }

    pub fn entry(&self, position: usize) -> Option<&BankEntry> {
        self.entries.get(position)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.index.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total bytes of PCM held by the bank.
    pub fn memory_size(&self) -> usize {
        self.entries.iter().map(|e| e.sample.memory_size()).sum()
    }
}
