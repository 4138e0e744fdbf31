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
use std::io;
use std::path::{Path, PathBuf};

use super::PackId;

/// Errors raised by the pack store.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("unable to parse pack at {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("pack I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no sound pack with id {0}")]
    NotFound(PackId),

    #[error("mapping references samples that are not in the pack: {}", .0.join(", "))]
    MissingSamples(Vec<String>),
}

impl PackError {
    pub(super) fn parse(path: &Path, reason: impl ToString) -> PackError {
        PackError::Parse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Returns a closure that wraps an I/O error with the path it happened on.
    pub(super) fn io(path: &Path) -> impl FnOnce(io::Error) -> PackError + '_ {
        move |source| PackError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
