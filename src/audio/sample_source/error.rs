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
use std::path::PathBuf;

/// Error types for sample decoding.
#[derive(Debug, thiserror::Error)]
pub enum SampleSourceError {
    #[error("unable to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio file {path:?}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("audio file error: {0}")]
    AudioError(#[from] symphonia::core::errors::Error),

    #[error("audio file contains no samples")]
    Empty,
}
