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
use std::path::PathBuf;

/// Errors raised while reading, writing, or changing user settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("preferences I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed preferences at {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown setting {0:?}")]
    UnknownField(String),

    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: String, value: String },

    #[error("unable to start settings writer: {0}")]
    Writer(io::Error),
}
