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

/// Errors from audio output devices.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio device found with name {0}")]
    NotFound(String),

    #[error("no default output device")]
    NoDefaultDevice,

    #[error("device error: {0}")]
    Device(String),

    #[error("unsupported output sample format {0}")]
    UnsupportedFormat(String),

    #[error("unable to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("unable to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output has already been started")]
    AlreadyStarted,

    #[error("audio graph has been stopped")]
    Stopped,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
