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

//! Keyboard sounds for every key press and release.
//!
//! Raw events from a global key hook ([`input`]) are collapsed into clean edges, mapped
//! to samples of the bound sound pack ([`pack`], [`samples`]) by the [`dispatcher`], and
//! played through a polyphonic [`audio`] graph with per-shot pitch and pan. The
//! [`service`] ties the pieces together under persisted user [`settings`].

pub mod audio;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod input;
pub mod keys;
pub mod pack;
pub mod samples;
pub mod service;
pub mod settings;
pub mod util;

#[cfg(test)]
pub mod testutil;
