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

//! Keycodes and the key groups that sound packs refer to.
//!
//! Keycodes use the host virtual-key numbering that the pack format was defined
//! against. These values are persisted in `mappings.json` and must never be
//! renumbered.

use std::fmt;

/// A physical key, in virtual-key numbering.
pub type Keycode = u16;

/// Modifier keys: shift, option, control, command (left and right), caps lock and fn.
pub const MODIFIER_KEYS: [Keycode; 10] = [
    56, // Left Shift
    60, // Right Shift
    58, // Left Option
    61, // Right Option
    59, // Left Control
    62, // Right Control
    55, // Left Command
    54, // Right Command
    57, // Caps Lock
    63, // Fn
];

/// Function keys F1 through F12.
pub const FUNCTION_KEYS: [Keycode; 12] = [
    122, // F1
    120, // F2
    99,  // F3
    118, // F4
    96,  // F5
    97,  // F6
    98,  // F7
    100, // F8
    101, // F9
    109, // F10
    103, // F11
    111, // F12
];

/// The spacebar.
pub const SPACEBAR_KEY: Keycode = 49;

/// Returns true if the key is one of the modifier keys.
pub fn is_modifier(key: Keycode) -> bool {
    MODIFIER_KEYS.contains(&key)
}

/// Returns true if the key is one of the function keys.
pub fn is_function(key: Keycode) -> bool {
    FUNCTION_KEYS.contains(&key)
}

/// A clean key transition after auto-repeat and modifier-flag normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Press,
    Release,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Press => write!(f, "press"),
            Edge::Release => write!(f, "release"),
        }
    }
}

/// A filtered key edge, as consumed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEdge {
    pub key: Keycode,
    pub edge: Edge,
}

impl KeyEdge {
    pub fn press(key: Keycode) -> KeyEdge {
        KeyEdge {
            key,
            edge: Edge::Press,
        }
    }

    pub fn release(key: Keycode) -> KeyEdge {
        KeyEdge {
            key,
            edge: Edge::Release,
        }
    }
}
