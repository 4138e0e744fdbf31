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

//! Translation from Linux input event codes to virtual-key numbering.

use crate::keys::Keycode;

/// Codes with no virtual-key equivalent are offset into this range so they stay unique
/// and never collide with a mapped key.
const UNMAPPED_BASE: Keycode = 0x1000;

/// (linux input code, virtual keycode)
const TABLE: &[(u16, Keycode)] = &[
    (1, 53),   // Esc
    (2, 18),   // 1
    (3, 19),   // 2
    (4, 20),   // 3
    (5, 21),   // 4
    (6, 23),   // 5
    (7, 22),   // 6
    (8, 26),   // 7
    (9, 28),   // 8
    (10, 25),  // 9
    (11, 29),  // 0
    (12, 27),  // Minus
    (13, 24),  // Equal
    (14, 51),  // Backspace
    (15, 48),  // Tab
    (16, 12),  // Q
    (17, 13),  // W
    (18, 14),  // E
    (19, 15),  // R
    (20, 17),  // T
    (21, 16),  // Y
    (22, 32),  // U
    (23, 34),  // I
    (24, 31),  // O
    (25, 35),  // P
    (26, 33),  // [
    (27, 30),  // ]
    (28, 36),  // Enter
    (29, 59),  // Left Control
    (30, 0),   // A
    (31, 1),   // S
    (32, 2),   // D
    (33, 3),   // F
    (34, 5),   // G
    (35, 4),   // H
    (36, 38),  // J
    (37, 40),  // K
    (38, 37),  // L
    (39, 41),  // ;
    (40, 39),  // '
    (41, 50),  // `
    (42, 56),  // Left Shift
    (43, 42),  // Backslash
    (44, 6),   // Z
    (45, 7),   // X
    (46, 8),   // C
    (47, 9),   // V
    (48, 11),  // B
    (49, 45),  // N
    (50, 46),  // M
    (51, 43),  // ,
    (52, 47),  // .
    (53, 44),  // /
    (54, 60),  // Right Shift
    (55, 67),  // Keypad *
    (56, 58),  // Left Alt
    (57, 49),  // Space
    (58, 57),  // Caps Lock
    (59, 122), // F1
    (60, 120), // F2
    (61, 99),  // F3
    (62, 118), // F4
    (63, 96),  // F5
    (64, 97),  // F6
    (65, 98),  // F7
    (66, 100), // F8
    (67, 101), // F9
    (68, 109), // F10
    (69, 71),  // Num Lock
    (71, 89),  // Keypad 7
    (72, 91),  // Keypad 8
    (73, 92),  // Keypad 9
    (74, 78),  // Keypad -
    (75, 86),  // Keypad 4
    (76, 87),  // Keypad 5
    (77, 88),  // Keypad 6
    (78, 69),  // Keypad +
    (79, 83),  // Keypad 1
    (80, 84),  // Keypad 2
    (81, 85),  // Keypad 3
    (82, 82),  // Keypad 0
    (83, 65),  // Keypad .
    (87, 103), // F11
    (88, 111), // F12
    (96, 76),  // Keypad Enter
    (97, 62),  // Right Control
    (98, 75),  // Keypad /
    (100, 61), // Right Alt
    (102, 115), // Home
    (103, 126), // Up
    (104, 116), // Page Up
    (105, 123), // Left
    (106, 124), // Right
    (107, 119), // End
    (108, 125), // Down
    (109, 121), // Page Down
    (110, 114), // Insert
    (111, 117), // Delete
    (117, 81),  // Keypad =
    (125, 55),  // Left Meta
    (126, 54),  // Right Meta
    (464, 63),  // Fn
];

/// Translates a Linux input event code into a virtual keycode.
pub fn to_virtual(code: u16) -> Keycode {
    TABLE
        .iter()
        .find(|(linux, _)| *linux == code)
        .map(|(_, virt)| *virt)
        .unwrap_or(UNMAPPED_BASE.saturating_add(code))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::keys::{FUNCTION_KEYS, MODIFIER_KEYS, SPACEBAR_KEY};

    #[test]
    fn test_known_codes() {
        assert_eq!(to_virtual(30), 0);
        assert_eq!(to_virtual(57), SPACEBAR_KEY);
        assert_eq!(to_virtual(42), 56);
        assert_eq!(to_virtual(59), 122);
    }

    #[test]
    fn test_unmapped_codes_are_offset() {
        assert_eq!(to_virtual(0x2ff), 0x1000 + 0x2ff);
    }

    #[test]
    fn test_table_is_injective() {
        let mut seen = HashSet::new();
        for (_, virt) in TABLE {
            assert!(seen.insert(*virt), "{} mapped twice", virt);
        }
    }

    #[test]
    fn test_groups_reachable() {
        let mapped: HashSet<Keycode> = TABLE.iter().map(|(_, v)| *v).collect();
        for key in MODIFIER_KEYS.iter().chain(FUNCTION_KEYS.iter()) {
            assert!(mapped.contains(key), "{} is not reachable", key);
        }
    }
}
