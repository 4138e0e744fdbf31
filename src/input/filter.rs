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

//! Collapses auto-repeat and modifier flag changes into clean press/release edges.

use std::collections::HashSet;

use tracing::trace;

use super::{RawKeyEvent, RawKind};
use crate::keys::{KeyEdge, Keycode};

/// Tracks which keys are held and turns raw hook events into edges.
#[derive(Debug, Default)]
pub struct KeyEdgeFilter {
    pressed: HashSet<Keycode>,
}

impl KeyEdgeFilter {
    pub fn new() -> KeyEdgeFilter {
        KeyEdgeFilter::default()
    }

    /// Processes a raw event, returning the edge it produces, if any.
    pub fn process(&mut self, event: RawKeyEvent) -> Option<KeyEdge> {
        let edge = match event.kind {
            RawKind::KeyDown => {
                if event.is_autorepeat || !self.pressed.insert(event.key) {
                    None
                } else {
                    Some(KeyEdge::press(event.key))
                }
            }
            RawKind::KeyUp => {
                self.pressed.remove(&event.key);
                Some(KeyEdge::release(event.key))
            }
            RawKind::FlagsChanged => {
                if self.pressed.remove(&event.key) {
                    Some(KeyEdge::release(event.key))
                } else {
                    self.pressed.insert(event.key);
                    Some(KeyEdge::press(event.key))
                }
            }
        };

        if edge.is_none() {
            trace!(key = event.key, "Dropped repeated key down");
        }
        edge
    }

    /// Returns true if the key is currently held.
    pub fn is_pressed(&self, key: Keycode) -> bool {
        self.pressed.contains(&key)
    }

    /// Number of keys currently held.
    pub fn pressed_count(&self) -> usize {
        self.pressed.len()
    }

    /// Forgets every held key. No synthetic releases are produced.
    pub fn clear(&mut self) {
        self.pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Edge;

    fn run(filter: &mut KeyEdgeFilter, events: &[RawKeyEvent]) -> Vec<KeyEdge> {
        events.iter().filter_map(|e| filter.process(*e)).collect()
    }

    #[test]
    fn test_auto_repeat_suppression() {
        let mut filter = KeyEdgeFilter::new();
        let mut events = vec![RawKeyEvent::down(0)];
        events.extend(std::iter::repeat(RawKeyEvent::repeat(0)).take(10));
        events.push(RawKeyEvent::up(0));

        assert_eq!(
            run(&mut filter, &events),
            vec![KeyEdge::press(0), KeyEdge::release(0)]
        );
        assert_eq!(filter.pressed_count(), 0);
    }

    #[test]
    fn test_duplicate_key_down_dropped() {
        let mut filter = KeyEdgeFilter::new();
        let edges = run(
            &mut filter,
            &[
                RawKeyEvent::down(12),
                RawKeyEvent::down(12),
                RawKeyEvent::down(12),
            ],
        );
        assert_eq!(edges, vec![KeyEdge::press(12)]);
        assert!(filter.is_pressed(12));
    }

    #[test]
    fn test_key_up_always_emits() {
        let mut filter = KeyEdgeFilter::new();
        // A release for a key we never saw go down still produces a release.
        let edges = run(&mut filter, &[RawKeyEvent::up(3), RawKeyEvent::up(3)]);
        assert_eq!(edges, vec![KeyEdge::release(3), KeyEdge::release(3)]);
        assert_eq!(filter.pressed_count(), 0);
    }

    #[test]
    fn test_modifier_flag_edges() {
        let mut filter = KeyEdgeFilter::new();
        let edges = run(
            &mut filter,
            &[RawKeyEvent::flags_changed(56), RawKeyEvent::flags_changed(56)],
        );
        assert_eq!(edges, vec![KeyEdge::press(56), KeyEdge::release(56)]);
    }

    #[test]
    fn test_pressed_set_bounded_per_key() {
        let mut filter = KeyEdgeFilter::new();
        let events = [
            RawKeyEvent::down(5),
            RawKeyEvent::repeat(5),
            RawKeyEvent::down(5),
            RawKeyEvent::up(5),
            RawKeyEvent::down(5),
            RawKeyEvent::flags_changed(5),
            RawKeyEvent::flags_changed(5),
            RawKeyEvent::up(5),
            RawKeyEvent::up(5),
        ];

        let mut presses = 0;
        for event in events {
            if let Some(edge) = filter.process(event) {
                if edge.edge == Edge::Press {
                    presses += 1;
                }
            }
            assert!(filter.pressed_count() <= 1);
        }
        assert_eq!(presses, 3);
    }

    #[test]
    fn test_clear_forgets_keys_without_releases() {
        let mut filter = KeyEdgeFilter::new();
        run(&mut filter, &[RawKeyEvent::down(1), RawKeyEvent::down(2)]);
        assert_eq!(filter.pressed_count(), 2);

        filter.clear();
        assert_eq!(filter.pressed_count(), 0);

        // After a clear the same key produces a fresh press.
        assert_eq!(
            filter.process(RawKeyEvent::down(1)),
            Some(KeyEdge::press(1))
        );
    }
}
