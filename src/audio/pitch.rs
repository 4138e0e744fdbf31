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

//! Time-preserving pitch transpose.
//!
//! Two read taps sweep across a short window around the playback position at the
//! transposed rate and are crossfaded with triangular gains, so the output has the
//! shifted pitch while taking exactly as many frames as the source.

use crate::samples::LoadedSample;

/// Largest transposition in either direction, in cents.
pub const MAX_CENTS: f32 = 1200.0;

/// Length of the crossfade window.
const WINDOW_SECONDS: f64 = 0.030;

pub struct PitchTransposer {
    window: f64,
    cents: f32,
    ratio: f64,
    phase: f64,
}

impl PitchTransposer {
    pub fn new(sample_rate: u32) -> PitchTransposer {
        PitchTransposer {
            window: (WINDOW_SECONDS * sample_rate as f64).max(2.0),
            cents: 0.0,
            ratio: 1.0,
            phase: 0.5,
        }
    }

    /// Sets the transposition for the next shot. Zero bypasses the transposer.
    pub fn set_cents(&mut self, cents: f32) {
        let cents = if cents.is_finite() {
            cents.clamp(-MAX_CENTS, MAX_CENTS)
        } else {
            0.0
        };
        self.cents = cents;
        self.ratio = 2f64.powf(cents as f64 / 1200.0);
        self.phase = 0.5;
    }

    pub fn cents(&self) -> f32 {
        self.cents
    }

    pub fn is_bypassed(&self) -> bool {
        self.cents == 0.0
    }

    /// Renders the output frame at `position` frames into the shot. Must be called
    /// once per frame in order.
    pub fn frame(&mut self, sample: &LoadedSample, position: usize) -> (f32, f32) {
        if self.is_bypassed() {
            return sample.frame(position);
        }

        let t = position as f64;
        let phase_a = self.phase;
        let phase_b = (self.phase + 0.5).fract();
        let (la, ra) = sample.frame_at(t + (phase_a - 0.5) * self.window);
        let (lb, rb) = sample.frame_at(t + (phase_b - 0.5) * self.window);
        let gain_a = tap_gain(phase_a);
        let gain_b = tap_gain(phase_b);

        self.phase = (self.phase + (self.ratio - 1.0) / self.window).rem_euclid(1.0);

        (la * gain_a + lb * gain_b, ra * gain_a + rb * gain_b)
    }
}

/// Triangular crossfade. The two taps are half a cycle apart so their gains sum to one.
fn tap_gain(phase: f64) -> f32 {
    (1.0 - (2.0 * phase - 1.0).abs()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frequency: f64, sample_rate: u32, frames: usize) -> LoadedSample {
        let mut data = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let v = (2.0 * std::f64::consts::PI * frequency * i as f64 / sample_rate as f64)
                .sin() as f32;
            data.push(v);
            data.push(v);
        }
        LoadedSample::from_stereo(data)
    }

    /// Counts rising zero crossings of the left channel.
    fn rising_crossings(frames: &[(f32, f32)]) -> usize {
        frames
            .windows(2)
            .filter(|pair| pair[0].0 < 0.0 && pair[1].0 >= 0.0)
            .count()
    }

    #[test]
    fn test_bypass_is_exact() {
        let sample = tone(440.0, 48000, 100);
        let mut transposer = PitchTransposer::new(48000);
        transposer.set_cents(0.0);
        assert!(transposer.is_bypassed());
        for i in 0..100 {
            assert_eq!(transposer.frame(&sample, i), sample.frame(i));
        }
    }

    #[test]
    fn test_clamps_to_an_octave() {
        let mut transposer = PitchTransposer::new(48000);
        transposer.set_cents(5000.0);
        assert_eq!(transposer.cents(), MAX_CENTS);
        transposer.set_cents(-5000.0);
        assert_eq!(transposer.cents(), -MAX_CENTS);
        transposer.set_cents(f32::NAN);
        assert!(transposer.is_bypassed());
    }

    #[test]
    fn test_constant_signal_keeps_level() {
        let sample = LoadedSample::from_stereo(vec![0.5; 48000 * 2]);
        let mut transposer = PitchTransposer::new(48000);
        transposer.set_cents(700.0);
        // Away from the edges both taps read inside the buffer and the gains sum to one.
        for i in 0..24000 {
            let (l, r) = transposer.frame(&sample, i);
            if i > 2000 {
                assert!((l - 0.5).abs() < 1e-3, "frame {i} was {l}");
                assert!((r - 0.5).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_octave_up_doubles_pitch() {
        let sample_rate = 48000;
        let frames = sample_rate as usize;
        let sample = tone(200.0, sample_rate, frames);

        let mut transposer = PitchTransposer::new(sample_rate);
        transposer.set_cents(1200.0);
        let output: Vec<(f32, f32)> = (0..frames).map(|i| transposer.frame(&sample, i)).collect();
        let original: Vec<(f32, f32)> = (0..frames).map(|i| sample.frame(i)).collect();

        // Same duration, roughly twice the cycles. Splice points add a little slop.
        assert_eq!(output.len(), original.len());
        let shifted = rising_crossings(&output) as f64;
        let base = rising_crossings(&original) as f64;
        assert!(
            (shifted / base - 2.0).abs() < 0.15,
            "expected about twice {base} crossings, got {shifted}"
        );
    }
}
