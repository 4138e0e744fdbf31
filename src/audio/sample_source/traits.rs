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
use std::time::Duration;

use super::error::SampleSourceError;

/// A source of decoded audio in interleaved f32 form.
pub trait SampleSource: Send {
    /// Decodes the next block of interleaved samples. Returns `Ok(None)` at the end of
    /// the stream. Blocks always hold whole frames.
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, SampleSourceError>;

    /// Get the number of channels in this source
    fn channel_count(&self) -> u16;

    /// Get the sample rate of this source
    fn sample_rate(&self) -> u32;

    /// Get the duration of this source, if the container declares it.
    fn duration(&self) -> Option<Duration>;
}

impl SampleSource for Box<dyn SampleSource> {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, SampleSourceError> {
        (**self).next_block()
    }

    fn channel_count(&self) -> u16 {
        (**self).channel_count()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }
}
