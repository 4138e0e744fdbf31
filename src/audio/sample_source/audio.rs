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
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// A sample source that decodes audio files (WAV, AIFF, MP3, AAC/M4A, Ogg Vorbis and
/// anything else symphonia supports).
pub struct AudioSampleSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    duration: Option<Duration>,
    /// Samples decoded while probing for the channel count.
    primed: Option<Vec<f32>>,
    is_finished: bool,
}

impl SampleSource for AudioSampleSource {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, SampleSourceError> {
        if let Some(primed) = self.primed.take() {
            return Ok(Some(primed));
        }
        if self.is_finished {
            return Ok(None);
        }

        match Self::read_and_decode_next_packet_for_track(
            self.format_reader.as_mut(),
            self.decoder.as_mut(),
            self.track_id,
        )? {
            Some((samples, _)) => Ok(Some(samples)),
            None => {
                self.is_finished = true;
                Ok(None)
            }
        }
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl AudioSampleSource {
    /// Opens and probes an audio file.
    pub fn from_file(path: &Path) -> Result<Self, SampleSourceError> {
        let file = File::open(path).map_err(|source| SampleSourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let unsupported = |reason: String| SampleSourceError::Unsupported {
            path: path.to_path_buf(),
            reason,
        };

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| unsupported(e.to_string()))?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unsupported("no audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| unsupported("sample rate not specified".to_string()))?;
        let duration = params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

        let decoder_opts: DecoderOptions = Default::default();
        let mut decoder = get_codecs()
            .make(&params, &decoder_opts)
            .map_err(|e| unsupported(e.to_string()))?;

        // Some containers don't declare a channel layout. Decode the first packet to find out.
        let declared = params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let (channels, primed) = if declared > 0 {
            (declared, None)
        } else {
            match Self::read_and_decode_next_packet_for_track(
                format_reader.as_mut(),
                decoder.as_mut(),
                track_id,
            )? {
                Some((samples, channels)) => (channels as u16, Some(samples)),
                None => return Err(SampleSourceError::Empty),
            }
        };

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            channels,
            sample_rate,
            duration,
            primed,
            is_finished: false,
        })
    }

    /// Reads the next packet. `Ok(None)` means the end of the stream.
    ///
    /// ResetRequired errors are propagated so callers can reset the decoder.
    fn read_next_packet(
        format_reader: &mut dyn FormatReader,
    ) -> Result<Option<Packet>, SampleSourceError> {
        match format_reader.next_packet() {
            Ok(packet) => Ok(Some(packet)),
            Err(SymphoniaError::ResetRequired) => {
                Err(SampleSourceError::AudioError(SymphoniaError::ResetRequired))
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            // Some readers report a decode error at the end of the stream.
            Err(SymphoniaError::DecodeError(_)) => Ok(None),
            Err(e) => Err(SampleSourceError::AudioError(e)),
        }
    }

    /// Reads and decodes packets until one yields audio for the given track. Returns the
    /// interleaved samples and the channel count of the decoded buffer.
    fn read_and_decode_next_packet_for_track(
        format_reader: &mut dyn FormatReader,
        decoder: &mut dyn Decoder,
        track_id: u32,
    ) -> Result<Option<(Vec<f32>, usize)>, SampleSourceError> {
        loop {
            let packet = match Self::read_next_packet(format_reader) {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(None),
                Err(SampleSourceError::AudioError(SymphoniaError::ResetRequired)) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(e),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    decoder.decode(&packet)?
                }
                // A corrupt packet is skipped rather than failing the whole file.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let (samples, channels) = Self::interleave(decoded);
            // Header packets (Vorbis) decode to nothing.
            if channels > 0 && !samples.is_empty() {
                return Ok(Some((samples, channels)));
            }
        }
    }

    /// Converts a decoded buffer of any sample type to interleaved f32.
    fn interleave(decoded: AudioBufferRef) -> (Vec<f32>, usize) {
        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if decoded.frames() == 0 {
            return (Vec::new(), channels);
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        (buffer.samples().to_vec(), channels)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::testutil::{write_wav, write_wav_i16};

    fn read_all(source: &mut AudioSampleSource) -> Result<Vec<f32>, SampleSourceError> {
        let mut samples = Vec::new();
        while let Some(block) = source.next_block()? {
            samples.extend(block);
        }
        Ok(samples)
    }

    #[test]
    fn test_decode_float_wav() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("stereo.wav");
        write_wav(&path, &[vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]], 44100)?;

        let mut source = AudioSampleSource::from_file(&path)?;
        assert_eq!(source.channel_count(), 2);
        assert_eq!(source.sample_rate(), 44100);

        let samples = read_all(&mut source)?;
        let expected = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        assert_eq!(samples.len(), expected.len());
        for (actual, expected) in samples.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-6);
        }
        assert!(source.next_block()?.is_none());
        Ok(())
    }

    #[test]
    fn test_decode_int_wav_is_scaled() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("mono.wav");
        write_wav_i16(&path, &[i16::MAX, 0, i16::MIN], 1, 22050)?;

        let mut source = AudioSampleSource::from_file(&path)?;
        assert_eq!(source.channel_count(), 1);
        let samples = read_all(&mut source)?;
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 1.0).abs() < 1e-3);
        assert_eq!(samples[1], 0.0);
        assert!((samples[2] + 1.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_missing_and_garbage_files() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        assert!(matches!(
            AudioSampleSource::from_file(&temp.path().join("nope.wav")),
            Err(SampleSourceError::Open { .. })
        ));

        let garbage = temp.path().join("garbage.wav");
        std::fs::write(&garbage, b"this is not audio")?;
        assert!(AudioSampleSource::from_file(&garbage).is_err());
        Ok(())
    }
}
