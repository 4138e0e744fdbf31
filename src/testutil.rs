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
use std::{
    collections::BTreeMap,
    error::Error,
    f32::consts::PI,
    fs::{self, File},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::keys::Keycode;

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

/// Writes a 32-bit float WAV file. `channels` holds one sample vector per channel.
pub fn write_wav(
    path: &Path,
    channels: &[Vec<f32>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    assert!(!channels.is_empty(), "Need at least one channel");
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let frames = channels[0].len();
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Writes a 16-bit integer WAV file from interleaved samples.
pub fn write_wav_i16(
    path: &Path,
    interleaved: &[i16],
    num_channels: u16,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;
    for sample in interleaved {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// A short decaying sine, like a key click.
pub fn click(frequency: f32, sample_rate: u32, duration_seconds: f32) -> Vec<f32> {
    let count = (sample_rate as f32 * duration_seconds) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = 1.0 - i as f32 / count as f32;
            0.5 * envelope * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Writes a pack bundle `<parent>/<stem>.soundpack` with the given press mapping and
/// sample files. Repeated keys accumulate variants. Every sample is a short stereo click.
pub fn write_pack(
    parent: &Path,
    stem: &str,
    name: &str,
    press: &[(Keycode, &str)],
    sounds: &[&str],
) -> Result<PathBuf, Box<dyn Error>> {
    let bundle = parent.join(format!("{}.soundpack", stem));
    let sounds_dir = bundle.join("sounds");
    fs::create_dir_all(&sounds_dir)?;

    fs::write(
        bundle.join("metadata.json"),
        serde_json::json!({
            "id": stem,
            "name": name,
            "author": "test",
            "description": "A test pack.",
            "version": "1.0",
        })
        .to_string(),
    )?;

    let mut press_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, file) in press {
        press_map
            .entry(key.to_string())
            .or_default()
            .push(file.to_string());
    }
    fs::write(
        bundle.join("mappings.json"),
        serde_json::json!({
            "pressMap": press_map,
            "releaseMap": {},
        })
        .to_string(),
    )?;

    for (i, sound) in sounds.iter().enumerate() {
        let tone = click(440.0 * (i + 1) as f32, 48000, 0.05);
        write_wav(&sounds_dir.join(sound), &[tone.clone(), tone], 48000)?;
    }

    Ok(bundle)
}
