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
    cell::UnsafeCell,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, warn, Level};

use super::thread_priority::{
    configure_mixer_thread_priority, mixer_thread_priority, rt_audio_enabled,
};
use super::{AudioError, Mixer, OutputHandle};
use crate::config;

/// Number of mixer blocks the ring buffer holds between the mixer and the callback.
const RING_BLOCKS: usize = 4;

/// Lock-free single-producer single-consumer ring between the mixer thread and the
/// device callback.
struct CircularBuffer {
    buffer: Box<[UnsafeCell<f32>]>,
    /// Capacity (must be power of 2)
    capacity: usize,
    /// Read position (consumer)
    read_pos: AtomicUsize,
    /// Write position (producer)
    write_pos: AtomicUsize,
}

// Only the producer writes slots between write_pos and read_pos, and only the consumer
// reads slots between read_pos and write_pos.
unsafe impl Sync for CircularBuffer {}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        // Round up to next power of 2 for efficient modulo
        let cap = capacity.next_power_of_two();
        Self {
            buffer: (0..cap).map(|_| UnsafeCell::new(0.0)).collect(),
            capacity: cap,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    /// Get number of samples available to read
    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read) & (self.capacity - 1)
    }

    /// Get space available to write
    #[inline]
    fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Writes as many samples as fit. Returns the number written.
    fn write(&self, samples: &[f32]) -> usize {
        let to_write = self.space().min(samples.len());
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (i, sample) in samples[..to_write].iter().enumerate() {
            unsafe {
                *self.buffer[(write + i) & mask].get() = *sample;
            }
        }
        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Reads as many samples as are available. Returns the number read.
    fn read(&self, output: &mut [f32]) -> usize {
        let to_read = self.available().min(output.len());
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (i, sample) in output[..to_read].iter_mut().enumerate() {
            unsafe {
                *sample = *self.buffer[(read + i) & mask].get();
            }
        }
        self.read_pos
            .store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

/// A small wrapper around a cpal::Device with the stream configuration chosen for it.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The stream configuration output will use.
    stream_config: cpal::StreamConfig,
    /// The sample format of the device buffers.
    sample_format: cpal::SampleFormat,
    /// Frames mixed per block.
    block_frames: usize,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// f32 callback: read directly into the cpal buffer.
fn create_f32_callback(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let read = ring.read(data);
        // Zero-fill any shortfall
        data[read..].fill(0.0);
    }
}

/// Integer callback: read from ring and convert. The scratch buffer only grows when
/// the host asks for a larger buffer than before.
fn create_single_thread_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }
        let temp = &mut scratch[..data.len()];
        let read = ring.read(temp);
        temp[read..].fill(0.0);

        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<CircularBuffer>,
) -> Result<cpal::Stream, AudioError> {
    let err_fn = |err: cpal::StreamError| error!("CPAL output stream error: {}", err);
    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            device.build_output_stream(stream_config, create_f32_callback(ring), err_fn, None)?
        }
        cpal::SampleFormat::I16 => device.build_output_stream(
            stream_config,
            create_single_thread_callback::<i16>(ring),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I32 => device.build_output_stream(
            stream_config,
            create_single_thread_callback::<i32>(ring),
            err_fn,
            None,
        )?,
        other => return Err(AudioError::UnsupportedFormat(other.to_string())),
    };
    Ok(stream)
}

/// A running output: a mixer thread filling the ring and an output thread owning the
/// cpal stream.
struct Output {
    running: Arc<AtomicBool>,
    /// Dropping this wakes the output thread, which drops the stream.
    stop_tx: Option<Sender<()>>,
    producer_thread: Option<thread::JoinHandle<()>>,
    output_thread: Option<thread::JoinHandle<()>>,
}

impl OutputHandle for Output {}

impl Drop for Output {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.stop_tx.take();

        // Wait for threads to finish
        if let Some(thread) = self.producer_thread.take() {
            if thread.join().is_err() {
                warn!("Mixer thread panicked");
            }
        }
        if let Some(thread) = self.output_thread.take() {
            if thread.join().is_err() {
                warn!("Output thread panicked");
            }
        }
    }
}

/// Mixes blocks into the ring until told to stop.
fn run_producer(
    mut mixer: Mixer,
    ring: Arc<CircularBuffer>,
    block_frames: usize,
    running: Arc<AtomicBool>,
) {
    let span = span!(Level::INFO, "mixer (cpal)");
    let _enter = span.enter();

    configure_mixer_thread_priority(mixer_thread_priority(), rt_audio_enabled());

    // Pre-allocate scratch buffer (reused for all blocks)
    let block_samples = block_frames * mixer.num_channels() as usize;
    let mut scratch = vec![0.0f32; block_samples];

    while running.load(Ordering::Relaxed) {
        if ring.space() >= block_samples {
            mixer.process_into_output(&mut scratch, block_frames);
            ring.write(&scratch);
        } else {
            // Ring full, yield briefly
            thread::sleep(Duration::from_micros(500));
        }
    }
}

/// Creates and plays the stream, reports the outcome, then keeps it alive until stopped.
fn run_output(
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<CircularBuffer>,
    started_tx: Sender<Result<(), AudioError>>,
    stop_rx: Receiver<()>,
) {
    let span = span!(Level::INFO, "output (cpal)");
    let _enter = span.enter();

    let stream = match build_stream(&device, &stream_config, sample_format, ring) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = started_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = started_tx.send(Err(e.into()));
        return;
    }
    info!(
        channels = stream_config.channels,
        sample_rate = stream_config.sample_rate,
        format = %sample_format,
        "CPAL output stream started successfully"
    );
    let _ = started_tx.send(Ok(()));

    // Blocks until the handle is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    info!("CPAL output stream stopped");
}

/// Picks the stream configuration: the requested rate and channel count when the device
/// supports them, otherwise the device default.
fn choose_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat), AudioError> {
    let format_rank = |format: cpal::SampleFormat| match format {
        cpal::SampleFormat::F32 => Some(2),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::I16 => Some(0),
        _ => None,
    };

    let preferred = device
        .supported_output_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .filter(|range| {
            range.channels() == channels
                && range.min_sample_rate() <= sample_rate
                && sample_rate <= range.max_sample_rate()
        })
        .filter_map(|range| format_rank(range.sample_format()).map(|rank| (rank, range)))
        .max_by_key(|(rank, _)| *rank);

    let supported = match preferred {
        Some((_, range)) => range.with_sample_rate(sample_rate),
        None => device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?,
    };
    Ok((supported.config(), supported.sample_format()))
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, AudioError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal output devices with their default configuration.
    fn list_cpal_devices() -> Result<Vec<Device>, AudioError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = %e, host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                if let Some(device) = Device::from_cpal(host_id, device) {
                    devices.push(device);
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    fn from_cpal(host_id: cpal::HostId, device: cpal::Device) -> Option<Device> {
        let max_channels = device
            .supported_output_configs()
            .ok()?
            .map(|config| config.channels())
            .max()
            .unwrap_or(0);
        if max_channels == 0 {
            return None;
        }
        let default = device.default_output_config().ok()?;
        #[allow(deprecated)]
        let name = device.name().ok()?;

        Some(Device {
            name,
            max_channels,
            host_id,
            sample_format: default.sample_format(),
            stream_config: default.config(),
            device,
            block_frames: 0,
        })
    }

    /// Gets the given cpal device. "default" selects the default host's default output.
    pub fn get(config: &config::Audio) -> Result<Device, AudioError> {
        let name = config.device();
        let mut device = if name == "default" {
            let _shh_stderr = shh::stderr()?;
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or(AudioError::NoDefaultDevice)?;
            Device::from_cpal(host.id(), device).ok_or(AudioError::NoDefaultDevice)?
        } else {
            Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| AudioError::NotFound(name.to_string()))?
        };

        let (stream_config, sample_format) =
            choose_config(&device.device, config.sample_rate(), config.channels())?;
        if stream_config.sample_rate != config.sample_rate()
            || stream_config.channels != config.channels()
        {
            warn!(
                device = device.name,
                requested_rate = config.sample_rate(),
                requested_channels = config.channels(),
                sample_rate = stream_config.sample_rate,
                channels = stream_config.channels,
                "Requested output format not supported, using device default"
            );
        }
        device.stream_config = stream_config;
        device.sample_format = sample_format;
        device.block_frames = config.block_frames();
        Ok(device)
    }
}

impl super::Device for Device {
    fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate
    }

    fn channels(&self) -> u16 {
        self.stream_config.channels
    }

    fn start(&self, mixer: Mixer) -> Result<Box<dyn OutputHandle>, AudioError> {
        let block_frames = self.block_frames.max(16);
        let block_samples = block_frames * mixer.num_channels() as usize;
        let ring = Arc::new(CircularBuffer::new(block_samples * RING_BLOCKS));
        let running = Arc::new(AtomicBool::new(true));

        let producer_thread = {
            let ring = ring.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("keyasmr-mixer".to_string())
                .spawn(move || run_producer(mixer, ring, block_frames, running))?
        };

        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let sample_format = self.sample_format;
        let output_thread = thread::Builder::new()
            .name("keyasmr-output".to_string())
            .spawn(move || {
                run_output(device, stream_config, sample_format, ring, started_tx, stop_rx)
            });

        // Assemble the handle first so any failure below stops the mixer thread.
        let mut output = Output {
            running,
            stop_tx: Some(stop_tx),
            producer_thread: Some(producer_thread),
            output_thread: None,
        };
        output.output_thread = Some(output_thread?);

        match started_rx.recv() {
            Ok(Ok(())) => {
                info!(device = self.name, block_frames, "Audio output running.");
                Ok(Box::new(output))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Device("output thread exited".to_string())),
        }
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, AudioError> {
        Err(AudioError::Device("not a mock".to_string()))
    }
}
