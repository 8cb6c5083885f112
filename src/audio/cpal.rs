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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::audio::mixer::{ActiveSource, AudioMixer};
use crate::{
    audio::{Device as AudioDevice, SampleFormat, TargetFormat},
    config,
};

/// Frames mixed per producer iteration.
const BLOCK_FRAMES: usize = 512;

/// Lock-free single-producer/single-consumer ring of f32 samples.
struct CircularBuffer {
    /// Backing buffer, samples stored as f32 bits
    buffer: Vec<AtomicU32>,
    /// Capacity (must be power of 2)
    capacity: usize,
    /// Read position (consumer)
    read_pos: AtomicUsize,
    /// Write position (producer)
    write_pos: AtomicUsize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        // Round up to next power of 2 for efficient modulo
        let capacity = capacity.next_power_of_two();
        Self {
            buffer: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            capacity,
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

    /// Returns the number of samples actually written.
    fn write(&self, samples: &[f32]) -> usize {
        let to_write = self.space().min(samples.len());
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        for (offset, sample) in samples[..to_write].iter().enumerate() {
            self.buffer[(write + offset) & mask].store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Returns the number of samples actually read.
    fn read(&self, output: &mut [f32]) -> usize {
        let to_read = self.available().min(output.len());
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        for (offset, sample) in output[..to_read].iter_mut().enumerate() {
            *sample = f32::from_bits(self.buffer[(read + offset) & mask].load(Ordering::Relaxed));
        }

        self.read_pos.store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

/// f32 callback: read directly into the CPAL buffer
fn create_f32_callback(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let read = ring.read(data);
        // Zero-fill any shortfall
        data[read..].fill(0.0);
    }
}

/// Integer callback: read from ring and convert
fn create_int_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut temp = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        temp.resize(data.len(), 0.0f32);
        let read = ring.read(&mut temp);
        temp[read..].fill(0.0);

        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Manages the continuous output stream and the producer thread feeding it.
struct OutputManager {
    /// The core audio mixer
    mixer: AudioMixer,
    /// Channel for handing new sources to the producer thread.
    source_tx: crossbeam_channel::Sender<ActiveSource>,
    /// Set when the device is being dropped.
    shutdown: Arc<AtomicBool>,
    /// Set when the stream reported an error; the device is unusable afterwards.
    failed: Arc<AtomicBool>,
    /// Producer and output threads.
    threads: Vec<thread::JoinHandle<()>>,
}

impl OutputManager {
    /// Starts the producer thread and the output thread. Returns once the stream is playing or
    /// has failed to open.
    fn start(device: cpal::Device, format: TargetFormat) -> Result<Self, Box<dyn Error>> {
        let (source_tx, source_rx) = crossbeam_channel::unbounded::<ActiveSource>();
        let mixer = AudioMixer::new(format.channels, format.sample_rate);
        let shutdown = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        // ~100ms of audio
        let capacity_samples = (format.sample_rate as usize * format.channels as usize) / 10;
        let ring = Arc::new(CircularBuffer::new(capacity_samples.max(1024)));

        let producer_thread = {
            let mixer = mixer.clone();
            let ring = ring.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("bardbox-mixer".into())
                .spawn(move || {
                    let block_samples = BLOCK_FRAMES * mixer.num_channels() as usize;
                    let mut scratch = vec![0.0f32; block_samples];

                    while !shutdown.load(Ordering::Relaxed) {
                        while let Ok(new_source) = source_rx.try_recv() {
                            mixer.add_source(new_source);
                        }

                        if ring.space() >= block_samples {
                            mixer.process_into_output(&mut scratch, BLOCK_FRAMES);
                            ring.write(&scratch);
                        } else {
                            // Ring full, yield briefly
                            thread::sleep(Duration::from_micros(500));
                        }
                    }
                })?
        };

        // The stream is not Send, so it lives and dies on its own thread.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let output_thread = {
            let shutdown = shutdown.clone();
            let failed = failed.clone();
            thread::Builder::new()
                .name("bardbox-output".into())
                .spawn(move || {
                    let config = cpal::StreamConfig {
                        channels: format.channels,
                        sample_rate: cpal::SampleRate(format.sample_rate),
                        buffer_size: cpal::BufferSize::Default,
                    };
                    let on_error = {
                        let failed = failed.clone();
                        move |err: cpal::StreamError| {
                            error!(err = err.to_string(), "CPAL output stream error");
                            failed.store(true, Ordering::Relaxed);
                        }
                    };

                    let stream_result = match (format.sample_format, format.bits_per_sample) {
                        (SampleFormat::Float, _) => device.build_output_stream(
                            &config,
                            create_f32_callback(ring),
                            on_error,
                            None,
                        ),
                        (SampleFormat::Int, 16) => device.build_output_stream(
                            &config,
                            create_int_callback::<i16>(ring),
                            on_error,
                            None,
                        ),
                        _ => device.build_output_stream(
                            &config,
                            create_int_callback::<i32>(ring),
                            on_error,
                            None,
                        ),
                    };

                    let stream = match stream_result.map_err(|e| e.to_string()).and_then(
                        |stream| {
                            stream.play().map_err(|e| e.to_string())?;
                            Ok(stream)
                        },
                    ) {
                        Ok(stream) => stream,
                        Err(e) => {
                            failed.store(true, Ordering::Relaxed);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    info!("CPAL output stream started");

                    while !shutdown.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                })?
        };

        let mut manager = OutputManager {
            mixer,
            source_tx,
            shutdown,
            failed,
            threads: vec![producer_thread, output_thread],
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(manager),
            Ok(Err(e)) => {
                manager.stop();
                Err(format!("unable to start output stream: {}", e).into())
            }
            Err(_) => {
                manager.stop();
                Err("output thread exited before the stream started".into())
            }
        }
    }

    fn add_source(&self, source: ActiveSource) -> Result<(), Box<dyn Error>> {
        if self.failed.load(Ordering::Relaxed) {
            return Err("audio output stream has failed".into());
        }
        self.source_tx
            .send(source)
            .map_err(|_| "audio mixer thread has stopped")?;
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.mixer.clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for OutputManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A cpal output device with a running stream.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The format the stream was opened with.
    format: TargetFormat,
    /// The output stream manager for continuous playback.
    output_manager: OutputManager,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, {}Hz) ({})",
            self.name,
            self.format.channels,
            self.format.sample_rate,
            self.host_id.name()
        )
    }
}

/// An output device as seen while listing.
struct Candidate {
    name: String,
    host_id: cpal::HostId,
    max_channels: u16,
    device: cpal::Device,
}

impl Device {
    /// Lists output devices as printable descriptions.
    pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
        Ok(Self::candidates()?
            .into_iter()
            .map(|c| {
                format!(
                    "{} (Channels={}) ({})",
                    c.name,
                    c.max_channels,
                    c.host_id.name()
                )
            })
            .collect())
    }

    fn candidates() -> Result<Vec<Candidate>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut candidates = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
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
                let max_channels = match device.supported_output_configs() {
                    Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
                    Err(_) => continue,
                };
                let name = match device.name() {
                    Ok(name) => name,
                    Err(_) => continue,
                };

                if max_channels > 0 {
                    candidates.push(Candidate {
                        name,
                        host_id,
                        max_channels,
                        device,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }

    /// Opens the configured device. The name "default" selects the host's default output.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let span = span!(Level::INFO, "open device (cpal)");
        let _enter = span.enter();

        let name = config.device();
        let format = TargetFormat::new(
            config.sample_rate(),
            config.channels(),
            config.sample_format()?,
            config.bits_per_sample(),
        )?;

        let (name, host_id, device) = if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            (device.name()?, host.id(), device)
        } else {
            let candidate = Self::candidates()?
                .into_iter()
                .find(|c| c.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name))?;
            if candidate.max_channels < format.channels {
                return Err(format!(
                    "{} channels requested, audio device {} only has {}",
                    format.channels, candidate.name, candidate.max_channels
                )
                .into());
            }
            (candidate.name, candidate.host_id, candidate.device)
        };

        let output_manager = OutputManager::start(device, format.clone())?;
        info!(
            device = name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            format = format.sample_format.as_str(),
            "Audio device opened"
        );

        Ok(Device {
            name,
            host_id,
            format,
            output_manager,
        })
    }
}

impl AudioDevice for Device {
    fn add_source(&self, source: ActiveSource) -> Result<(), Box<dyn Error>> {
        self.output_manager.add_source(source)
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn set_volume(&self, volume: f32) {
        self.output_manager.mixer.set_volume(volume);
    }

    fn volume(&self) -> f32 {
        self.output_manager.mixer.volume()
    }
}
