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

//! Sample loading and caching for triggered playback.
//!
//! Assets are decoded entirely into memory the first time they're played (or when the board is
//! warmed up) so that later triggers start without touching the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::audio::decode::{self, DecodeError};

/// A loaded sample that can be played back.
/// The sample data is stored in an Arc for efficient sharing between voices.
#[derive(Clone)]
pub struct LoadedSample {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    /// Returns the shared sample data.
    pub fn data(&self) -> Arc<Vec<f32>> {
        self.data.clone()
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the playing time of the sample.
    pub fn duration(&self) -> Duration {
        let frames = self.data.len() as f64 / self.channel_count.max(1) as f64;
        Duration::from_secs_f64(frames / self.sample_rate.max(1) as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Manages loading and caching of sample data.
pub struct SampleLoader {
    /// Cache of loaded samples by file path.
    cache: RwLock<HashMap<PathBuf, LoadedSample>>,
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            target_sample_rate,
        }
    }

    /// Loads a sample from a file into memory.
    /// Returns a cached version if already loaded. Decoding happens outside the cache lock, so
    /// concurrent loads of different files don't wait on each other.
    pub fn load(&self, path: &Path) -> Result<LoadedSample, DecodeError> {
        if let Some(sample) = self.cache.read().get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        info!(path = ?path, "Loading sample into memory");
        let decoded = decode::decode_file(path)?;
        let channel_count = decoded.channels;

        let samples = if decoded.sample_rate != self.target_sample_rate {
            debug!(
                source_rate = decoded.sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(
                &decoded.samples,
                channel_count,
                decoded.sample_rate,
                self.target_sample_rate,
            )
        } else {
            decoded.samples
        };

        let loaded = LoadedSample {
            data: Arc::new(samples),
            channel_count,
            sample_rate: self.target_sample_rate,
        };

        info!(
            path = ?path,
            channels = channel_count,
            sample_rate = loaded.sample_rate,
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );

        // Another thread may have won the race; keep whichever landed first.
        Ok(self
            .cache
            .write()
            .entry(path.to_path_buf())
            .or_insert(loaded)
            .clone())
    }

    /// Drops the cached copy of a file, e.g. after it was replaced on disk.
    pub fn forget(&self, path: &Path) -> bool {
        let removed = self.cache.write().remove(path).is_some();
        if removed {
            debug!(path = ?path, "Dropped cached sample");
        }
        removed
    }

    /// Returns true if the file is cached.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache.read().contains_key(path)
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.read().values().map(|s| s.memory_size()).sum()
    }
}

impl std::fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cache.read().len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Transcodes samples from one sample rate to another using linear interpolation, which is
/// plenty for one-shots and jingles.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count.max(1) as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}
