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
// Core audio mixing logic shared by the cpal and mock devices
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::playsync::CancelHandle;

/// Global atomic counter for generating unique source IDs
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a fresh source ID.
pub fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Represents an active audio source in the mixer
pub struct ActiveSource {
    /// Unique ID for this source
    id: u64,
    /// Interleaved samples at the mixer's sample rate, shared with the sample cache
    data: Arc<Vec<f32>>,
    /// Number of interleaved channels in `data`
    channel_count: u16,
    /// Index of the next sample to read
    position: usize,
    /// Restart from the beginning instead of finishing
    looped: bool,
    /// Precomputed routing: source_channel_index -> Vec<output_channel_index>
    channel_mappings: Vec<Vec<usize>>,
    /// Shared with whoever started the source
    cancel_handle: CancelHandle,
    /// Receives the source ID when the source plays to its end
    on_finish: Option<Sender<u64>>,
}

impl ActiveSource {
    /// Creates a new source over interleaved sample data.
    pub fn new(
        id: u64,
        data: Arc<Vec<f32>>,
        channel_count: u16,
        looped: bool,
        cancel_handle: CancelHandle,
    ) -> Self {
        Self {
            id,
            data,
            channel_count,
            position: 0,
            looped,
            channel_mappings: Vec::new(),
            cancel_handle,
            on_finish: None,
        }
    }

    /// Reports natural completion of this source on the given channel.
    pub fn with_completion(mut self, on_finish: Sender<u64>) -> Self {
        self.on_finish = Some(on_finish);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mixes up to `num_frames` frames into `output`. Returns false once the source has run out.
    fn mix_into(&mut self, output: &mut [f32], num_channels: usize, num_frames: usize) -> bool {
        let stride = self.channel_count as usize;
        if stride == 0 || self.data.len() < stride {
            return false;
        }

        for frame in 0..num_frames {
            if self.position + stride > self.data.len() {
                if !self.looped {
                    return false;
                }
                self.position = 0;
            }

            let base = frame * num_channels;
            for (source_channel, outputs) in self.channel_mappings.iter().enumerate() {
                let sample = self.data[self.position + source_channel];
                for &output_channel in outputs {
                    output[base + output_channel] += sample;
                }
            }
            self.position += stride;
        }

        // A one-shot that ended exactly on the block boundary is done as well.
        self.looped || self.position + stride <= self.data.len()
    }
}

/// Computes the routing of source channels onto output channels. Mono fans out to every output;
/// otherwise source channel `c` lands on output `c % outputs`.
fn compute_channel_mappings(source_channels: u16, output_channels: u16) -> Vec<Vec<usize>> {
    let outputs = output_channels as usize;
    if source_channels == 1 {
        return vec![(0..outputs).collect()];
    }

    (0..source_channels as usize)
        .map(|channel| vec![channel % outputs])
        .collect()
}

/// Core audio mixing logic that's independent of any audio backend
#[derive(Clone)]
pub struct AudioMixer {
    /// Active audio sources currently playing
    active_sources: Arc<Mutex<Vec<ActiveSource>>>,
    /// Number of output channels
    num_channels: u16,
    /// Sample rate
    sample_rate: u32,
    /// Master volume, stored as f32 bits
    volume: Arc<AtomicU32>,
}

impl AudioMixer {
    /// Creates a new audio mixer
    pub fn new(num_channels: u16, sample_rate: u32) -> Self {
        Self {
            active_sources: Arc::new(Mutex::new(Vec::new())),
            num_channels,
            sample_rate,
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    /// Adds a new audio source to the mixer
    pub fn add_source(&self, mut source: ActiveSource) {
        source.channel_mappings =
            compute_channel_mappings(source.channel_count, self.num_channels);
        self.active_sources.lock().push(source);
    }

    /// Mixes `num_frames` frames into `output`, which must hold at least
    /// `num_frames * num_channels` samples. Cancelled sources are dropped silently; sources that
    /// play to their end are marked finished and reported on their completion channel.
    pub fn process_into_output(&self, output: &mut [f32], num_frames: usize) {
        let num_channels = self.num_channels as usize;
        let len = num_frames * num_channels;
        let output = &mut output[..len];
        output.fill(0.0);

        let mut sources = self.active_sources.lock();
        sources.retain_mut(|source| {
            if source.cancel_handle.is_cancelled() {
                return false;
            }

            if source.mix_into(output, num_channels, num_frames) {
                return true;
            }

            if source.cancel_handle.finish() {
                if let Some(on_finish) = &source.on_finish {
                    // The receiver may be gone during shutdown.
                    let _ = on_finish.send(source.id);
                }
            }
            false
        });
        drop(sources);

        let volume = self.volume();
        if volume != 1.0 {
            output.iter_mut().for_each(|sample| *sample *= volume);
        }
    }

    /// Cancels and removes every source.
    pub fn clear(&self) {
        let mut sources = self.active_sources.lock();
        for source in sources.drain(..) {
            source.cancel_handle.cancel();
        }
    }

    /// Returns the number of sources currently in the mixer.
    pub fn active_count(&self) -> usize {
        self.active_sources.lock().len()
    }

    /// Gets the number of output channels
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sets the master volume, clamped to 0.0..=1.0.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Gets the master volume.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playsync::PlayState;

    fn source(data: Vec<f32>, channels: u16, looped: bool) -> (ActiveSource, CancelHandle) {
        let handle = CancelHandle::new();
        (
            ActiveSource::new(
                next_source_id(),
                Arc::new(data),
                channels,
                looped,
                handle.clone(),
            ),
            handle,
        )
    }

    #[test]
    fn test_mono_fans_out_to_all_outputs() {
        let mixer = AudioMixer::new(2, 44100);
        let (source, _) = source(vec![0.5, 0.25], 1, false);
        mixer.add_source(source);

        let mut output = vec![0.0; 4];
        mixer.process_into_output(&mut output, 2);
        assert_eq!(output, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_sources_are_summed_and_scaled_by_volume() {
        let mixer = AudioMixer::new(2, 44100);
        let (a, _) = source(vec![0.5, -0.5], 2, false);
        let (b, _) = source(vec![0.25, 0.25], 2, false);
        mixer.add_source(a);
        mixer.add_source(b);
        mixer.set_volume(0.5);

        let mut output = vec![0.0; 2];
        mixer.process_into_output(&mut output, 1);
        assert_eq!(output, vec![0.375, -0.125]);
    }

    #[test]
    fn test_volume_is_clamped() {
        let mixer = AudioMixer::new(2, 44100);
        mixer.set_volume(3.0);
        assert_eq!(mixer.volume(), 1.0);
        mixer.set_volume(-1.0);
        assert_eq!(mixer.volume(), 0.0);
    }

    #[test]
    fn test_finished_source_is_reported() {
        let mixer = AudioMixer::new(2, 44100);
        let (tx, rx) = crossbeam_channel::unbounded();
        let (source, handle) = source(vec![0.1, 0.1, 0.1, 0.1], 2, false);
        let id = source.id();
        mixer.add_source(source.with_completion(tx));

        let mut output = vec![0.0; 8];
        mixer.process_into_output(&mut output, 4);

        assert_eq!(mixer.active_count(), 0);
        assert_eq!(handle.state(), PlayState::Finished);
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[test]
    fn test_source_ending_on_block_boundary_finishes() {
        let mixer = AudioMixer::new(1, 44100);
        let (source, handle) = source(vec![0.1, 0.2], 1, false);
        mixer.add_source(source);

        let mut output = vec![0.0; 2];
        mixer.process_into_output(&mut output, 2);
        assert_eq!(output, vec![0.1, 0.2]);
        assert_eq!(mixer.active_count(), 0);
        assert_eq!(handle.state(), PlayState::Finished);
    }

    #[test]
    fn test_cancelled_source_is_dropped_without_report() {
        let mixer = AudioMixer::new(2, 44100);
        let (tx, rx) = crossbeam_channel::unbounded();
        let (source, handle) = source(vec![0.1; 1000], 2, false);
        mixer.add_source(source.with_completion(tx));

        handle.cancel();
        let mut output = vec![0.0; 8];
        mixer.process_into_output(&mut output, 4);

        assert_eq!(mixer.active_count(), 0);
        assert!(output.iter().all(|s| *s == 0.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_looped_source_wraps() {
        let mixer = AudioMixer::new(1, 44100);
        let (source, handle) = source(vec![1.0, 2.0], 1, true);
        mixer.add_source(source);

        let mut output = vec![0.0; 5];
        mixer.process_into_output(&mut output, 5);
        assert_eq!(output, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
        assert!(handle.is_active());
        assert_eq!(mixer.active_count(), 1);
    }

    #[test]
    fn test_clear_cancels_everything() {
        let mixer = AudioMixer::new(2, 44100);
        let (source, handle) = source(vec![0.1; 100], 2, true);
        mixer.add_source(source);
        mixer.clear();
        assert!(handle.is_cancelled());
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn test_channel_mappings() {
        assert_eq!(compute_channel_mappings(1, 2), vec![vec![0, 1]]);
        assert_eq!(compute_channel_mappings(2, 2), vec![vec![0], vec![1]]);
        assert_eq!(
            compute_channel_mappings(4, 2),
            vec![vec![0], vec![1], vec![0], vec![1]]
        );
    }
}
