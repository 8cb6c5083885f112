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

//! Voice management for trigger playback.
//!
//! Handles voice allocation, retrigger cuts and stealing.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::Retrigger;
use crate::playsync::CancelHandle;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Represents a sounding instance of a trigger.
pub struct Voice {
    /// Unique ID for this voice.
    id: u64,
    /// The trigger that started this voice.
    trigger: String,
    /// When this voice started playing.
    start_time: Instant,
    /// The audio source ID in the mixer.
    source_id: u64,
    /// Cancel handle for stopping this voice.
    cancel_handle: CancelHandle,
}

impl Voice {
    /// Creates a new voice.
    pub fn new(trigger: &str, source_id: u64, cancel_handle: CancelHandle) -> Self {
        Self {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst),
            trigger: trigger.to_string(),
            start_time: Instant::now(),
            source_id,
            cancel_handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Returns a clone of this voice's cancel handle.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }
}

/// Tracks active voices against the device's voice pool.
pub struct VoiceManager {
    /// Active voices, oldest first.
    voices: Vec<Voice>,
    /// Size of the voice pool.
    max_voices: u32,
}

impl VoiceManager {
    /// Creates a new voice manager.
    pub fn new(max_voices: u32) -> Self {
        Self {
            voices: Vec::new(),
            max_voices: max_voices.max(1),
        }
    }

    /// Removes the voices that have to go before a new voice of the trigger may start, either
    /// because of the retrigger behavior or because a voice limit would be exceeded.
    /// The removed voices are returned uncancelled; the caller cancels them once the new voice
    /// is on the device, or hands them back with [`VoiceManager::restore`].
    pub fn make_room(
        &mut self,
        trigger: &str,
        retrigger: Retrigger,
        limit: Option<NonZeroU32>,
    ) -> Vec<Voice> {
        self.prune();
        let mut voices_to_stop = Vec::new();

        match retrigger {
            Retrigger::Cut => {
                voices_to_stop.extend(self.take_where(|v| v.trigger == trigger));
            }
            Retrigger::Polyphonic => {
                if let Some(limit) = limit {
                    let count = self.voices.iter().filter(|v| v.trigger == trigger).count();
                    if count >= limit.get() as usize {
                        if let Some(oldest) = self.oldest(|v| v.trigger == trigger) {
                            voices_to_stop.extend(self.take_where(|v| v.id == oldest));
                            debug!(
                                trigger,
                                limit = limit.get(),
                                "Trigger voice limit reached, stealing oldest"
                            );
                        }
                    }
                }
            }
        }

        if self.voices.len() >= self.max_voices as usize {
            if let Some(oldest) = self.oldest(|_| true) {
                voices_to_stop.extend(self.take_where(|v| v.id == oldest));
                warn!(
                    max_voices = self.max_voices,
                    "Voice pool exhausted, stealing oldest"
                );
            }
        }

        voices_to_stop
    }

    /// Puts back voices taken by [`VoiceManager::make_room`] when the new voice never started.
    pub fn restore(&mut self, voices: Vec<Voice>) {
        self.voices.extend(voices);
        self.voices.sort_by_key(|v| (v.start_time, v.id));
    }

    /// Registers a started voice.
    pub fn insert(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Removes every voice of the trigger. Returns their cancel handles.
    pub fn stop_trigger(&mut self, trigger: &str) -> Vec<CancelHandle> {
        self.take_where(|v| v.trigger == trigger)
            .iter()
            .map(Voice::cancel_handle)
            .collect()
    }

    /// Removes the voice playing the given mixer source, once it has finished.
    pub fn remove_source(&mut self, source_id: u64) -> Option<Voice> {
        let index = self.voices.iter().position(|v| v.source_id == source_id)?;
        Some(self.voices.remove(index))
    }

    /// Returns true if any voice of the trigger is still sounding.
    pub fn is_playing(&self, trigger: &str) -> bool {
        self.voices
            .iter()
            .any(|v| v.trigger == trigger && v.cancel_handle.is_active())
    }

    /// The triggers with at least one sounding voice, in start order.
    pub fn playing(&self) -> Vec<String> {
        let mut triggers: Vec<String> = Vec::new();
        for voice in self.voices.iter().filter(|v| v.cancel_handle.is_active()) {
            if !triggers.contains(&voice.trigger) {
                triggers.push(voice.trigger.clone());
            }
        }
        triggers
    }

    /// Returns the current number of active voices.
    pub fn active_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.cancel_handle.is_active())
            .count()
    }

    /// Clears all voices.
    /// Returns the cancel handles for all voices that should be stopped.
    pub fn clear(&mut self) -> Vec<CancelHandle> {
        let handles: Vec<CancelHandle> = self.voices.iter().map(|v| v.cancel_handle()).collect();
        self.voices.clear();
        handles
    }

    /// Drops voices that are no longer sounding but haven't been reaped yet.
    fn prune(&mut self) {
        self.voices.retain(|v| v.cancel_handle.is_active());
    }

    fn oldest<P: Fn(&Voice) -> bool>(&self, predicate: P) -> Option<u64> {
        self.voices
            .iter()
            .filter(|v| predicate(v))
            .min_by_key(|v| (v.start_time, v.id))
            .map(|v| v.id)
    }

    fn take_where<P: Fn(&Voice) -> bool>(&mut self, predicate: P) -> Vec<Voice> {
        let (taken, kept): (Vec<Voice>, Vec<Voice>) = std::mem::take(&mut self.voices)
            .into_iter()
            .partition(|v| predicate(v));
        self.voices = kept;
        taken
    }
}

impl std::fmt::Debug for VoiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceManager")
            .field("active_voices", &self.voices.len())
            .field("max_voices", &self.max_voices)
            .finish()
    }
}
