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

//! The playback channel manager: starts, stops and tracks sounding instances on the single
//! audio device.

use std::error::Error;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::decode::DecodeError;
use crate::audio::mixer::next_source_id;
use crate::audio::{ActiveSource, Device};
use crate::config::{self, Retrigger};
use crate::playsync::{CancelHandle, PlayState};

use self::loader::SampleLoader;
use self::voice::{Voice, VoiceManager};

mod loader;
mod voice;

/// How often the reaper checks for shutdown while idle.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unable to load {}: {source}", .path.display())]
    AssetLoad { path: PathBuf, source: DecodeError },
}

/// A handle to one sounding instance of a trigger.
#[derive(Clone, Debug)]
pub struct PlaybackInstance {
    id: u64,
    trigger: String,
    started: Instant,
    handle: CancelHandle,
}

impl PlaybackInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// When the instance started.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Returns true while the instance is sounding.
    pub fn is_playing(&self) -> bool {
        self.handle.is_active()
    }

    /// Returns the current state of the instance.
    pub fn state(&self) -> PlayState {
        self.handle.state()
    }

    /// Blocks until the instance finishes or is stopped.
    pub fn wait(&self) -> PlayState {
        self.handle.wait()
    }

    /// Waits for the instance to finish for at most the given time.
    pub fn wait_timeout(&self, timeout: Duration) -> PlayState {
        self.handle.wait_timeout(timeout)
    }
}

/// The device as acquired at startup.
enum DeviceSlot {
    Ready(Arc<dyn Device>),
    Unavailable(String),
}

/// How an instance should be started.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub looped: bool,
    /// Falls back to the board default.
    pub retrigger: Option<Retrigger>,
    pub max_voices: Option<NonZeroU32>,
}

/// Owns the audio device and the voices sounding on it.
pub struct ChannelManager {
    device: DeviceSlot,
    loader: SampleLoader,
    voices: Arc<Mutex<VoiceManager>>,
    /// Serializes start and stop operations on the device.
    device_lock: Mutex<()>,
    default_retrigger: Retrigger,
    finished_tx: Sender<u64>,
    shutdown: Arc<AtomicBool>,
    reaper: Option<thread::JoinHandle<()>>,
}

impl ChannelManager {
    /// Creates a channel manager over the given device. A device that failed to open leaves
    /// the manager in a degraded state where every play reports the device as unavailable.
    pub fn new(
        device: Result<Arc<dyn Device>, Box<dyn Error>>,
        playback: &config::Playback,
    ) -> Result<ChannelManager, Box<dyn Error>> {
        let slot = match device {
            Ok(device) => {
                device.set_volume(playback.volume());
                info!(device = %device, "Audio device ready");
                DeviceSlot::Ready(device)
            }
            Err(e) => {
                error!(err = %e, "Audio device unavailable, playback disabled");
                DeviceSlot::Unavailable(e.to_string())
            }
        };
        ChannelManager::with_slot(slot, playback)
    }

    /// Creates a channel manager that never opens a device, for editing bindings without
    /// playing anything.
    pub fn offline(playback: &config::Playback) -> Result<ChannelManager, Box<dyn Error>> {
        debug!("Opening without an audio device");
        ChannelManager::with_slot(
            DeviceSlot::Unavailable("opened without an audio device".to_string()),
            playback,
        )
    }

    fn with_slot(
        device: DeviceSlot,
        playback: &config::Playback,
    ) -> Result<ChannelManager, Box<dyn Error>> {
        let sample_rate = match &device {
            DeviceSlot::Ready(device) => device.sample_rate(),
            DeviceSlot::Unavailable(_) => 0,
        };

        let voices = Arc::new(Mutex::new(VoiceManager::new(playback.max_voices())));
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded::<u64>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reaper = {
            let voices = voices.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("bardbox-reaper".into())
                .spawn(move || reap(voices, finished_rx, shutdown))?
        };

        Ok(ChannelManager {
            device,
            loader: SampleLoader::new(sample_rate),
            voices,
            device_lock: Mutex::new(()),
            default_retrigger: playback.retrigger(),
            finished_tx,
            shutdown,
            reaper: Some(reaper),
        })
    }

    fn device(&self) -> Result<&Arc<dyn Device>, PlaybackError> {
        match &self.device {
            DeviceSlot::Ready(device) => Ok(device),
            DeviceSlot::Unavailable(reason) => {
                Err(PlaybackError::DeviceUnavailable(reason.clone()))
            }
        }
    }

    /// Returns true if the device opened.
    pub fn device_available(&self) -> bool {
        matches!(self.device, DeviceSlot::Ready(_))
    }

    /// Describes the device, or why there is none.
    pub fn device_name(&self) -> String {
        match &self.device {
            DeviceSlot::Ready(device) => device.to_string(),
            DeviceSlot::Unavailable(reason) => format!("unavailable ({})", reason),
        }
    }

    /// Starts playing the file for the trigger. Under the cut behavior any instance of the
    /// trigger that is still sounding is stopped once the new one is on the device. If the
    /// device refuses the new instance, the old ones keep sounding.
    pub fn play(
        &self,
        path: &Path,
        trigger: &str,
        options: StartOptions,
    ) -> Result<PlaybackInstance, PlaybackError> {
        let span = span!(Level::INFO, "play", trigger);
        let _enter = span.enter();

        let device = self.device()?;
        let sample = self
            .loader
            .load(path)
            .map_err(|source| PlaybackError::AssetLoad {
                path: path.to_path_buf(),
                source,
            })?;
        let retrigger = options.retrigger.unwrap_or(self.default_retrigger);

        let _guard = self.device_lock.lock();
        let to_stop = self
            .voices
            .lock()
            .make_room(trigger, retrigger, options.max_voices);

        let handle = CancelHandle::new();
        let source_id = next_source_id();
        let source = ActiveSource::new(
            source_id,
            sample.data(),
            sample.channel_count(),
            options.looped,
            handle.clone(),
        )
        .with_completion(self.finished_tx.clone());
        if let Err(e) = device.add_source(source) {
            error!(err = %e, device = %device, "Device rejected source");
            self.voices.lock().restore(to_stop);
            return Err(PlaybackError::DeviceUnavailable(e.to_string()));
        }
        for voice in to_stop.iter() {
            voice.cancel_handle().cancel();
        }

        let voice = Voice::new(trigger, source_id, handle.clone());
        let instance = PlaybackInstance {
            id: voice.id(),
            trigger: trigger.to_string(),
            started: voice.start_time(),
            handle,
        };
        self.voices.lock().insert(voice);

        debug!(
            path = ?path,
            source_id,
            looped = options.looped,
            retrigger = ?retrigger,
            stopped = to_stop.len(),
            "Started voice"
        );
        Ok(instance)
    }

    /// Stops every instance of the trigger. Stopping a silent trigger is a no-op. Returns the
    /// number of instances stopped.
    pub fn stop(&self, trigger: &str) -> usize {
        let _guard = self.device_lock.lock();
        let handles = self.voices.lock().stop_trigger(trigger);
        let stopped = handles.iter().filter(|handle| handle.cancel()).count();
        debug!(trigger, stopped, "Stopped trigger");
        stopped
    }

    /// Stops everything.
    pub fn stop_all(&self) -> usize {
        let _guard = self.device_lock.lock();
        let handles = self.voices.lock().clear();
        let stopped = handles.iter().filter(|handle| handle.cancel()).count();
        info!(stopped, "Stopped all voices");
        stopped
    }

    /// Returns true if the trigger has a sounding instance.
    pub fn is_playing(&self, trigger: &str) -> bool {
        self.voices.lock().is_playing(trigger)
    }

    /// The triggers with a sounding instance.
    pub fn playing(&self) -> Vec<String> {
        self.voices.lock().playing()
    }

    /// Number of sounding instances.
    pub fn active_count(&self) -> usize {
        self.voices.lock().active_count()
    }

    /// Sets the master volume. The level is clamped to 0.0..=1.0; the applied level is
    /// returned.
    pub fn set_volume(&self, level: f32) -> Result<f32, PlaybackError> {
        let device = self.device()?;
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };
        device.set_volume(level);
        info!(level, "Volume set");
        Ok(level)
    }

    /// Returns the master volume.
    pub fn volume(&self) -> Result<f32, PlaybackError> {
        Ok(self.device()?.volume())
    }

    /// Decodes the given files into the cache in parallel. Failures are logged. Returns the
    /// number of files that are ready.
    pub fn preload(&self, paths: &[PathBuf]) -> usize {
        if !self.device_available() {
            warn!("No audio device, skipping preload");
            return 0;
        }

        paths
            .par_iter()
            .filter(|path| match self.loader.load(path) {
                Ok(_) => true,
                Err(e) => {
                    warn!(path = ?path, err = %e, "Unable to preload asset");
                    false
                }
            })
            .count()
    }

    /// Forgets the cached decoding of a file.
    pub fn forget(&self, path: &Path) {
        self.loader.forget(path);
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop_all();
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.join();
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("device", &self.device_name())
            .field("voices", &*self.voices.lock())
            .field("loader", &self.loader)
            .finish()
    }
}

/// Clears the trigger association of sources that played to their end.
fn reap(voices: Arc<Mutex<VoiceManager>>, finished: Receiver<u64>, shutdown: Arc<AtomicBool>) {
    loop {
        match finished.recv_timeout(REAP_INTERVAL) {
            Ok(source_id) => {
                if let Some(voice) = voices.lock().remove_source(source_id) {
                    debug!(
                        trigger = voice.trigger(),
                        source_id,
                        played_ms = voice.start_time().elapsed().as_millis(),
                        "Reaped finished voice"
                    );
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
