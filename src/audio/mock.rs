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
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::info;

use crate::audio::mixer::{ActiveSource, AudioMixer};
use crate::config;

/// How often the mock mixer advances.
const TICK: Duration = Duration::from_millis(10);

/// A mock device. Mixes in real time but sends the output nowhere.
pub struct Device {
    name: String,
    mixer: AudioMixer,
    sources_added: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    ticker: Option<thread::JoinHandle<()>>,
}

impl Device {
    /// Opens the given mock device. A device named "mock-unavailable" refuses to open.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        if name == "mock-unavailable" {
            return Err(format!("mock device {} is unavailable", name).into());
        }

        let mixer = AudioMixer::new(config.channels(), config.sample_rate());
        let shutdown = Arc::new(AtomicBool::new(false));
        let ticker = {
            let mixer = mixer.clone();
            let shutdown = shutdown.clone();
            let frames = (config.sample_rate() as u64 * TICK.as_millis() as u64 / 1000) as usize;
            thread::Builder::new()
                .name("bardbox-mock-mixer".into())
                .spawn(move || {
                    let mut scratch = vec![0.0f32; frames * mixer.num_channels() as usize];
                    while !shutdown.load(Ordering::Relaxed) {
                        mixer.process_into_output(&mut scratch, frames);
                        thread::sleep(TICK);
                    }
                })?
        };

        info!(device = name, "Mock audio device opened");
        Ok(Device {
            name: name.to_string(),
            mixer,
            sources_added: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicBool::new(false)),
            shutdown,
            ticker: Some(ticker),
        })
    }

    /// Returns how many sources have been handed to this device.
    #[cfg(test)]
    pub fn sources_added(&self) -> usize {
        self.sources_added.load(Ordering::Relaxed)
    }

    /// Returns the number of sources currently sounding.
    #[cfg(test)]
    pub fn active_sources(&self) -> usize {
        self.mixer.active_count()
    }

    /// Makes every later add_source fail, as a backend would after losing its stream.
    #[cfg(test)]
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }
}

impl crate::audio::Device for Device {
    fn add_source(&self, source: ActiveSource) -> Result<(), Box<dyn Error>> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(format!("mock device {} has failed", self.name).into());
        }
        self.mixer.add_source(source);
        self.sources_added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.mixer.num_channels()
    }

    fn set_volume(&self, volume: f32) {
        self.mixer.set_volume(volume);
    }

    fn volume(&self) -> f32 {
        self.mixer.volume()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.mixer.clear();
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::audio::{mixer::next_source_id, Device as _};
    use crate::playsync::{CancelHandle, PlayState};

    #[test]
    fn test_mock_plays_sources_to_completion() {
        let device = Device::get(&config::Audio::new("mock")).unwrap();
        let handle = CancelHandle::new();
        // 50ms of stereo audio.
        let data = Arc::new(vec![0.1f32; 44100 / 20 * 2]);
        device
            .add_source(ActiveSource::new(
                next_source_id(),
                data,
                2,
                false,
                handle.clone(),
            ))
            .unwrap();

        assert_eq!(device.sources_added(), 1);
        assert_eq!(handle.wait_timeout(Duration::from_secs(3)), PlayState::Finished);
    }

    #[test]
    fn test_mock_unavailable() {
        assert!(Device::get(&config::Audio::new("mock-unavailable")).is_err());
    }

    #[test]
    fn test_failed_mock_rejects_sources() {
        let device = Device::get(&config::Audio::new("mock")).unwrap();
        device.fail();
        let source = ActiveSource::new(
            next_source_id(),
            Arc::new(vec![0.0; 4]),
            2,
            false,
            CancelHandle::new(),
        );
        assert!(device.add_source(source).is_err());
        assert_eq!(device.sources_added(), 0);
    }
}
