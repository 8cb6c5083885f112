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
use std::{error::Error, fmt, sync::Arc};

use crate::config;

pub mod cpal;
pub mod decode;
pub mod format;
pub mod mixer;
pub mod mock;

pub use format::{SampleFormat, TargetFormat};
pub use mixer::ActiveSource;

/// An audio output device. The device owns a continuously running mixer; sources handed to it
/// start sounding as soon as the mixer picks them up and leave it on their own when they end or
/// are cancelled.
pub trait Device: fmt::Display + Send + Sync {
    /// Hands a source to the device's mixer. Fails if the device can no longer produce output.
    fn add_source(&self, source: ActiveSource) -> Result<(), Box<dyn Error>>;

    /// The sample rate the device mixes at.
    fn sample_rate(&self) -> u32;

    /// The number of output channels.
    fn channels(&self) -> u16;

    /// Sets the master volume. The value is clamped to 0.0..=1.0.
    fn set_volume(&self, volume: f32);

    /// Returns the master volume.
    fn volume(&self) -> f32;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Opens the device described by the audio configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(config)?));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
