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

use std::{error::Error, fmt, str::FromStr};

/// Sample format of the device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (16 or 32 bit).
    Int,
    /// 32-bit floating point samples.
    Float,
}

impl FromStr for SampleFormat {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "float" | "Float" => Ok(SampleFormat::Float),
            "int" | "Int" => Ok(SampleFormat::Int),
            _ => Err(format!("Unsupported sample format: {}", s).into()),
        }
    }
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The format a device stream is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved output channels
    pub channels: u16,
    /// Sample format (integer or float)
    pub sample_format: SampleFormat,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl TargetFormat {
    /// Creates a new TargetFormat, rejecting combinations the output callbacks cannot produce.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        bits_per_sample: u16,
    ) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }
        if channels == 0 {
            return Err("Channel count must be greater than 0".into());
        }
        match (sample_format, bits_per_sample) {
            (SampleFormat::Float, 32) | (SampleFormat::Int, 16) | (SampleFormat::Int, 32) => {}
            _ => {
                return Err(format!(
                    "Unsupported output format: {}-bit {}",
                    bits_per_sample, sample_format
                )
                .into())
            }
        }

        Ok(TargetFormat {
            sample_rate,
            channels,
            sample_format,
            bits_per_sample,
        })
    }
}

impl Default for TargetFormat {
    /// 44.1kHz stereo float.
    fn default() -> Self {
        TargetFormat {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::Float,
            bits_per_sample: 32,
        }
    }
}
