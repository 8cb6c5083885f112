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
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::audio::Audio;
use super::error::ConfigError;

/// Default size of the voice pool.
pub const DEFAULT_MAX_VOICES: u32 = 32;

const DEFAULT_ASSETS: &str = "music";
const DEFAULT_ICONS: &str = "icons";
const DEFAULT_MAPPINGS: &str = "data/mappings.yaml";
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";

/// Behavior when a trigger is played while it's already sounding.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Retrigger {
    /// Stop the previous instance and start a new one.
    #[default]
    Cut,
    /// Allow multiple instances to play simultaneously.
    Polyphonic,
}

/// Board-wide playback behavior.
#[derive(Deserialize, Clone, Debug)]
pub struct Playback {
    /// Number of voices the device may sound at once.
    #[serde(default = "default_max_voices")]
    max_voices: u32,

    /// Default retrigger behavior for bindings that don't set their own.
    #[serde(default)]
    retrigger: Retrigger,

    /// When true, every play stops everything else first.
    #[serde(default)]
    exclusive: bool,

    /// Initial master volume.
    #[serde(default = "default_volume")]
    volume: f32,
}

fn default_max_voices() -> u32 {
    DEFAULT_MAX_VOICES
}

fn default_volume() -> f32 {
    1.0
}

impl Default for Playback {
    fn default() -> Self {
        Playback {
            max_voices: DEFAULT_MAX_VOICES,
            retrigger: Retrigger::default(),
            exclusive: false,
            volume: default_volume(),
        }
    }
}

impl Playback {
    /// Creates a new playback configuration.
    pub fn new(max_voices: u32, retrigger: Retrigger, exclusive: bool, volume: f32) -> Playback {
        Playback {
            max_voices,
            retrigger,
            exclusive,
            volume,
        }
    }

    pub fn max_voices(&self) -> u32 {
        self.max_voices
    }

    pub fn retrigger(&self) -> Retrigger {
        self.retrigger
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_voices == 0 {
            return Err(ConfigError::Playback(
                "max_voices must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Playback(format!(
                "volume {} is outside 0.0..=1.0",
                self.volume
            )));
        }
        Ok(())
    }
}

/// The board configuration: where the assets and mappings live, which device to play
/// through and how playback behaves.
#[derive(Deserialize, Clone, Debug)]
pub struct Board {
    #[serde(default)]
    audio: Audio,

    /// The asset directory, relative to the configuration file.
    #[serde(default = "default_assets")]
    assets: String,

    /// The pad icon directory, relative to the configuration file.
    #[serde(default = "default_icons")]
    icons: String,

    /// The mapping file, relative to the configuration file.
    #[serde(default = "default_mappings")]
    mappings: String,

    /// The address the HTTP server listens on.
    #[serde(default = "default_listen")]
    listen: String,

    #[serde(default)]
    playback: Playback,

    /// The directory relative paths are resolved against.
    #[serde(skip)]
    base: PathBuf,
}

fn default_assets() -> String {
    DEFAULT_ASSETS.to_string()
}

fn default_icons() -> String {
    DEFAULT_ICONS.to_string()
}

fn default_mappings() -> String {
    DEFAULT_MAPPINGS.to_string()
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Board {
    /// Creates a board rooted at the given directory with default paths.
    pub fn new(base: &Path, audio: Audio, playback: Playback) -> Board {
        Board {
            audio,
            assets: default_assets(),
            icons: default_icons(),
            mappings: default_mappings(),
            listen: default_listen(),
            playback,
            base: base.to_path_buf(),
        }
    }

    /// Deserializes a board configuration from the given YAML file.
    pub fn deserialize(path: &Path) -> Result<Board, ConfigError> {
        let board = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Board>()?;
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        board.finish(base)
    }

    /// Parses a board configuration from a YAML string. Relative paths resolve against base.
    pub fn parse(yaml: &str, base: &Path) -> Result<Board, ConfigError> {
        let board = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Board>()?;
        board.finish(base.to_path_buf())
    }

    fn finish(mut self, base: PathBuf) -> Result<Board, ConfigError> {
        self.playback.validate()?;
        self.listen()?;
        self.base = base;
        Ok(self)
    }

    /// Gets the audio configuration.
    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Gets the playback configuration.
    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    /// Gets the resolved asset directory.
    pub fn assets_dir(&self) -> PathBuf {
        self.resolve(&self.assets)
    }

    /// Gets the resolved icon directory.
    pub fn icons_dir(&self) -> PathBuf {
        self.resolve(&self.icons)
    }

    /// Gets the resolved mapping file path.
    pub fn mappings_path(&self) -> PathBuf {
        self.resolve(&self.mappings)
    }

    /// Gets the address to listen on.
    pub fn listen(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|source| ConfigError::Listen {
                listen: self.listen.clone(),
                source,
            })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.base.join(path)
        }
    }
}
