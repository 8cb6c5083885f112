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

//! The soundboard: the single entry point that ties the mapping table to playback.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::assets::{AssetError, AssetRef, AssetStore};
use crate::audio::{self, decode::DecodeError, Device};
use crate::config::{self, PersistError};
use crate::icons::IconStore;
use crate::mapping::{Binding, MappingError, MappingTable, PlaybackOptions, Trigger};
use crate::playback::{ChannelManager, PlaybackError, PlaybackInstance, StartOptions};

/// Errors reported by the soundboard.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown trigger: {0}")]
    UnknownTrigger(String),

    #[error("Trigger is already bound: {0}")]
    DuplicateTrigger(String),

    #[error("Invalid trigger: {0:?}")]
    InvalidTrigger(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(#[source] AssetError),

    #[error("Unable to load {}: {source}", .path.display())]
    AssetLoadError { path: PathBuf, source: DecodeError },

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unable to persist mappings: {0}")]
    PersistenceError(#[source] PersistError),
}

impl From<MappingError> for Error {
    fn from(e: MappingError) -> Self {
        match e {
            MappingError::UnknownTrigger(trigger) => Error::UnknownTrigger(trigger),
            MappingError::DuplicateTrigger(trigger) => Error::DuplicateTrigger(trigger),
            MappingError::InvalidTrigger(trigger) => Error::InvalidTrigger(trigger),
            MappingError::InvalidAsset(e) => Error::InvalidAsset(e),
            MappingError::Persist(e) => Error::PersistenceError(e),
        }
    }
}

impl From<PlaybackError> for Error {
    fn from(e: PlaybackError) -> Self {
        match e {
            PlaybackError::DeviceUnavailable(reason) => Error::DeviceUnavailable(reason),
            PlaybackError::AssetLoad { path, source } => Error::AssetLoadError { path, source },
        }
    }
}

impl From<AssetError> for Error {
    fn from(e: AssetError) -> Self {
        Error::InvalidAsset(e)
    }
}

/// Where the audio for a binding comes from.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// A file in the asset directory, or an absolute path.
    Existing { name: Option<String>, file: String },
    /// Uploaded content to store in the asset directory first.
    Upload { file_name: String, bytes: Vec<u8> },
}

impl From<PlaybackOptions> for StartOptions {
    fn from(options: PlaybackOptions) -> Self {
        StartOptions {
            looped: options.looped,
            retrigger: options.retrigger,
            max_voices: options.max_voices,
        }
    }
}

/// The soundboard facade.
pub struct Soundboard {
    assets: Arc<AssetStore>,
    icons: IconStore,
    mappings: MappingTable,
    playback: ChannelManager,
    /// Shared while a trigger is looked up and started or stopped, exclusive while the
    /// bindings change.
    bindings_lock: RwLock<()>,
    /// Serializes operations that change asset or icon files. Taken after `bindings_lock`.
    asset_lock: Mutex<()>,
    exclusive: bool,
}

impl Soundboard {
    /// Opens the board: the asset directory, the mapping file and the audio device. A device
    /// that can't be opened doesn't prevent the board from starting.
    pub fn open(board: &config::Board) -> Result<Soundboard, Box<dyn std::error::Error>> {
        Soundboard::with_device(board, audio::get_device(board.audio()))
    }

    /// Opens the board over an already acquired device.
    pub fn with_device(
        board: &config::Board,
        device: Result<Arc<dyn Device>, Box<dyn std::error::Error>>,
    ) -> Result<Soundboard, Box<dyn std::error::Error>> {
        let playback = ChannelManager::new(device, board.playback())?;
        Soundboard::assemble(board, playback)
    }

    /// Opens the board without an audio device, for editing bindings.
    pub fn offline(board: &config::Board) -> Result<Soundboard, Box<dyn std::error::Error>> {
        let playback = ChannelManager::offline(board.playback())?;
        Soundboard::assemble(board, playback)
    }

    fn assemble(
        board: &config::Board,
        playback: ChannelManager,
    ) -> Result<Soundboard, Box<dyn std::error::Error>> {
        let assets = Arc::new(AssetStore::new(&board.assets_dir())?);
        let icons = IconStore::new(&board.icons_dir())?;
        let mappings = MappingTable::open(&board.mappings_path(), assets.clone())?;

        info!(
            assets = %assets.dir().display(),
            icons = %icons.dir().display(),
            mappings = %mappings.path().display(),
            device = playback.device_name(),
            "Soundboard ready"
        );
        Ok(Soundboard {
            assets,
            icons,
            mappings,
            playback,
            bindings_lock: RwLock::new(()),
            asset_lock: Mutex::new(()),
            exclusive: board.playback().exclusive(),
        })
    }

    /// Plays the asset bound to the trigger.
    pub fn play(&self, trigger: &str) -> Result<PlaybackInstance, Error> {
        let _bindings = self.bindings_lock.read();
        let binding = self.mappings.get(trigger)?;
        if self.exclusive {
            self.playback.stop_all();
        }
        Ok(self.playback.play(
            binding.asset().path(),
            trigger,
            binding.options().into(),
        )?)
    }

    /// Stops every instance of a bound trigger. Stopping a silent trigger succeeds.
    pub fn stop(&self, trigger: &str) -> Result<(), Error> {
        let _bindings = self.bindings_lock.read();
        self.mappings.get(trigger)?;
        self.playback.stop(trigger);
        Ok(())
    }

    /// Stops everything that is sounding.
    pub fn stop_all(&self) -> usize {
        self.playback.stop_all()
    }

    /// Returns true if the trigger has a sounding instance.
    pub fn is_playing(&self, trigger: &str) -> bool {
        self.playback.is_playing(trigger)
    }

    /// The triggers that are sounding right now.
    pub fn playing(&self) -> Vec<String> {
        self.playback.playing()
    }

    /// Binds a trigger to an existing file or to uploaded content.
    pub fn bind(
        &self,
        trigger: &str,
        source: AssetSource,
        options: PlaybackOptions,
        overwrite: bool,
    ) -> Result<Binding, Error> {
        self.bind_with_icon(trigger, source, options, None, overwrite)
    }

    /// Binds a trigger and shows the given icon on its pad. An upload that replaces a file
    /// only stays in place if the binding is persisted.
    pub fn bind_with_icon(
        &self,
        trigger: &str,
        source: AssetSource,
        options: PlaybackOptions,
        icon: Option<&str>,
        overwrite: bool,
    ) -> Result<Binding, Error> {
        let trigger = Trigger::new(trigger)?;
        let _bindings = self.bindings_lock.write();
        let _assets = self.asset_lock.lock();
        if !overwrite && self.mappings.get(trigger.as_str()).is_ok() {
            return Err(Error::DuplicateTrigger(trigger.to_string()));
        }
        if let Some(icon) = icon {
            self.icons.existing(icon)?;
        }
        let icon = icon.map(str::to_string);

        match source {
            AssetSource::Existing { name, file } => {
                let asset = self
                    .assets
                    .locate(name.as_deref().unwrap_or_default(), &file)?;
                self.mappings
                    .bind_with_icon(trigger.clone(), &asset, options, icon, overwrite)?;
            }
            AssetSource::Upload { file_name, bytes } => {
                let pending = self.assets.stage(&file_name, &bytes)?;
                self.playback.forget(pending.asset().path());
                let bound = self.mappings.bind_with_icon(
                    trigger.clone(),
                    pending.asset(),
                    options,
                    icon,
                    overwrite,
                );
                if let Err(e) = bound {
                    let path = pending.asset().path().to_path_buf();
                    self.assets.revert(pending);
                    self.playback.forget(&path);
                    return Err(e.into());
                }
                self.assets.commit(pending);
            }
        }
        Ok(self.mappings.get(trigger.as_str())?)
    }

    /// Removes a binding and silences it.
    pub fn unbind(&self, trigger: &str) -> Result<Binding, Error> {
        let _bindings = self.bindings_lock.write();
        let removed = self.mappings.unbind(trigger)?;
        self.playback.stop(trigger);
        Ok(removed)
    }

    /// Renames a trigger. Instances still sounding under the old name are stopped.
    pub fn rename(&self, trigger: &str, new_trigger: &str) -> Result<Binding, Error> {
        let new_trigger = Trigger::new(new_trigger)?;
        let _bindings = self.bindings_lock.write();
        let renamed = self.mappings.rename(trigger, new_trigger)?;
        self.playback.stop(trigger);
        Ok(renamed)
    }

    /// Sets or clears the icon shown on a trigger's pad. The icon must exist.
    pub fn set_icon(&self, trigger: &str, icon: Option<&str>) -> Result<Binding, Error> {
        let _assets = self.asset_lock.lock();
        if let Some(icon) = icon {
            self.icons.existing(icon)?;
        }
        Ok(self.mappings.set_icon(trigger, icon.map(str::to_string))?)
    }

    /// Looks up the asset bound to a trigger.
    pub fn resolve(&self, trigger: &str) -> Result<AssetRef, Error> {
        Ok(self.mappings.resolve(trigger)?)
    }

    /// Looks up a binding.
    pub fn binding(&self, trigger: &str) -> Result<Binding, Error> {
        Ok(self.mappings.get(trigger)?)
    }

    /// All bindings in trigger order.
    pub fn list(&self) -> Vec<Binding> {
        self.mappings.list()
    }

    /// Sets the master volume, clamped to 0.0..=1.0. Returns the applied level.
    pub fn set_volume(&self, level: f32) -> Result<f32, Error> {
        Ok(self.playback.set_volume(level)?)
    }

    /// The master volume.
    pub fn volume(&self) -> Result<f32, Error> {
        Ok(self.playback.volume()?)
    }

    /// The audio files in the asset directory.
    pub fn assets(&self) -> Result<Vec<AssetRef>, Error> {
        Ok(self.assets.list()?)
    }

    /// Stores uploaded content in the asset directory.
    pub fn import_asset(&self, file_name: &str, bytes: &[u8]) -> Result<AssetRef, Error> {
        let _assets = self.asset_lock.lock();
        let asset = self.assets.import(file_name, bytes)?;
        self.playback.forget(asset.path());
        Ok(asset)
    }

    /// Renames a file in the asset directory and points its bindings at the new name. If the
    /// bindings can't be persisted the file keeps its old name.
    pub fn rename_asset(&self, old: &str, new: &str) -> Result<AssetRef, Error> {
        let _bindings = self.bindings_lock.write();
        let _assets = self.asset_lock.lock();
        let old_asset = self.assets.existing(old)?;
        let renamed = self.assets.rename(old, new)?;
        self.playback.forget(old_asset.path());

        if let Err(e) = self
            .mappings
            .rebind_file(old_asset.path(), old_asset.name(), &renamed)
        {
            if let Err(revert) = self.assets.rename(renamed.file(), old) {
                error!(
                    old,
                    new = renamed.file(),
                    err = %revert,
                    "Unable to restore asset name after failed rebind"
                );
            }
            return Err(e.into());
        }
        Ok(renamed)
    }

    /// Deletes a file from the asset directory. Triggers bound to it are stopped and unbound
    /// first. Returns the unbound triggers.
    pub fn delete_asset(&self, file: &str) -> Result<Vec<Trigger>, Error> {
        let _bindings = self.bindings_lock.write();
        let _assets = self.asset_lock.lock();
        let asset = self.assets.existing(file)?;

        for trigger in self.mappings.triggers_for(asset.path()) {
            self.playback.stop(trigger.as_str());
        }
        let removed = self.mappings.unbind_file(asset.path())?;
        self.assets.delete(file)?;
        self.playback.forget(asset.path());

        Ok(removed
            .into_iter()
            .map(|binding| binding.trigger().clone())
            .collect())
    }

    /// The content of an asset file.
    pub fn read_asset(&self, file: &str) -> Result<Vec<u8>, Error> {
        Ok(self.assets.read(file)?)
    }

    /// The icon files.
    pub fn icons(&self) -> Result<Vec<String>, Error> {
        Ok(self.icons.list()?)
    }

    /// Stores an uploaded image in the icon directory.
    pub fn import_icon(&self, file_name: &str, bytes: &[u8]) -> Result<String, Error> {
        let _assets = self.asset_lock.lock();
        Ok(self.icons.import(file_name, bytes)?)
    }

    /// Renames an icon and updates the pads that show it. If the bindings can't be persisted
    /// the icon keeps its old name.
    pub fn rename_icon(&self, old: &str, new: &str) -> Result<String, Error> {
        let _assets = self.asset_lock.lock();
        let renamed = self.icons.rename(old, new)?;

        if let Err(e) = self.mappings.rename_icon(old, &renamed) {
            if let Err(revert) = self.icons.rename(&renamed, old) {
                error!(
                    old,
                    new = renamed.as_str(),
                    err = %revert,
                    "Unable to restore icon name after failed update"
                );
            }
            return Err(e.into());
        }
        Ok(renamed)
    }

    /// Deletes an icon. The pads showing it lose their icon first. Returns those triggers.
    pub fn delete_icon(&self, file: &str) -> Result<Vec<Trigger>, Error> {
        let _assets = self.asset_lock.lock();
        self.icons.existing(file)?;
        let cleared = self.mappings.clear_icon(file)?;
        self.icons.delete(file)?;
        Ok(cleared)
    }

    /// The content and content type of an icon.
    pub fn read_icon(&self, file: &str) -> Result<(Vec<u8>, &'static str), Error> {
        Ok(self.icons.read(file)?)
    }

    /// Decodes every bound asset ahead of time. Returns the number of files ready to play.
    pub fn warm(&self) -> usize {
        let paths: BTreeSet<PathBuf> = self
            .mappings
            .list()
            .iter()
            .map(|binding| binding.asset().path().to_path_buf())
            .collect();
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        let ready = self.playback.preload(&paths);
        info!(ready, total = paths.len(), "Warmed asset cache");
        ready
    }

    /// Describes the audio device.
    pub fn device_name(&self) -> String {
        self.playback.device_name()
    }

    /// The asset directory.
    pub fn assets_dir(&self) -> &Path {
        self.assets.dir()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::audio::mock;
    use crate::config::{Playback, Retrigger};
    use crate::playsync::PlayState;
    use crate::testutil::{eventually, png_bytes, wav_bytes, write_wav};

    struct Fixture {
        _dir: tempfile::TempDir,
        board: config::Board,
        device: Arc<mock::Device>,
        soundboard: Soundboard,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture::with_playback(Playback::default())
        }

        fn with_playback(playback: Playback) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let board = config::Board::new(dir.path(), config::Audio::new("mock"), playback);
            let device = Arc::new(mock::Device::get(board.audio()).unwrap());
            let shared: Arc<dyn Device> = device.clone();
            let soundboard = Soundboard::with_device(&board, Ok(shared)).unwrap();
            Fixture {
                _dir: dir,
                board,
                device,
                soundboard,
            }
        }

        fn wav(&self, file: &str, seconds: f32) {
            write_wav(&self.board.assets_dir().join(file), 2, 44100, seconds);
        }

        fn bind(&self, trigger: &str, file: &str) -> Result<Binding, Error> {
            self.soundboard.bind(
                trigger,
                existing(file),
                PlaybackOptions::default(),
                false,
            )
        }

        fn reopen(&self) -> Soundboard {
            let device: Arc<dyn Device> =
                Arc::new(mock::Device::get(self.board.audio()).unwrap());
            Soundboard::with_device(&self.board, Ok(device)).unwrap()
        }

        fn break_mappings(&self) {
            let path = self.board.mappings_path();
            fs::remove_file(&path).unwrap();
            fs::create_dir(&path).unwrap();
            fs::write(path.join("blocker"), "x").unwrap();
        }
    }

    fn existing(file: &str) -> AssetSource {
        AssetSource::Existing {
            name: None,
            file: file.to_string(),
        }
    }

    fn triggers(soundboard: &Soundboard) -> Vec<String> {
        soundboard
            .list()
            .iter()
            .map(|binding| binding.trigger().to_string())
            .collect()
    }

    #[test]
    fn test_drumroll_scenario() {
        let fixture = Fixture::new();
        fixture.wav("drumroll.wav", 2.0);

        fixture.bind("drumroll", "drumroll.wav").unwrap();
        let listed = fixture.soundboard.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].trigger().as_str(), "drumroll");
        assert_eq!(listed[0].asset().file(), "drumroll.wav");

        let instance = fixture.soundboard.play("drumroll").unwrap();
        assert!(instance.is_playing());
        assert!(fixture.soundboard.is_playing("drumroll"));
        assert_eq!(fixture.soundboard.playing(), vec!["drumroll"]);

        fixture.soundboard.stop("drumroll").unwrap();
        assert!(!fixture.soundboard.is_playing("drumroll"));
        assert_eq!(instance.state(), PlayState::Cancelled);

        // Stopping again changes nothing and succeeds.
        fixture.soundboard.stop("drumroll").unwrap();
        assert!(!fixture.soundboard.is_playing("drumroll"));
    }

    #[test]
    fn test_duplicate_bind_keeps_original() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.wav("b.wav", 0.1);

        fixture.bind("drumroll", "a.wav").unwrap();
        assert!(matches!(
            fixture.bind("drumroll", "b.wav"),
            Err(Error::DuplicateTrigger(_))
        ));
        assert_eq!(
            fixture.soundboard.resolve("drumroll").unwrap().file(),
            "a.wav"
        );

        let rebound = fixture
            .soundboard
            .bind(
                "drumroll",
                existing("b.wav"),
                PlaybackOptions::default(),
                true,
            )
            .unwrap();
        assert_eq!(rebound.asset().file(), "b.wav");
    }

    #[test]
    fn test_unknown_trigger() {
        let fixture = Fixture::new();

        assert!(matches!(
            fixture.soundboard.play("nothing"),
            Err(Error::UnknownTrigger(_))
        ));
        assert_eq!(fixture.device.sources_added(), 0);
        assert!(matches!(
            fixture.soundboard.stop("nothing"),
            Err(Error::UnknownTrigger(_))
        ));
        assert!(matches!(
            fixture.soundboard.unbind("nothing"),
            Err(Error::UnknownTrigger(_))
        ));
        assert!(matches!(
            fixture.soundboard.resolve("nothing"),
            Err(Error::UnknownTrigger(_))
        ));
        assert!(!fixture.soundboard.is_playing("nothing"));
    }

    #[test]
    fn test_bind_validation() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);

        assert!(matches!(
            fixture.bind("  ", "a.wav"),
            Err(Error::InvalidTrigger(_))
        ));
        assert!(matches!(
            fixture.bind("x", "missing.wav"),
            Err(Error::InvalidAsset(_))
        ));
        assert!(matches!(
            fixture.bind("x", "a.txt"),
            Err(Error::InvalidAsset(_))
        ));
        assert!(fixture.soundboard.list().is_empty());
    }

    #[test]
    fn test_bind_upload() {
        let fixture = Fixture::new();

        let binding = fixture
            .soundboard
            .bind(
                "horn",
                AssetSource::Upload {
                    file_name: "horn.wav".to_string(),
                    bytes: wav_bytes(1, 22050, 0.1),
                },
                PlaybackOptions::default(),
                false,
            )
            .unwrap();
        assert_eq!(binding.asset().name(), "horn");
        assert!(fixture.board.assets_dir().join("horn.wav").is_file());

        assert!(matches!(
            fixture.soundboard.bind(
                "junk",
                AssetSource::Upload {
                    file_name: "junk.wav".to_string(),
                    bytes: b"not audio".to_vec(),
                },
                PlaybackOptions::default(),
                false,
            ),
            Err(Error::InvalidAsset(_))
        ));
        assert!(!fixture.board.assets_dir().join("junk.wav").exists());
        assert_eq!(triggers(&fixture.soundboard), vec!["horn"]);
    }

    #[test]
    fn test_natural_completion_clears_playing() {
        let fixture = Fixture::new();
        fixture.wav("blip.wav", 0.05);
        fixture.bind("blip", "blip.wav").unwrap();

        let instance = fixture.soundboard.play("blip").unwrap();
        assert_eq!(
            instance.wait_timeout(Duration::from_secs(3)),
            PlayState::Finished
        );
        eventually(
            || !fixture.soundboard.is_playing("blip") && fixture.soundboard.playing().is_empty(),
            "blip never stopped playing",
        );
    }

    #[test]
    fn test_unbind_stops_playback() {
        let fixture = Fixture::new();
        fixture.wav("bed.wav", 2.0);
        fixture.bind("bed", "bed.wav").unwrap();

        let instance = fixture.soundboard.play("bed").unwrap();
        fixture.soundboard.unbind("bed").unwrap();
        assert_eq!(instance.state(), PlayState::Cancelled);
        assert!(!fixture.soundboard.is_playing("bed"));
        assert!(fixture.soundboard.list().is_empty());
    }

    #[test]
    fn test_persisted_across_restart() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.wav("b.wav", 0.1);
        fixture.bind("zulu", "a.wav").unwrap();
        fixture
            .soundboard
            .bind(
                "alpha",
                existing("b.wav"),
                PlaybackOptions {
                    looped: true,
                    retrigger: Some(Retrigger::Polyphonic),
                    max_voices: None,
                },
                false,
            )
            .unwrap();

        let before = fixture.soundboard.list();
        let reopened = fixture.reopen();
        assert_eq!(reopened.list(), before);
        assert_eq!(triggers(&reopened), vec!["alpha", "zulu"]);
    }

    #[test]
    fn test_concurrent_binds() {
        let fixture = Arc::new(Fixture::new());
        fixture.wav("a.wav", 0.1);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let fixture = fixture.clone();
                std::thread::spawn(move || {
                    fixture.bind(&format!("key-{}", i), "a.wav").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fixture.soundboard.list().len(), 8);
        assert_eq!(fixture.reopen().list().len(), 8);
    }

    #[test]
    fn test_device_unavailable_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let board = config::Board::new(
            dir.path(),
            config::Audio::new("mock-unavailable"),
            Playback::default(),
        );
        let soundboard = Soundboard::open(&board).unwrap();
        write_wav(&board.assets_dir().join("a.wav"), 1, 22050, 0.1);

        soundboard
            .bind("a", existing("a.wav"), PlaybackOptions::default(), false)
            .unwrap();
        assert_eq!(soundboard.list().len(), 1);
        assert!(matches!(
            soundboard.play("a"),
            Err(Error::DeviceUnavailable(_))
        ));
        assert!(matches!(
            soundboard.set_volume(0.5),
            Err(Error::DeviceUnavailable(_))
        ));
        soundboard.stop("a").unwrap();
        soundboard.unbind("a").unwrap();
        assert!(soundboard.list().is_empty());
    }

    #[test]
    fn test_asset_load_error() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("a", "a.wav").unwrap();
        fs::write(fixture.board.assets_dir().join("a.wav"), b"truncated").unwrap();

        assert!(matches!(
            fixture.soundboard.play("a"),
            Err(Error::AssetLoadError { .. })
        ));
    }

    #[test]
    fn test_bind_persist_failure() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("keep", "a.wav").unwrap();
        fixture.break_mappings();

        assert!(matches!(
            fixture.bind("lost", "a.wav"),
            Err(Error::PersistenceError(_))
        ));
        assert_eq!(triggers(&fixture.soundboard), vec!["keep"]);
    }

    #[test]
    fn test_rename_trigger() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 2.0);
        fixture.bind("old", "a.wav").unwrap();
        fixture.soundboard.play("old").unwrap();

        let renamed = fixture.soundboard.rename("old", "new").unwrap();
        assert_eq!(renamed.trigger().as_str(), "new");
        assert!(!fixture.soundboard.is_playing("old"));
        assert!(matches!(
            fixture.soundboard.resolve("old"),
            Err(Error::UnknownTrigger(_))
        ));
        assert!(matches!(
            fixture.soundboard.rename("new", ""),
            Err(Error::InvalidTrigger(_))
        ));
    }

    #[test]
    fn test_exclusive_mode() {
        let fixture = Fixture::with_playback(Playback::new(8, Retrigger::Cut, true, 1.0));
        fixture.wav("a.wav", 2.0);
        fixture.bind("a", "a.wav").unwrap();
        fixture.bind("b", "a.wav").unwrap();

        let a = fixture.soundboard.play("a").unwrap();
        fixture.soundboard.play("b").unwrap();
        assert_eq!(a.state(), PlayState::Cancelled);
        assert_eq!(fixture.soundboard.playing(), vec!["b"]);
    }

    #[test]
    fn test_stop_all() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 2.0);
        fixture.bind("a", "a.wav").unwrap();
        fixture.bind("b", "a.wav").unwrap();
        fixture.soundboard.play("a").unwrap();
        fixture.soundboard.play("b").unwrap();

        assert_eq!(fixture.soundboard.stop_all(), 2);
        assert!(fixture.soundboard.playing().is_empty());
        assert_eq!(fixture.soundboard.stop_all(), 0);
    }

    #[test]
    fn test_volume() {
        let fixture = Fixture::new();
        assert_eq!(fixture.soundboard.volume().unwrap(), 1.0);
        assert_eq!(fixture.soundboard.set_volume(2.0).unwrap(), 1.0);
        assert_eq!(fixture.soundboard.set_volume(0.3).unwrap(), 0.3);
        assert_eq!(fixture.device.volume(), 0.3);
    }

    #[test]
    fn test_rename_asset_rebinds() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();

        let renamed = fixture.soundboard.rename_asset("a.wav", "cheer").unwrap();
        assert_eq!(renamed.file(), "cheer.wav");
        assert_eq!(
            fixture.soundboard.resolve("one").unwrap().file(),
            "cheer.wav"
        );
        assert_eq!(
            fixture.reopen().resolve("one").unwrap().file(),
            "cheer.wav"
        );
        fixture.soundboard.play("one").unwrap();

        assert!(matches!(
            fixture.soundboard.rename_asset("gone.wav", "x"),
            Err(Error::InvalidAsset(_))
        ));
    }

    #[test]
    fn test_rename_asset_reverted_on_persist_failure() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();
        fixture.break_mappings();

        assert!(matches!(
            fixture.soundboard.rename_asset("a.wav", "b.wav"),
            Err(Error::PersistenceError(_))
        ));
        assert!(fixture.board.assets_dir().join("a.wav").is_file());
        assert!(!fixture.board.assets_dir().join("b.wav").exists());
        assert_eq!(fixture.soundboard.resolve("one").unwrap().file(), "a.wav");
    }

    #[test]
    fn test_delete_asset() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 2.0);
        fixture.wav("b.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();
        fixture.bind("two", "a.wav").unwrap();
        fixture.bind("three", "b.wav").unwrap();
        let instance = fixture.soundboard.play("one").unwrap();

        let removed = fixture.soundboard.delete_asset("a.wav").unwrap();
        let removed: Vec<&str> = removed.iter().map(|t| t.as_str()).collect();
        assert_eq!(removed, vec!["one", "two"]);
        assert_eq!(instance.state(), PlayState::Cancelled);
        assert!(!fixture.board.assets_dir().join("a.wav").exists());
        assert_eq!(triggers(&fixture.soundboard), vec!["three"]);

        assert!(matches!(
            fixture.soundboard.delete_asset("a.wav"),
            Err(Error::InvalidAsset(_))
        ));
    }

    #[test]
    fn test_assets_and_read() {
        let fixture = Fixture::new();
        let bytes = wav_bytes(1, 22050, 0.1);
        fixture.soundboard.import_asset("zap.wav", &bytes).unwrap();
        fixture.wav("applause.wav", 0.1);

        let files: Vec<String> = fixture
            .soundboard
            .assets()
            .unwrap()
            .iter()
            .map(|asset| asset.file().to_string())
            .collect();
        assert_eq!(files, vec!["applause.wav", "zap.wav"]);
        assert_eq!(fixture.soundboard.read_asset("zap.wav").unwrap(), bytes);
        assert!(matches!(
            fixture.soundboard.read_asset("../mappings.yaml"),
            Err(Error::InvalidAsset(_))
        ));
    }

    #[test]
    fn test_warm() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.wav("b.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();
        fixture.bind("two", "a.wav").unwrap();
        fixture.bind("three", "b.wav").unwrap();

        assert_eq!(fixture.soundboard.warm(), 2);
    }

    /// Plays on one thread while the binding changes on another. Returns whether the play
    /// started; a play that lost the race must report the trigger as unknown.
    fn race_play<F>(fixture: &Arc<Fixture>, trigger: &str, change: F) -> Option<PlaybackInstance>
    where
        F: FnOnce(),
    {
        let player = {
            let fixture = fixture.clone();
            let trigger = trigger.to_string();
            thread::spawn(move || {
                fixture
                    .soundboard
                    .play(&trigger)
                    .map_err(|e| matches!(e, Error::UnknownTrigger(_)))
            })
        };
        thread::sleep(Duration::from_micros(300));
        change();
        match player.join().unwrap() {
            Ok(instance) => Some(instance),
            Err(unknown) => {
                assert!(unknown, "play failed with something other than an unknown trigger");
                None
            }
        }
    }

    #[test]
    fn test_unbind_during_play_leaves_nothing_sounding() {
        let fixture = Arc::new(Fixture::new());

        for round in 0..20 {
            // A fresh file each round so the play has to decode.
            let file = format!("bed-{}.wav", round);
            fixture.wav(&file, 5.0);
            fixture.bind("bed", &file).unwrap();

            let instance = race_play(&fixture, "bed", || {
                fixture.soundboard.unbind("bed").unwrap();
            });
            assert!(!fixture.soundboard.is_playing("bed"), "round {}", round);
            if let Some(instance) = instance {
                assert_eq!(instance.state(), PlayState::Cancelled, "round {}", round);
            }
        }
        eventually(
            || fixture.device.active_sources() == 0,
            "unbound trigger kept sounding",
        );
    }

    #[test]
    fn test_rename_during_play_leaves_old_trigger_silent() {
        let fixture = Arc::new(Fixture::new());

        for round in 0..20 {
            let file = format!("bed-{}.wav", round);
            fixture.wav(&file, 5.0);
            fixture.bind("old", &file).unwrap();

            let instance = race_play(&fixture, "old", || {
                fixture.soundboard.rename("old", "new").unwrap();
            });
            assert!(!fixture.soundboard.is_playing("old"), "round {}", round);
            if let Some(instance) = instance {
                assert_eq!(instance.state(), PlayState::Cancelled, "round {}", round);
            }
            fixture.soundboard.unbind("new").unwrap();
        }
        assert!(fixture.soundboard.playing().is_empty());
    }

    #[test]
    fn test_concurrent_cut_keeps_one_voice() {
        let fixture = Arc::new(Fixture::new());
        fixture.wav("bed.wav", 0.2);
        fixture
            .soundboard
            .bind(
                "bed",
                existing("bed.wav"),
                PlaybackOptions {
                    looped: true,
                    retrigger: Some(Retrigger::Cut),
                    max_voices: None,
                },
                false,
            )
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fixture = fixture.clone();
                thread::spawn(move || fixture.soundboard.play("bed").unwrap())
            })
            .collect();
        let instances: Vec<PlaybackInstance> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(instances.iter().filter(|i| i.is_playing()).count(), 1);
        assert_eq!(fixture.soundboard.playing(), vec!["bed"]);
        eventually(
            || fixture.device.active_sources() == 1,
            "cut instances kept sounding",
        );
        fixture.soundboard.stop_all();
    }

    #[test]
    fn test_failed_upload_bind_keeps_existing_file() {
        let fixture = Fixture::new();
        fixture.wav("x.wav", 0.1);
        fixture.bind("a", "x.wav").unwrap();
        let original = fixture.soundboard.read_asset("x.wav").unwrap();
        fixture.break_mappings();

        assert!(matches!(
            fixture.soundboard.bind(
                "b",
                AssetSource::Upload {
                    file_name: "x.wav".to_string(),
                    bytes: wav_bytes(1, 22050, 0.3),
                },
                PlaybackOptions::default(),
                false,
            ),
            Err(Error::PersistenceError(_))
        ));
        assert_eq!(fixture.soundboard.read_asset("x.wav").unwrap(), original);
        assert_eq!(triggers(&fixture.soundboard), vec!["a"]);
        assert_eq!(fixture.soundboard.assets().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_upload_bind_removes_new_file() {
        let fixture = Fixture::new();
        fixture.break_mappings();

        assert!(matches!(
            fixture.soundboard.bind(
                "horn",
                AssetSource::Upload {
                    file_name: "horn.wav".to_string(),
                    bytes: wav_bytes(1, 22050, 0.1),
                },
                PlaybackOptions::default(),
                false,
            ),
            Err(Error::PersistenceError(_))
        ));
        assert!(!fixture.board.assets_dir().join("horn.wav").exists());
        assert!(fixture.soundboard.list().is_empty());
    }

    #[test]
    fn test_offline() {
        let dir = tempfile::tempdir().unwrap();
        let board = config::Board::new(dir.path(), config::Audio::new("mock"), Playback::default());
        let soundboard = Soundboard::offline(&board).unwrap();
        write_wav(&board.assets_dir().join("a.wav"), 1, 22050, 0.1);

        soundboard
            .bind("a", existing("a.wav"), PlaybackOptions::default(), false)
            .unwrap();
        assert!(soundboard.device_name().contains("without an audio device"));
        assert!(matches!(
            soundboard.play("a"),
            Err(Error::DeviceUnavailable(_))
        ));
        assert_eq!(triggers(&soundboard), vec!["a"]);
    }

    #[test]
    fn test_icons() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();
        fixture.bind("two", "a.wav").unwrap();

        fixture
            .soundboard
            .import_icon("star.png", &png_bytes())
            .unwrap();
        assert_eq!(fixture.soundboard.icons().unwrap(), vec!["star.png"]);
        let (bytes, mime) = fixture.soundboard.read_icon("star.png").unwrap();
        assert_eq!(bytes, png_bytes());
        assert_eq!(mime, "image/png");

        fixture.soundboard.set_icon("one", Some("star.png")).unwrap();
        fixture.soundboard.set_icon("two", Some("star.png")).unwrap();
        assert!(matches!(
            fixture.soundboard.set_icon("one", Some("missing.png")),
            Err(Error::InvalidAsset(_))
        ));
        assert!(matches!(
            fixture.soundboard.set_icon("nope", None),
            Err(Error::UnknownTrigger(_))
        ));

        assert_eq!(
            fixture.soundboard.rename_icon("star.png", "moon").unwrap(),
            "moon.png"
        );
        assert_eq!(
            fixture.soundboard.binding("one").unwrap().icon(),
            Some("moon.png")
        );
        assert_eq!(
            fixture.reopen().binding("two").unwrap().icon(),
            Some("moon.png")
        );

        let cleared = fixture.soundboard.delete_icon("moon.png").unwrap();
        assert_eq!(cleared.len(), 2);
        assert!(fixture.soundboard.icons().unwrap().is_empty());
        assert!(fixture
            .reopen()
            .list()
            .iter()
            .all(|binding| binding.icon().is_none()));
    }

    #[test]
    fn test_bind_with_icon() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture
            .soundboard
            .import_icon("star.png", &png_bytes())
            .unwrap();

        assert!(matches!(
            fixture.soundboard.bind_with_icon(
                "one",
                existing("a.wav"),
                PlaybackOptions::default(),
                Some("gone.png"),
                false,
            ),
            Err(Error::InvalidAsset(_))
        ));
        assert!(fixture.soundboard.list().is_empty());

        let binding = fixture
            .soundboard
            .bind_with_icon(
                "one",
                existing("a.wav"),
                PlaybackOptions::default(),
                Some("star.png"),
                false,
            )
            .unwrap();
        assert_eq!(binding.icon(), Some("star.png"));

        // Renaming the trigger keeps its icon; clearing removes it.
        assert_eq!(
            fixture.soundboard.rename("one", "uno").unwrap().icon(),
            Some("star.png")
        );
        assert_eq!(fixture.soundboard.set_icon("uno", None).unwrap().icon(), None);
    }

    #[test]
    fn test_rename_icon_reverted_on_persist_failure() {
        let fixture = Fixture::new();
        fixture.wav("a.wav", 0.1);
        fixture.bind("one", "a.wav").unwrap();
        fixture
            .soundboard
            .import_icon("star.png", &png_bytes())
            .unwrap();
        fixture.soundboard.set_icon("one", Some("star.png")).unwrap();
        fixture.break_mappings();

        assert!(matches!(
            fixture.soundboard.rename_icon("star.png", "moon.png"),
            Err(Error::PersistenceError(_))
        ));
        assert_eq!(fixture.soundboard.icons().unwrap(), vec!["star.png"]);
        assert!(matches!(
            fixture.soundboard.delete_icon("star.png"),
            Err(Error::PersistenceError(_))
        ));
        assert_eq!(fixture.soundboard.icons().unwrap(), vec!["star.png"]);
        assert_eq!(
            fixture.soundboard.binding("one").unwrap().icon(),
            Some("star.png")
        );
    }
}
