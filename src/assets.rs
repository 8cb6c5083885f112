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

//! The asset directory: audio files that can be bound to triggers.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audio::decode::{self, DecodeError};

/// Errors produced by the asset store.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid asset name: {0:?}")]
    InvalidName(String),

    #[error("Asset not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Asset already exists: {0}")]
    Exists(String),

    #[error("Not a supported image: {0}")]
    NotAnImage(String),

    #[error("Unable to decode {}: {source}", .path.display())]
    Undecodable { path: PathBuf, source: DecodeError },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AssetError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> AssetError {
        if source.kind() == ErrorKind::NotFound {
            return AssetError::NotFound(path.to_path_buf());
        }
        AssetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Supported audio formats, by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
}

impl AssetFormat {
    /// Determines the format from a file's extension.
    pub fn from_path(path: &Path) -> Option<AssetFormat> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "wav" | "wave" => Some(AssetFormat::Wav),
            "mp3" => Some(AssetFormat::Mp3),
            "flac" => Some(AssetFormat::Flac),
            "ogg" | "oga" => Some(AssetFormat::Ogg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetFormat::Wav => "wav",
            AssetFormat::Mp3 => "mp3",
            AssetFormat::Flac => "flac",
            AssetFormat::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to an audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    name: String,
    file: String,
    path: PathBuf,
    format: AssetFormat,
}

impl AssetRef {
    /// The logical name of the asset.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file as it was given, relative to the asset directory or absolute.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The resolved path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> AssetFormat {
        self.format
    }

    /// Returns a copy of this asset under a different logical name.
    pub fn with_name(&self, name: &str) -> AssetRef {
        AssetRef {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.file)
    }
}

/// An upload that is on disk but not yet committed.
#[derive(Debug)]
pub struct PendingImport {
    asset: AssetRef,
    /// Where the file it replaced was moved.
    backup: Option<PathBuf>,
}

impl PendingImport {
    pub fn asset(&self) -> &AssetRef {
        &self.asset
    }
}

/// Resolves asset names to files in a single directory and manages their content.
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    /// Opens the asset directory, creating it if needed.
    pub fn new(dir: &Path) -> Result<AssetStore, AssetError> {
        fs::create_dir_all(dir).map_err(|e| AssetError::io(dir, e))?;
        Ok(AssetStore {
            dir: dir.to_path_buf(),
        })
    }

    /// The asset directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves a file against the asset directory. Absolute paths are kept as they are.
    pub fn path_of(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        if path.is_absolute() {
            path
        } else {
            self.dir.join(path)
        }
    }

    /// Builds a reference without touching the file. Only the format is checked.
    pub fn locate(&self, name: &str, file: &str) -> Result<AssetRef, AssetError> {
        if file.trim().is_empty() {
            return Err(AssetError::InvalidName(file.to_string()));
        }
        let path = self.path_of(file);
        let format = AssetFormat::from_path(&path)
            .ok_or_else(|| AssetError::UnsupportedFormat(file.to_string()))?;
        let name = if name.trim().is_empty() {
            default_name(file)
        } else {
            name.to_string()
        };

        Ok(AssetRef {
            name,
            file: file.to_string(),
            path,
            format,
        })
    }

    /// Resolves a file into a reference, verifying that it exists and is decodable audio.
    pub fn resolve(&self, name: &str, file: &str) -> Result<AssetRef, AssetError> {
        let asset = self.locate(name, file)?;
        if !asset.path.is_file() {
            return Err(AssetError::NotFound(asset.path));
        }
        decode::probe(&asset.path).map_err(|source| AssetError::Undecodable {
            path: asset.path.clone(),
            source,
        })?;
        Ok(asset)
    }

    /// Returns the reference to a file that exists in the asset directory itself.
    pub fn existing(&self, file: &str) -> Result<AssetRef, AssetError> {
        validate_file_name(file)?;
        let asset = self.locate("", file)?;
        if !asset.path.is_file() {
            return Err(AssetError::NotFound(asset.path));
        }
        Ok(asset)
    }

    /// Stores uploaded bytes under the given file name. The content is probed before it
    /// replaces anything; data that isn't audio is discarded.
    pub fn import(&self, file_name: &str, bytes: &[u8]) -> Result<AssetRef, AssetError> {
        let pending = self.stage(file_name, bytes)?;
        Ok(self.commit(pending))
    }

    /// Puts uploaded bytes in place under the given file name, keeping any file they replace
    /// aside until the import is committed or reverted.
    pub fn stage(&self, file_name: &str, bytes: &[u8]) -> Result<PendingImport, AssetError> {
        validate_file_name(file_name)?;
        let target = self.dir.join(file_name);
        let format = AssetFormat::from_path(&target)
            .ok_or_else(|| AssetError::UnsupportedFormat(file_name.to_string()))?;

        // Keep the extension last so the probe gets the right hint.
        let staging = self.dir.join(format!(".upload-{}", file_name));
        fs::write(&staging, bytes).map_err(|e| AssetError::io(&staging, e))?;
        if let Err(source) = decode::probe(&staging) {
            let _ = fs::remove_file(&staging);
            return Err(AssetError::Undecodable {
                path: target,
                source,
            });
        }

        let backup = if target.exists() {
            let backup = self.dir.join(format!(".replaced-{}", file_name));
            if let Err(e) = fs::rename(&target, &backup) {
                let _ = fs::remove_file(&staging);
                return Err(AssetError::io(&target, e));
            }
            Some(backup)
        } else {
            None
        };
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &target);
            }
            return Err(AssetError::io(&target, e));
        }

        debug!(
            file = file_name,
            bytes = bytes.len(),
            replaced = backup.is_some(),
            "Staged asset"
        );
        Ok(PendingImport {
            asset: AssetRef {
                name: default_name(file_name),
                file: file_name.to_string(),
                path: target,
                format,
            },
            backup,
        })
    }

    /// Keeps a staged import and drops the file it replaced.
    pub fn commit(&self, pending: PendingImport) -> AssetRef {
        if let Some(backup) = &pending.backup {
            if let Err(e) = fs::remove_file(backup) {
                warn!(path = ?backup, err = %e, "Unable to remove replaced asset");
            }
        }
        info!(file = pending.asset.file(), "Imported asset");
        pending.asset
    }

    /// Undoes a staged import: the replaced file comes back, or the new file goes away.
    pub fn revert(&self, pending: PendingImport) {
        let target = pending.asset.path();
        let result = match &pending.backup {
            Some(backup) => fs::rename(backup, target),
            None => fs::remove_file(target),
        };
        match result {
            Ok(()) => debug!(file = pending.asset.file(), "Reverted asset import"),
            Err(e) => warn!(path = ?target, err = %e, "Unable to revert asset import"),
        }
    }

    /// Lists the supported audio files in the asset directory, sorted by file name.
    pub fn list(&self) -> Result<Vec<AssetRef>, AssetError> {
        let mut assets = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| AssetError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| AssetError::io(&self.dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if file.starts_with('.') {
                continue;
            }
            if let Some(format) = AssetFormat::from_path(&path) {
                assets.push(AssetRef {
                    name: default_name(file),
                    file: file.to_string(),
                    path: path.clone(),
                    format,
                });
            }
        }
        assets.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(assets)
    }

    /// Renames a file in the asset directory. If the new name doesn't carry the old
    /// extension, the old extension is appended.
    pub fn rename(&self, old: &str, new: &str) -> Result<AssetRef, AssetError> {
        validate_file_name(old)?;
        validate_file_name(new)?;

        let source = self.dir.join(old);
        if !source.is_file() {
            return Err(AssetError::NotFound(source));
        }
        let new = keep_extension(old, new);
        let target = self.dir.join(&new);
        let format = AssetFormat::from_path(&target)
            .ok_or_else(|| AssetError::UnsupportedFormat(new.clone()))?;
        if target.exists() {
            return Err(AssetError::Exists(new));
        }

        fs::rename(&source, &target).map_err(|e| AssetError::io(&source, e))?;
        info!(old, new = new.as_str(), "Renamed asset");
        Ok(AssetRef {
            name: default_name(&new),
            file: new,
            path: target,
            format,
        })
    }

    /// Deletes a file from the asset directory.
    pub fn delete(&self, file: &str) -> Result<(), AssetError> {
        validate_file_name(file)?;
        let path = self.dir.join(file);
        if !path.is_file() {
            return Err(AssetError::NotFound(path));
        }
        fs::remove_file(&path).map_err(|e| AssetError::io(&path, e))?;
        info!(file, "Deleted asset");
        Ok(())
    }

    /// Reads the content of a file in the asset directory.
    pub fn read(&self, file: &str) -> Result<Vec<u8>, AssetError> {
        validate_file_name(file)?;
        let path = self.dir.join(file);
        if !path.is_file() {
            return Err(AssetError::NotFound(path));
        }
        debug!(file, "Reading asset");
        fs::read(&path).map_err(|e| AssetError::io(&path, e))
    }
}

/// The logical name of a file is its stem.
fn default_name(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file)
        .to_string()
}

/// Gives `new` the extension of `old` unless it already carries it.
pub(crate) fn keep_extension(old: &str, new: &str) -> String {
    match Path::new(old).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => {
            let keeps_extension = Path::new(new)
                .extension()
                .and_then(|new_ext| new_ext.to_str())
                .is_some_and(|new_ext| new_ext.eq_ignore_ascii_case(ext));
            if keeps_extension {
                new.to_string()
            } else {
                format!("{}.{}", new, ext)
            }
        }
        None => new.to_string(),
    }
}

/// File names handled directly by the store must stay inside the asset directory.
pub(crate) fn validate_file_name(file: &str) -> Result<(), AssetError> {
    let invalid = file.trim().is_empty()
        || file.starts_with('.')
        || file.contains(['/', '\\', '\0'])
        || file.len() > 255;
    if invalid {
        return Err(AssetError::InvalidName(file.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wav_bytes, write_wav};

    fn store() -> (tempfile::TempDir, AssetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(&dir.path().join("music")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            AssetFormat::from_path(Path::new("a.WAV")),
            Some(AssetFormat::Wav)
        );
        assert_eq!(
            AssetFormat::from_path(Path::new("b.mp3")),
            Some(AssetFormat::Mp3)
        );
        assert_eq!(
            AssetFormat::from_path(Path::new("c.flac")),
            Some(AssetFormat::Flac)
        );
        assert_eq!(
            AssetFormat::from_path(Path::new("d.ogg")),
            Some(AssetFormat::Ogg)
        );
        assert_eq!(AssetFormat::from_path(Path::new("e.txt")), None);
        assert_eq!(AssetFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_resolve() {
        let (_dir, store) = store();
        write_wav(&store.dir().join("drumroll.wav"), 1, 22050, 0.1);

        let asset = store.resolve("", "drumroll.wav").unwrap();
        assert_eq!(asset.name(), "drumroll");
        assert_eq!(asset.file(), "drumroll.wav");
        assert_eq!(asset.path(), store.dir().join("drumroll.wav"));
        assert_eq!(asset.format(), AssetFormat::Wav);

        assert!(matches!(
            store.resolve("", "missing.wav"),
            Err(AssetError::NotFound(_))
        ));
        assert!(matches!(
            store.resolve("", "notes.txt"),
            Err(AssetError::UnsupportedFormat(_))
        ));

        fs::write(store.dir().join("fake.wav"), b"not audio").unwrap();
        assert!(matches!(
            store.resolve("", "fake.wav"),
            Err(AssetError::Undecodable { .. })
        ));
    }

    #[test]
    fn test_resolve_absolute_path() {
        let (dir, store) = store();
        let outside = dir.path().join("outside.wav");
        write_wav(&outside, 2, 22050, 0.1);

        let file = outside.to_str().unwrap();
        let asset = store.resolve("Outside", file).unwrap();
        assert_eq!(asset.name(), "Outside");
        assert_eq!(asset.path(), outside);
    }

    #[test]
    fn test_import() {
        let (_dir, store) = store();

        let asset = store.import("horn.wav", &wav_bytes(2, 44100, 0.1)).unwrap();
        assert_eq!(asset.name(), "horn");
        assert!(asset.path().is_file());

        assert!(matches!(
            store.import("horn.wav", b"garbage"),
            Err(AssetError::Undecodable { .. })
        ));
        // The good file survives a bad upload under the same name.
        assert!(decode::probe(asset.path()).is_ok());

        assert!(matches!(
            store.import("horn.exe", b"MZ"),
            Err(AssetError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            store.import("../escape.wav", b""),
            Err(AssetError::InvalidName(_))
        ));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let (_dir, store) = store();
        write_wav(&store.dir().join("zap.wav"), 1, 22050, 0.05);
        write_wav(&store.dir().join("applause.wav"), 1, 22050, 0.05);
        fs::write(store.dir().join("readme.txt"), "hi").unwrap();
        fs::write(store.dir().join(".hidden.wav"), "hi").unwrap();
        fs::create_dir(store.dir().join("folder.wav")).unwrap();

        let files: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|asset| asset.file().to_string())
            .collect();
        assert_eq!(files, vec!["applause.wav", "zap.wav"]);
    }

    #[test]
    fn test_rename() {
        let (_dir, store) = store();
        write_wav(&store.dir().join("a.wav"), 1, 22050, 0.05);
        write_wav(&store.dir().join("b.wav"), 1, 22050, 0.05);

        let renamed = store.rename("a.wav", "cheer").unwrap();
        assert_eq!(renamed.file(), "cheer.wav");
        assert!(!store.dir().join("a.wav").exists());
        assert!(store.dir().join("cheer.wav").exists());

        let renamed = store.rename("cheer.wav", "loud.WAV").unwrap();
        assert_eq!(renamed.file(), "loud.WAV");

        assert!(matches!(
            store.rename("loud.WAV", "b.wav"),
            Err(AssetError::Exists(_))
        ));
        assert!(matches!(
            store.rename("nope.wav", "x.wav"),
            Err(AssetError::NotFound(_))
        ));
        assert!(matches!(
            store.rename("b.wav", "sub/x.wav"),
            Err(AssetError::InvalidName(_))
        ));
    }

    #[test]
    fn test_read_and_delete() {
        let (_dir, store) = store();
        let bytes = wav_bytes(1, 22050, 0.05);
        store.import("blip.wav", &bytes).unwrap();

        assert_eq!(store.read("blip.wav").unwrap(), bytes);
        store.delete("blip.wav").unwrap();
        assert!(matches!(
            store.read("blip.wav"),
            Err(AssetError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("blip.wav"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn test_staged_import_reverted() {
        let (_dir, store) = store();
        let original = wav_bytes(1, 22050, 0.05);
        store.import("horn.wav", &original).unwrap();

        let pending = store.stage("horn.wav", &wav_bytes(2, 44100, 0.1)).unwrap();
        assert_ne!(store.read("horn.wav").unwrap(), original);
        store.revert(pending);
        assert_eq!(store.read("horn.wav").unwrap(), original);

        let pending = store.stage("new.wav", &original).unwrap();
        assert!(pending.asset().path().is_file());
        store.revert(pending);
        assert!(!store.dir().join("new.wav").exists());

        let files: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|asset| asset.file().to_string())
            .collect();
        assert_eq!(files, vec!["horn.wav"]);
    }

    #[test]
    fn test_staged_import_committed() {
        let (_dir, store) = store();
        store.import("horn.wav", &wav_bytes(1, 22050, 0.05)).unwrap();
        let replacement = wav_bytes(2, 44100, 0.1);

        let pending = store.stage("horn.wav", &replacement).unwrap();
        let asset = store.commit(pending);
        assert_eq!(asset.file(), "horn.wav");
        assert_eq!(store.read("horn.wav").unwrap(), replacement);
        assert!(!store.dir().join(".replaced-horn.wav").exists());
    }
}
