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
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::board::Retrigger;

/// Errors reading or writing the mapping file.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed mapping file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yml::Error,
    },

    #[error("Unable to serialize mappings: {0}")]
    Serialize(#[from] serde_yml::Error),

    #[error("Invalid entry {trigger:?} in {}: {message}", .path.display())]
    Invalid {
        path: PathBuf,
        trigger: String,
        message: String,
    },
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One persisted binding.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BindingRecord {
    /// Logical name of the asset.
    pub name: String,

    /// The asset file, relative to the asset directory or absolute.
    pub file: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub looped: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrigger: Option<Retrigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_voices: Option<NonZeroU32>,

    /// Image file in the icon directory shown on the pad.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The on-disk mapping file. Triggers are kept in lexicographic order.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingsFile {
    #[serde(default)]
    pub bindings: BTreeMap<String, BindingRecord>,
}

impl BindingsFile {
    /// Loads the mapping file. Returns None if the file doesn't exist yet.
    pub fn load(path: &Path) -> Result<Option<BindingsFile>, PersistError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::io(path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(Some(BindingsFile::default()));
        }

        serde_yml::from_str::<BindingsFile>(&contents)
            .map(Some)
            .map_err(|source| PersistError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes the mapping file atomically: a sibling temporary file is written, synced and then
    /// renamed over the target.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let serialized = serde_yml::to_string(self)?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| PersistError::io(&parent, e))?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mappings".to_string());
        let tmp = parent.join(format!(".{}.tmp", file_name));

        let result = write_synced(&tmp, serialized.as_bytes())
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|e| PersistError::io(path, e));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
            return result;
        }

        // Make the rename itself durable. Not every platform can sync a directory.
        if let Ok(dir) = fs::File::open(&parent) {
            let _ = dir.sync_all();
        }
        debug!(path = %path.display(), bindings = self.bindings.len(), "Saved mappings");
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
