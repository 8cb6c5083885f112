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

//! Pad icons: small images kept in their own directory and shown on the board's pads.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::assets::{keep_extension, validate_file_name, AssetError};

/// File extensions accepted as icons.
const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Content types accepted as icons.
const MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// The icon directory.
pub struct IconStore {
    dir: PathBuf,
}

impl IconStore {
    /// Opens the icon directory, creating it if needed.
    pub fn new(dir: &Path) -> Result<IconStore, AssetError> {
        fs::create_dir_all(dir).map_err(|e| AssetError::io(dir, e))?;
        Ok(IconStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of an icon that exists in the directory.
    pub fn existing(&self, file: &str) -> Result<PathBuf, AssetError> {
        let path = self.checked_path(file)?;
        if !path.is_file() {
            return Err(AssetError::NotFound(path));
        }
        Ok(path)
    }

    /// Lists the icon files, sorted by name.
    pub fn list(&self) -> Result<Vec<String>, AssetError> {
        let mut icons = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| AssetError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| AssetError::io(&self.dir, e))?;
            let path = entry.path();
            let Some(file) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if path.is_file() && !file.starts_with('.') && is_icon(&path) {
                icons.push(file.to_string());
            }
        }
        icons.sort();
        Ok(icons)
    }

    /// Stores an uploaded image, replacing an icon of the same name.
    pub fn import(&self, file_name: &str, bytes: &[u8]) -> Result<String, AssetError> {
        let target = self.checked_path(file_name)?;
        if sniff(bytes).is_none() {
            return Err(AssetError::NotAnImage(file_name.to_string()));
        }

        let staging = self.dir.join(format!(".upload-{}", file_name));
        fs::write(&staging, bytes).map_err(|e| AssetError::io(&staging, e))?;
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(AssetError::io(&target, e));
        }

        info!(file = file_name, bytes = bytes.len(), "Imported icon");
        Ok(file_name.to_string())
    }

    /// Renames an icon. The old extension is kept if the new name lacks it.
    pub fn rename(&self, old: &str, new: &str) -> Result<String, AssetError> {
        let source = self.existing(old)?;
        validate_file_name(new)?;
        let new = keep_extension(old, new);
        let target = self.checked_path(&new)?;
        if target.exists() {
            return Err(AssetError::Exists(new));
        }

        fs::rename(&source, &target).map_err(|e| AssetError::io(&source, e))?;
        info!(old, new = new.as_str(), "Renamed icon");
        Ok(new)
    }

    pub fn delete(&self, file: &str) -> Result<(), AssetError> {
        let path = self.existing(file)?;
        fs::remove_file(&path).map_err(|e| AssetError::io(&path, e))?;
        info!(file, "Deleted icon");
        Ok(())
    }

    /// Reads an icon and its content type.
    pub fn read(&self, file: &str) -> Result<(Vec<u8>, &'static str), AssetError> {
        let path = self.existing(file)?;
        debug!(file, "Reading icon");
        let bytes = fs::read(&path).map_err(|e| AssetError::io(&path, e))?;
        let mime = sniff(&bytes).unwrap_or("application/octet-stream");
        Ok((bytes, mime))
    }

    fn checked_path(&self, file: &str) -> Result<PathBuf, AssetError> {
        validate_file_name(file)?;
        let path = self.dir.join(file);
        if !is_icon(&path) {
            return Err(AssetError::UnsupportedFormat(file.to_string()));
        }
        Ok(path)
    }
}

fn is_icon(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// The content type of image bytes, if it is one icons may use.
fn sniff(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| MIME_TYPES.contains(mime))
}
