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

//! The persistent trigger to asset mapping.
//!
//! Committed state is an immutable snapshot. A mutation takes the table-wide write lock,
//! edits a copy of the snapshot, persists the copy and only then publishes it. A failed
//! write leaves the published snapshot untouched.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::assets::{AssetError, AssetRef, AssetStore};
use crate::config::{BindingRecord, BindingsFile, PersistError, Retrigger};

/// Longest accepted trigger name, in bytes.
const MAX_TRIGGER_LEN: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Unknown trigger: {0}")]
    UnknownTrigger(String),

    #[error("Trigger is already bound: {0}")]
    DuplicateTrigger(String),

    #[error("Invalid trigger: {0:?}")]
    InvalidTrigger(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(#[from] AssetError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// A unique, non-empty trigger name, such as a button or key label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Trigger(String);

impl Trigger {
    pub fn new(name: &str) -> Result<Trigger, MappingError> {
        if name.trim().is_empty()
            || name.len() > MAX_TRIGGER_LEN
            || name.chars().any(char::is_control)
        {
            return Err(MappingError::InvalidTrigger(name.to_string()));
        }
        Ok(Trigger(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Trigger {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a binding plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Repeat until stopped.
    pub looped: bool,
    /// Overrides the board's retrigger behavior.
    pub retrigger: Option<Retrigger>,
    /// Limits concurrent instances of this trigger in polyphonic mode.
    pub max_voices: Option<NonZeroU32>,
}

/// A trigger bound to an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    trigger: Trigger,
    asset: AssetRef,
    options: PlaybackOptions,
    icon: Option<String>,
}

impl Binding {
    pub fn new(trigger: Trigger, asset: AssetRef, options: PlaybackOptions) -> Binding {
        Binding {
            trigger,
            asset,
            options,
            icon: None,
        }
    }

    /// Returns this binding showing the given icon file.
    pub fn with_icon(self, icon: Option<String>) -> Binding {
        Binding { icon, ..self }
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn asset(&self) -> &AssetRef {
        &self.asset
    }

    pub fn options(&self) -> PlaybackOptions {
        self.options
    }

    /// The icon file, if the pad has one.
    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    fn to_record(&self) -> BindingRecord {
        BindingRecord {
            name: self.asset.name().to_string(),
            file: self.asset.file().to_string(),
            looped: self.options.looped,
            retrigger: self.options.retrigger,
            max_voices: self.options.max_voices,
            icon: self.icon.clone(),
        }
    }
}

type Snapshot = BTreeMap<Trigger, Binding>;

/// The authoritative set of bindings, mirrored to the mapping file.
pub struct MappingTable {
    assets: Arc<AssetStore>,
    path: PathBuf,
    /// Serializes mutations.
    write_lock: Mutex<()>,
    committed: RwLock<Arc<Snapshot>>,
}

impl MappingTable {
    /// Loads the mapping file. A missing file is an empty table and is written out immediately.
    pub fn open(path: &Path, assets: Arc<AssetStore>) -> Result<MappingTable, MappingError> {
        let snapshot = match BindingsFile::load(path)? {
            Some(file) => load_snapshot(path, &assets, file)?,
            None => {
                info!(path = %path.display(), "No mapping file, starting empty");
                BindingsFile::default().save(path)?;
                Snapshot::new()
            }
        };
        info!(
            path = %path.display(),
            bindings = snapshot.len(),
            "Loaded mappings"
        );

        Ok(MappingTable {
            assets,
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            committed: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The asset store the table resolves against.
    pub fn assets(&self) -> &Arc<AssetStore> {
        &self.assets
    }

    /// The mapping file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds a trigger to an asset. The asset must exist and be decodable. An existing
    /// binding is only replaced if overwrite is set. Returns the replaced binding.
    pub fn bind(
        &self,
        trigger: Trigger,
        asset: &AssetRef,
        options: PlaybackOptions,
        overwrite: bool,
    ) -> Result<Option<Binding>, MappingError> {
        self.bind_with_icon(trigger, asset, options, None, overwrite)
    }

    /// Like [`MappingTable::bind`], with the icon shown on the pad.
    pub fn bind_with_icon(
        &self,
        trigger: Trigger,
        asset: &AssetRef,
        options: PlaybackOptions,
        icon: Option<String>,
        overwrite: bool,
    ) -> Result<Option<Binding>, MappingError> {
        let asset = self.assets.resolve(asset.name(), asset.file())?;

        let previous = self.mutate(|bindings| {
            if !overwrite && bindings.contains_key(&trigger) {
                return Err(MappingError::DuplicateTrigger(trigger.to_string()));
            }
            let binding = Binding::new(trigger.clone(), asset.clone(), options).with_icon(icon);
            Ok(bindings.insert(trigger.clone(), binding))
        })?;
        info!(
            trigger = trigger.as_str(),
            file = asset.file(),
            replaced = previous.is_some(),
            "Bound trigger"
        );
        Ok(previous)
    }

    /// Removes a binding.
    pub fn unbind(&self, trigger: &str) -> Result<Binding, MappingError> {
        let removed = self.mutate(|bindings| {
            bindings
                .remove(trigger)
                .ok_or_else(|| MappingError::UnknownTrigger(trigger.to_string()))
        })?;
        info!(trigger, "Unbound trigger");
        Ok(removed)
    }

    /// Renames a trigger, keeping its asset and options.
    pub fn rename(&self, trigger: &str, new_trigger: Trigger) -> Result<Binding, MappingError> {
        let renamed = self.mutate(|bindings| {
            if !bindings.contains_key(trigger) {
                return Err(MappingError::UnknownTrigger(trigger.to_string()));
            }
            if bindings.contains_key(&new_trigger) {
                return Err(MappingError::DuplicateTrigger(new_trigger.to_string()));
            }
            let old = bindings
                .remove(trigger)
                .ok_or_else(|| MappingError::UnknownTrigger(trigger.to_string()))?;
            let binding = Binding {
                trigger: new_trigger.clone(),
                ..old
            };
            bindings.insert(new_trigger.clone(), binding.clone());
            Ok(binding)
        })?;
        info!(trigger, new_trigger = new_trigger.as_str(), "Renamed trigger");
        Ok(renamed)
    }

    /// Sets or clears the icon of a binding.
    pub fn set_icon(&self, trigger: &str, icon: Option<String>) -> Result<Binding, MappingError> {
        let binding = self.mutate(|bindings| {
            let binding = bindings
                .get_mut(trigger)
                .ok_or_else(|| MappingError::UnknownTrigger(trigger.to_string()))?;
            binding.icon = icon.clone();
            Ok(binding.clone())
        })?;
        info!(trigger, icon = ?icon, "Set trigger icon");
        Ok(binding)
    }

    /// Points every binding showing the old icon file at the new one. Returns the affected
    /// triggers.
    pub fn rename_icon(&self, old: &str, new: &str) -> Result<Vec<Trigger>, MappingError> {
        self.replace_icon(old, Some(new))
    }

    /// Removes the icon file from every binding showing it. Returns the affected triggers.
    pub fn clear_icon(&self, icon: &str) -> Result<Vec<Trigger>, MappingError> {
        self.replace_icon(icon, None)
    }

    fn replace_icon(&self, old: &str, new: Option<&str>) -> Result<Vec<Trigger>, MappingError> {
        let affected = self.mutate(|bindings| {
            let mut affected = Vec::new();
            for binding in bindings.values_mut() {
                if binding.icon.as_deref() == Some(old) {
                    binding.icon = new.map(str::to_string);
                    affected.push(binding.trigger.clone());
                }
            }
            Ok(affected)
        })?;
        if !affected.is_empty() {
            info!(old, new = ?new, bindings = affected.len(), "Updated pad icons");
        }
        Ok(affected)
    }

    /// Points every binding that uses the file at old_path to the given asset. Logical names
    /// that were derived from the old file follow the new file. Returns the affected triggers.
    pub fn rebind_file(
        &self,
        old_path: &Path,
        old_name: &str,
        asset: &AssetRef,
    ) -> Result<Vec<Trigger>, MappingError> {
        let affected = self.mutate(|bindings| {
            let mut affected = Vec::new();
            for binding in bindings.values_mut() {
                if binding.asset.path() != old_path {
                    continue;
                }
                binding.asset = if binding.asset.name() == old_name {
                    asset.clone()
                } else {
                    asset.with_name(binding.asset.name())
                };
                affected.push(binding.trigger.clone());
            }
            Ok(affected)
        })?;
        if !affected.is_empty() {
            info!(
                file = asset.file(),
                bindings = affected.len(),
                "Rebound triggers to renamed asset"
            );
        }
        Ok(affected)
    }

    /// Removes every binding that uses the file at path. Returns the removed bindings.
    pub fn unbind_file(&self, path: &Path) -> Result<Vec<Binding>, MappingError> {
        let removed = self.mutate(|bindings| {
            let triggers: Vec<Trigger> = bindings
                .values()
                .filter(|binding| binding.asset.path() == path)
                .map(|binding| binding.trigger.clone())
                .collect();
            Ok(triggers
                .iter()
                .filter_map(|trigger| bindings.remove(trigger))
                .collect::<Vec<Binding>>())
        })?;
        if !removed.is_empty() {
            info!(
                path = %path.display(),
                bindings = removed.len(),
                "Unbound triggers of deleted asset"
            );
        }
        Ok(removed)
    }

    /// Looks up a binding.
    pub fn get(&self, trigger: &str) -> Result<Binding, MappingError> {
        self.snapshot()
            .get(trigger)
            .cloned()
            .ok_or_else(|| MappingError::UnknownTrigger(trigger.to_string()))
    }

    /// Looks up the asset bound to a trigger.
    pub fn resolve(&self, trigger: &str) -> Result<AssetRef, MappingError> {
        self.get(trigger).map(|binding| binding.asset)
    }

    /// All bindings in trigger order.
    pub fn list(&self) -> Vec<Binding> {
        self.snapshot().values().cloned().collect()
    }

    /// The triggers bound to the file at path.
    pub fn triggers_for(&self, path: &Path) -> Vec<Trigger> {
        self.snapshot()
            .values()
            .filter(|binding| binding.asset.path() == path)
            .map(|binding| binding.trigger.clone())
            .collect()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.committed.read().clone()
    }

    /// Applies a change to a copy of the committed bindings, persists it and publishes it.
    /// Nothing is published if the change or the write fails.
    fn mutate<R, F>(&self, change: F) -> Result<R, MappingError>
    where
        F: FnOnce(&mut Snapshot) -> Result<R, MappingError>,
    {
        let _guard = self.write_lock.lock();
        let mut bindings = Snapshot::clone(&self.snapshot());
        let result = change(&mut bindings)?;

        let file = BindingsFile {
            bindings: bindings
                .values()
                .map(|binding| (binding.trigger.to_string(), binding.to_record()))
                .collect(),
        };
        if let Err(e) = file.save(&self.path) {
            warn!(path = %self.path.display(), err = %e, "Unable to persist mappings, rolled back");
            return Err(e.into());
        }

        *self.committed.write() = Arc::new(bindings);
        Ok(result)
    }
}

/// Validates the records of a mapping file into bindings.
fn load_snapshot(
    path: &Path,
    assets: &AssetStore,
    file: BindingsFile,
) -> Result<Snapshot, MappingError> {
    let invalid = |trigger: &str, message: String| PersistError::Invalid {
        path: path.to_path_buf(),
        trigger: trigger.to_string(),
        message,
    };

    let mut snapshot = Snapshot::new();
    for (name, record) in file.bindings {
        let trigger =
            Trigger::new(&name).map_err(|_| invalid(&name, "invalid trigger".to_string()))?;
        if record.name.trim().is_empty() {
            return Err(invalid(&name, "empty asset name".to_string()).into());
        }
        let asset = assets
            .locate(&record.name, &record.file)
            .map_err(|e| invalid(&name, e.to_string()))?;
        if !asset.path().is_file() {
            warn!(
                trigger = trigger.as_str(),
                path = %asset.path().display(),
                "Bound asset is missing"
            );
        }

        let options = PlaybackOptions {
            looped: record.looped,
            retrigger: record.retrigger,
            max_voices: record.max_voices,
        };
        let binding = Binding::new(trigger.clone(), asset, options).with_icon(record.icon);
        snapshot.insert(trigger, binding);
    }
    Ok(snapshot)
}
