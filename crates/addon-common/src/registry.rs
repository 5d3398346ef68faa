//! Persistent volume registry.
//!
//! Maps logical volume names to host mount paths for one access scope. The
//! whole map is re-serialized to a JSON document on every mutation, so the
//! on-disk and in-memory state agree at every call boundary:
//!
//! ```json
//! {"state": {"<volumeName>": "<hostPath>"}}
//! ```
//!
//! A missing or unreadable state file rehydrates as an empty registry.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AddonError, AddonResult};

/// On-disk document layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRegistry {
    #[serde(default)]
    state: BTreeMap<String, PathBuf>,
}

/// A registered volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    /// Logical volume name.
    pub name: String,
    /// Absolute host mount path.
    pub path: PathBuf,
}

/// Crash-durable name → path mapping for one volume scope.
#[derive(Debug)]
pub struct VolumeRegistry {
    /// JSON state document.
    state_file: PathBuf,
    /// Directory under which new volume paths are allocated.
    volumes_root: PathBuf,
    /// Serializes every access, including the write-back.
    volumes: Mutex<BTreeMap<String, PathBuf>>,
}

impl VolumeRegistry {
    /// Opens a registry, rehydrating it from `state_file`.
    pub fn open(state_file: impl Into<PathBuf>, volumes_root: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        let volumes = load_state(&state_file);

        info!(
            state_file = %state_file.display(),
            volumes = volumes.len(),
            "Volume registry loaded"
        );

        Self {
            state_file,
            volumes_root: volumes_root.into(),
            volumes: Mutex::new(volumes),
        }
    }

    /// Returns the backing state file.
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Registers a new volume and returns its host path.
    ///
    /// Fails if the name is already registered. If the state file cannot
    /// be written the entry is not kept.
    pub fn create(&self, name: &str) -> AddonResult<PathBuf> {
        validate_name(name)?;

        let mut volumes = self.volumes.lock();
        if volumes.contains_key(name) {
            return Err(AddonError::VolumeExists {
                name: name.to_string(),
            });
        }

        let path = self.volumes_root.join(name);
        volumes.insert(name.to_string(), path.clone());

        if let Err(e) = persist(&self.state_file, &volumes) {
            volumes.remove(name);
            return Err(e);
        }

        debug!(volume = %name, path = %path.display(), "Registered volume");
        Ok(path)
    }

    /// Unregisters a volume, returning its path if it was present.
    ///
    /// Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) -> AddonResult<Option<PathBuf>> {
        let mut volumes = self.volumes.lock();
        let Some(path) = volumes.remove(name) else {
            return Ok(None);
        };

        if let Err(e) = persist(&self.state_file, &volumes) {
            volumes.insert(name.to_string(), path);
            return Err(e);
        }

        debug!(volume = %name, "Unregistered volume");
        Ok(Some(path))
    }

    /// Looks up a volume's host path.
    pub fn get(&self, name: &str) -> Option<PathBuf> {
        self.volumes.lock().get(name).cloned()
    }

    /// Returns true if the volume is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.lock().contains_key(name)
    }

    /// Lists all registered volumes, sorted by name.
    pub fn list(&self) -> Vec<VolumeEntry> {
        self.volumes
            .lock()
            .iter()
            .map(|(name, path)| VolumeEntry {
                name: name.clone(),
                path: path.clone(),
            })
            .collect()
    }

    /// Returns the number of registered volumes.
    pub fn len(&self) -> usize {
        self.volumes.lock().len()
    }

    /// Returns true if no volume is registered.
    pub fn is_empty(&self) -> bool {
        self.volumes.lock().is_empty()
    }
}

fn validate_name(name: &str) -> AddonResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(AddonError::InvalidVolumeName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn load_state(state_file: &Path) -> BTreeMap<String, PathBuf> {
    let content = match fs::read_to_string(state_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(
                state_file = %state_file.display(),
                error = %e,
                "Volume registry unreadable, starting empty"
            );
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<PersistedRegistry>(&content) {
        Ok(persisted) => persisted.state,
        Err(e) => {
            warn!(
                state_file = %state_file.display(),
                error = %e,
                "Volume registry corrupted, starting empty"
            );
            BTreeMap::new()
        }
    }
}

/// Writes the full map to a sibling temp file and renames it into place.
fn persist(state_file: &Path, volumes: &BTreeMap<String, PathBuf>) -> AddonResult<()> {
    let persist_err = |message: String| AddonError::RegistryPersist {
        path: state_file.to_path_buf(),
        message,
    };

    if let Some(parent) = state_file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| persist_err(format!("failed to create state directory: {}", e)))?;
    }

    let document = serde_json::to_string_pretty(&PersistedRegistry {
        state: volumes.clone(),
    })
    .map_err(|e| persist_err(format!("failed to encode state: {}", e)))?;

    let tmp_file = state_file.with_extension("json.tmp");
    fs::write(&tmp_file, document)
        .map_err(|e| persist_err(format!("failed to write state: {}", e)))?;
    fs::rename(&tmp_file, state_file)
        .map_err(|e| persist_err(format!("failed to replace state: {}", e)))?;

    Ok(())
}
