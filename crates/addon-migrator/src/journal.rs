//! Migration journal.
//!
//! Deleting the legacy stack removes its containers, and creating the
//! current stack stamps the current version label. Once either has happened,
//! the label alone no longer tells an interrupted migration apart from a
//! finished one. The journal records an in-flight migration (and the volumes
//! already moved) from before the first destructive step until the last one
//! completes:
//!
//! ```text
//! {state_dir}/migrations/{normalizedStackName}.json
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use addon_common::naming::normalize_stack_name;
use addon_common::{AddonError, AddonResult};

/// Persisted state of one in-flight migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Add-on name as passed to the migration.
    pub stack: String,
    /// When the migration first started.
    pub started_at: DateTime<Utc>,
    /// Logical volume names whose content already reached the current mount.
    #[serde(default)]
    pub completed_volumes: BTreeSet<String>,
}

impl MigrationRecord {
    /// Returns true if the volume was already migrated.
    pub fn is_volume_done(&self, volume: &str) -> bool {
        self.completed_volumes.contains(volume)
    }
}

/// Directory of migration records, one file per add-on.
#[derive(Debug, Clone)]
pub struct MigrationJournal {
    dir: PathBuf,
}

impl MigrationJournal {
    /// Creates a journal stored under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", normalize_stack_name(name)))
    }

    /// Loads the record of an in-flight migration.
    ///
    /// A record that exists but cannot be decoded is an error: guessing
    /// which volumes were already moved could overwrite migrated data.
    pub fn load(&self, name: &str) -> AddonResult<Option<MigrationRecord>> {
        let path = self.record_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AddonError::io("read migration journal", path, e)),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            AddonError::internal(format!(
                "migration journal {} is corrupted: {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns true if a migration of `name` was started and not finished.
    pub fn is_pending(&self, name: &str) -> AddonResult<bool> {
        Ok(self.load(name)?.is_some())
    }

    /// Starts (or continues) the record for `name`.
    pub fn begin(&self, name: &str) -> AddonResult<MigrationRecord> {
        if let Some(record) = self.load(name)? {
            debug!(
                stack = %name,
                done = record.completed_volumes.len(),
                "Continuing migration record"
            );
            return Ok(record);
        }

        let record = MigrationRecord {
            stack: name.to_string(),
            started_at: Utc::now(),
            completed_volumes: BTreeSet::new(),
        };
        self.save(&record)?;
        Ok(record)
    }

    /// Marks a volume as migrated.
    pub fn record_volume(&self, record: &mut MigrationRecord, volume: &str) -> AddonResult<()> {
        record.completed_volumes.insert(volume.to_string());
        self.save(record)
    }

    /// Removes the record once the migration is complete.
    pub fn finish(&self, name: &str) -> AddonResult<()> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AddonError::io("remove migration journal", path, e)),
        }
    }

    fn save(&self, record: &MigrationRecord) -> AddonResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| AddonError::io("create migration journal", &self.dir, e))?;

        let path = self.record_path(&record.stack);
        let document = serde_json::to_string_pretty(record)
            .map_err(|e| AddonError::internal(format!("failed to encode journal: {}", e)))?;
        write_atomic(&path, document.as_bytes())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> AddonResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| AddonError::io("write migration journal", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| AddonError::io("write migration journal", path, e))
}
