//! Volume content migration.
//!
//! Moves the content of one volume from its legacy mount to its current
//! mount through a staging directory in the cache area:
//!
//! 1. create a staging directory `{cache}/{volume}.{unique}`
//! 2. copy the legacy content into staging, then drop a `.staged` marker
//! 3. clear the legacy mount
//! 4. clear the current mount (the new image may have pre-populated it)
//! 5. copy staging into the current mount
//! 6. remove staging and its marker
//!
//! Until step 5 completes the data always lives in at least one of legacy or
//! staging. A re-run that finds a marked staging directory for the same
//! volume resumes from step 3 with it instead of copying the (possibly
//! already cleared) legacy mount again. Unmarked leftovers come from a crash
//! during step 2, while legacy was still intact, and are discarded.
//!
//! Steps 1-5 ([`transfer_volume`]) and step 6 ([`discard_staging`]) are
//! separate so a caller can record the volume as migrated while the staging
//! copy still exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use addon_common::{AddonError, AddonResult, LocalVolumeDriver};

/// Suffix of the marker file written next to a complete staging copy.
const STAGED_MARKER_SUFFIX: &str = ".staged";

/// Legacy backend volume records.
pub trait LegacyVolumes: Send + Sync {
    /// Resolves the host mount path of a scoped volume.
    fn mountpoint(&self, scoped_name: &str) -> AddonResult<PathBuf>;

    /// Removes the stack's volumes whose logical name is not declared.
    fn remove_unreferenced(&self, stack_name: &str, declared: &[String])
        -> AddonResult<Vec<String>>;
}

impl LegacyVolumes for LocalVolumeDriver {
    fn mountpoint(&self, scoped_name: &str) -> AddonResult<PathBuf> {
        self.path(scoped_name)
    }

    fn remove_unreferenced(
        &self,
        stack_name: &str,
        declared: &[String],
    ) -> AddonResult<Vec<String>> {
        LocalVolumeDriver::remove_unreferenced(self, stack_name, declared)
    }
}

/// Moves volume content between backends via the cache area.
#[derive(Debug, Clone)]
pub struct VolumeMigrator {
    cache_dir: PathBuf,
}

impl VolumeMigrator {
    /// Creates a migrator staging under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Returns the cache area.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Migrates one volume's content off the async executor.
    pub async fn migrate(&self, volume: &str, legacy: &Path, current: &Path) -> AddonResult<()> {
        let staging = self.transfer(volume, legacy, current).await?;
        self.discard(staging).await
    }

    /// Runs [`transfer_volume`] off the async executor.
    pub async fn transfer(
        &self,
        volume: &str,
        legacy: &Path,
        current: &Path,
    ) -> AddonResult<PathBuf> {
        let cache_dir = self.cache_dir.clone();
        let volume = volume.to_string();
        let legacy = legacy.to_path_buf();
        let current = current.to_path_buf();

        run_blocking(move || transfer_volume(&cache_dir, &volume, &legacy, &current)).await
    }

    /// Runs [`discard_staging`] off the async executor.
    pub async fn discard(&self, staging: PathBuf) -> AddonResult<()> {
        run_blocking(move || discard_staging(&staging)).await
    }

    /// Runs [`purge_staging`] off the async executor.
    pub async fn purge(&self, volume: &str) -> AddonResult<usize> {
        let cache_dir = self.cache_dir.clone();
        let volume = volume.to_string();
        run_blocking(move || purge_staging(&cache_dir, &volume)).await
    }
}

async fn run_blocking<T, F>(f: F) -> AddonResult<T>
where
    F: FnOnce() -> AddonResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AddonError::internal(format!("volume migration task failed: {}", e)))?
}

/// Blocking volume migration (see module docs for the step sequence).
pub fn migrate_volume(
    cache_dir: &Path,
    volume: &str,
    legacy: &Path,
    current: &Path,
) -> AddonResult<()> {
    let staging = transfer_volume(cache_dir, volume, legacy, current)?;
    discard_staging(&staging)
}

/// Steps 1-5: moves the content into `current` and returns the staging
/// directory still holding a copy.
#[instrument(skip_all, fields(volume = %volume))]
pub fn transfer_volume(
    cache_dir: &Path,
    volume: &str,
    legacy: &Path,
    current: &Path,
) -> AddonResult<PathBuf> {
    fs::create_dir_all(cache_dir).map_err(step_err("prepare cache", cache_dir))?;

    let staging = match find_staged(cache_dir, volume)? {
        Some(staging) => {
            warn!(staging = %staging.display(), "Resuming interrupted volume migration");
            staging
        }
        None => {
            // Step 1
            let staging = tempfile::Builder::new()
                .prefix(&format!("{}.", volume))
                .keep(true)
                .tempdir_in(cache_dir)
                .map_err(step_err("create staging", cache_dir))?
                .path()
                .to_path_buf();

            // Step 2
            copy_content(legacy, &staging).map_err(step_err("copy to staging", legacy))?;
            fs::write(marker_path(&staging), b"")
                .map_err(step_err("mark staging", &staging))?;
            debug!(staging = %staging.display(), "Legacy content staged");
            staging
        }
    };

    // Step 3
    remove_content(legacy).map_err(step_err("clear legacy mount", legacy))?;

    // Step 4
    remove_content(current).map_err(step_err("clear current mount", current))?;

    // Step 5
    copy_content(&staging, current).map_err(step_err("copy to current mount", current))?;

    info!(
        legacy = %legacy.display(),
        current = %current.display(),
        "Volume content migrated"
    );
    Ok(staging)
}

/// Step 6: removes a staging directory and its marker.
pub fn discard_staging(staging: &Path) -> AddonResult<()> {
    fs::remove_dir_all(staging).map_err(step_err("remove staging", staging))?;
    match fs::remove_file(marker_path(staging)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(step_err("remove staging", staging)(e)),
    }
}

fn step_err(step: &'static str, path: &Path) -> impl FnOnce(io::Error) -> AddonError {
    let path = path.to_path_buf();
    move |source| AddonError::VolumeMigration { step, path, source }
}

fn marker_path(staging: &Path) -> PathBuf {
    let mut marker = staging.as_os_str().to_owned();
    marker.push(STAGED_MARKER_SUFFIX);
    PathBuf::from(marker)
}

/// Staging directories of `volume` under `cache_dir`, complete or not.
fn staging_dirs(cache_dir: &Path, volume: &str) -> AddonResult<Vec<PathBuf>> {
    let prefix = format!("{}.", volume);
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(step_err("scan cache", cache_dir)(e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(step_err("scan cache", cache_dir))?;
        let path = entry.path();
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(unique) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        if unique.is_empty() || unique.contains('.') || !path.is_dir() {
            continue;
        }
        dirs.push(path);
    }
    Ok(dirs)
}

/// Looks for a complete staging copy of `volume` left by an earlier run and
/// discards incomplete ones.
fn find_staged(cache_dir: &Path, volume: &str) -> AddonResult<Option<PathBuf>> {
    let mut staged = None;
    for path in staging_dirs(cache_dir, volume)? {
        if marker_path(&path).exists() && staged.is_none() {
            staged = Some(path);
        } else {
            debug!(staging = %path.display(), "Discarding incomplete staging directory");
            discard_staging(&path)?;
        }
    }
    Ok(staged)
}

/// Removes every staging directory of `volume`, with its marker. Used once
/// the volume is known to be migrated. Returns how many were removed.
pub fn purge_staging(cache_dir: &Path, volume: &str) -> AddonResult<usize> {
    let dirs = staging_dirs(cache_dir, volume)?;
    for path in &dirs {
        debug!(staging = %path.display(), "Removing leftover staging directory");
        discard_staging(path)?;
    }
    Ok(dirs.len())
}

/// Recursively copies the content of `src` (not `src` itself) into `dst`.
///
/// Files, directories and symlinks are recreated with their permissions;
/// ownership is carried over on Unix.
pub fn copy_content(src: &Path, dst: &Path) -> io::Result<()> {
    if !fs::metadata(src)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", src.display()),
        ));
    }
    fs::create_dir_all(dst)?;
    let mut dir_permissions = Vec::new();

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            let permissions = entry.metadata().map_err(io::Error::from)?.permissions();
            dir_permissions.push((target.clone(), permissions));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }
            create_symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }

        copy_ownership(entry.path(), &target)?;
    }

    // Deepest first, so read-only directories do not block their children.
    for (dir, permissions) in dir_permissions.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }

    Ok(())
}

/// Removes everything inside `dir`, keeping `dir` itself. A missing
/// directory has nothing to remove.
pub fn remove_content(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn create_symlink(_link: &Path, target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", target.display()),
    ))
}

#[cfg(unix)]
fn copy_ownership(src: &Path, target: &Path) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let src_meta = fs::symlink_metadata(src)?;
    let dst_meta = fs::symlink_metadata(target)?;
    if src_meta.uid() != dst_meta.uid() || src_meta.gid() != dst_meta.gid() {
        std::os::unix::fs::lchown(target, Some(src_meta.uid()), Some(src_meta.gid()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn copy_ownership(_src: &Path, _target: &Path) -> io::Result<()> {
    Ok(())
}
