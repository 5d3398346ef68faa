//! Local volume driver.
//!
//! The legacy backend stored add-on volumes through a local volume plugin.
//! Each access scope has its own driver name, registry document and data
//! directory under the state directory:
//!
//! ```text
//! {state_dir}/{driver}/state.json
//! {state_dir}/{driver}/volumes/{volume}
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AddonError, AddonResult};
use crate::naming::unscoped_volume_name;
use crate::registry::{VolumeEntry, VolumeRegistry};

/// Registry document name inside a driver directory.
pub const REGISTRY_FILE_NAME: &str = "state.json";

/// Volume data directory name inside a driver directory.
pub const VOLUMES_DIR_NAME: &str = "volumes";

/// Volume access scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeScope {
    /// Volumes private to one add-on.
    Local,
    /// Volumes shared between add-ons.
    Public,
}

impl VolumeScope {
    /// Returns the fixed driver name for this scope.
    pub fn driver_name(&self) -> &'static str {
        match self {
            VolumeScope::Local => "addon-local",
            VolumeScope::Public => "addon-public",
        }
    }
}

impl std::str::FromStr for VolumeScope {
    type Err = AddonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(VolumeScope::Local),
            "public" => Ok(VolumeScope::Public),
            other => Err(AddonError::invalid_config(
                "scope",
                format!("unknown volume scope '{}'", other),
            )),
        }
    }
}

/// Volume plugin semantics on top of one registry scope.
#[derive(Debug)]
pub struct LocalVolumeDriver {
    scope: VolumeScope,
    registry: VolumeRegistry,
}

impl LocalVolumeDriver {
    /// Opens the driver for `scope` under `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>, scope: VolumeScope) -> Self {
        let base = state_dir.as_ref().join(scope.driver_name());
        let registry = VolumeRegistry::open(
            base.join(REGISTRY_FILE_NAME),
            base.join(VOLUMES_DIR_NAME),
        );
        Self { scope, registry }
    }

    /// Creates a volume: registers it and creates its data directory.
    pub fn create(&self, name: &str) -> AddonResult<PathBuf> {
        let path = self.registry.create(name)?;

        if let Err(e) = fs::create_dir_all(&path) {
            if let Err(rollback) = self.registry.remove(name) {
                warn!(volume = %name, error = %rollback, "Failed to roll back volume registration");
            }
            return Err(AddonError::io("create volume directory", path, e));
        }

        info!(driver = self.scope.driver_name(), volume = %name, "Created volume");
        Ok(path)
    }

    /// Removes a volume and its data. Absent volumes are ignored.
    pub fn remove(&self, name: &str) -> AddonResult<()> {
        let Some(path) = self.registry.remove(name)? else {
            return Ok(());
        };

        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AddonError::io("remove volume directory", path, e)),
        }

        info!(driver = self.scope.driver_name(), volume = %name, "Removed volume");
        Ok(())
    }

    /// Returns the registered volume entry.
    pub fn get(&self, name: &str) -> AddonResult<VolumeEntry> {
        self.path(name).map(|path| VolumeEntry {
            name: name.to_string(),
            path,
        })
    }

    /// Returns a volume's host path.
    pub fn path(&self, name: &str) -> AddonResult<PathBuf> {
        self.registry
            .get(name)
            .ok_or_else(|| AddonError::volume_not_found(name))
    }

    /// Returns the mount path, recreating the data directory if needed.
    pub fn mount(&self, name: &str) -> AddonResult<PathBuf> {
        let path = self.path(name)?;
        fs::create_dir_all(&path).map_err(|e| AddonError::io("mount volume", &path, e))?;
        Ok(path)
    }

    /// Releases a mount. Nothing is held per mount, so only existence is checked.
    pub fn unmount(&self, name: &str) -> AddonResult<()> {
        self.path(name).map(|_| ())
    }

    /// Lists all volumes in this scope.
    pub fn list(&self) -> Vec<VolumeEntry> {
        self.registry.list()
    }

    /// Removes every volume scoped to `stack_name` whose logical name is not
    /// in `declared`. Returns the removed scoped names.
    pub fn remove_unreferenced(
        &self,
        stack_name: &str,
        declared: &[String],
    ) -> AddonResult<Vec<String>> {
        let mut removed = Vec::new();

        for entry in self.registry.list() {
            let Some(logical) = unscoped_volume_name(stack_name, &entry.name) else {
                continue;
            };
            if declared.iter().any(|d| d == logical) {
                continue;
            }
            self.remove(&entry.name)?;
            removed.push(entry.name);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_scope_driver_names() {
        assert_eq!(VolumeScope::Local.driver_name(), "addon-local");
        assert_eq!(VolumeScope::Public.driver_name(), "addon-public");
        assert_eq!("public".parse::<VolumeScope>().unwrap(), VolumeScope::Public);
        assert!("global".parse::<VolumeScope>().is_err());
    }

    #[test]
    fn test_create_and_remove_volume() {
        let dir = TempDir::new().unwrap();
        let driver = LocalVolumeDriver::open(dir.path(), VolumeScope::Local);

        let path = driver.create("addon_data").unwrap();
        assert!(path.is_dir());
        assert!(path.starts_with(dir.path().join("addon-local").join("volumes")));
        fs::write(path.join("file.txt"), b"x").unwrap();

        driver.remove("addon_data").unwrap();
        assert!(!path.exists());
        assert!(matches!(
            driver.path("addon_data"),
            Err(AddonError::VolumeNotFound { .. })
        ));
        driver.remove("addon_data").unwrap();
    }

    #[test]
    fn test_scopes_are_isolated() {
        let dir = TempDir::new().unwrap();
        let local = LocalVolumeDriver::open(dir.path(), VolumeScope::Local);
        let public = LocalVolumeDriver::open(dir.path(), VolumeScope::Public);

        local.create("shared").unwrap();
        public.create("shared").unwrap();
        local.remove("shared").unwrap();

        assert!(public.get("shared").is_ok());
        assert!(local.list().is_empty());
    }

    #[test]
    fn test_mount_recreates_directory() {
        let dir = TempDir::new().unwrap();
        let driver = LocalVolumeDriver::open(dir.path(), VolumeScope::Local);
        let path = driver.create("v").unwrap();
        fs::remove_dir(&path).unwrap();

        assert_eq!(driver.mount("v").unwrap(), path);
        assert!(path.is_dir());
        driver.unmount("v").unwrap();
        assert!(driver.unmount("missing").is_err());
    }

    #[test]
    fn test_remove_unreferenced_only_touches_undeclared() {
        let dir = TempDir::new().unwrap();
        let driver = LocalVolumeDriver::open(dir.path(), VolumeScope::Local);
        for name in ["myaddon_data", "myaddon_cache", "myaddon_old", "other_data"] {
            driver.create(name).unwrap();
        }

        let declared = vec!["data".to_string(), "cache".to_string()];
        let removed = driver.remove_unreferenced("My Addon", &declared).unwrap();

        assert_eq!(removed, vec!["myaddon_old"]);
        let remaining: Vec<_> = driver.list().into_iter().map(|e| e.name).collect();
        assert_eq!(remaining, vec!["myaddon_cache", "myaddon_data", "other_data"]);
    }
}
