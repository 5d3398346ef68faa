//! Migration orchestrator.
//!
//! [`StackMigrator::migrate_stack`] moves one add-on from the legacy stack
//! service to the compose engine:
//!
//! 1. open a legacy session (nothing has been touched if this fails)
//! 2. delete the legacy stack record, tolerating an already-absent one
//! 3. merge the carried-over settings into a copy of the manifest
//! 4. render and create (not start) the current stack
//! 5. migrate the content of every declared volume
//! 6. remove volumes the manifest no longer declares
//!
//! The session is always logged out afterwards. A migration journal spans
//! steps 2-6, so a run interrupted after the legacy stack is gone (or after
//! the current stack stamped its label) is resumed on the next start-up
//! instead of being mistaken for a finished one.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use addon_common::naming::scoped_volume_name;
use addon_common::{
    AddonConfig, AddonError, AddonResult, LocalVolumeDriver, Manifest, Setting, StackDefinition,
    StackFormat, StackLabels, VolumeScope,
};

use crate::engine::{DockerComposeEngine, StackEngine};
use crate::journal::{MigrationJournal, MigrationRecord};
use crate::session::{LegacyClientSettings, LegacyConnector, LegacySession, RemoteConnector};
use crate::volume::{LegacyVolumes, VolumeMigrator};

/// Sub-directory of the state directory holding migration journals.
pub const MIGRATIONS_DIR_NAME: &str = "migrations";

/// Drives add-on migrations from the legacy backend to the current one.
pub struct StackMigrator {
    connector: Arc<dyn LegacyConnector>,
    engine: Arc<dyn StackEngine>,
    legacy_volumes: Arc<dyn LegacyVolumes>,
    volumes: VolumeMigrator,
    journal: MigrationJournal,
    labels: StackLabels,
}

impl StackMigrator {
    /// Creates a migrator from its collaborators.
    pub fn new(
        connector: Arc<dyn LegacyConnector>,
        engine: Arc<dyn StackEngine>,
        legacy_volumes: Arc<dyn LegacyVolumes>,
        volumes: VolumeMigrator,
        journal: MigrationJournal,
        labels: StackLabels,
    ) -> Self {
        Self {
            connector,
            engine,
            legacy_volumes,
            volumes,
            journal,
            labels,
        }
    }

    /// Wires the production collaborators from the configuration.
    pub fn from_config(config: &AddonConfig) -> Self {
        let state_dir = &config.paths.state_dir;
        Self::new(
            Arc::new(RemoteConnector::new(LegacyClientSettings::from(config))),
            Arc::new(DockerComposeEngine::from_config(config)),
            Arc::new(LocalVolumeDriver::open(state_dir, VolumeScope::Local)),
            VolumeMigrator::new(&config.paths.cache_dir),
            MigrationJournal::new(state_dir.join(MIGRATIONS_DIR_NAME)),
            StackLabels::current(config.engine.product_version.clone()),
        )
    }

    /// Migrates `name` if its deployed stack is not current.
    ///
    /// An add-on with no deployed containers has nothing to migrate, unless
    /// an earlier migration of it was interrupted.
    #[instrument(skip(self, manifest, settings))]
    pub async fn ensure_migrated(
        &self,
        name: &str,
        manifest: &Manifest,
        settings: &[Setting],
    ) -> AddonResult<()> {
        let detected = match self.engine.deployed_version(name).await? {
            Some(version) => version,
            None => {
                debug!("No deployed containers, treating stack as current");
                StackFormat::Current.as_str().to_string()
            }
        };
        self.migrate_stack(name, &detected, manifest, settings).await
    }

    /// Migrates `name`, deployed with stack-format `detected_version`, using
    /// `manifest` and the settings captured from the previous version.
    #[instrument(skip(self, manifest, settings), fields(carried_settings = settings.len()))]
    pub async fn migrate_stack(
        &self,
        name: &str,
        detected_version: &str,
        manifest: &Manifest,
        settings: &[Setting],
    ) -> AddonResult<()> {
        let pending = self.journal.load(name)?;

        match (StackFormat::from_label(detected_version), &pending) {
            (Some(StackFormat::Current), None) => {
                debug!("Stack is current, nothing to migrate");
                return Ok(());
            }
            (Some(StackFormat::Current), Some(record)) => {
                warn!(
                    started_at = %record.started_at,
                    migrated_volumes = record.completed_volumes.len(),
                    "Resuming interrupted migration"
                );
            }
            (Some(StackFormat::Legacy), _) => {}
            (None, _) => {
                return Err(AddonError::UnknownVersion {
                    name: name.to_string(),
                    version: detected_version.to_string(),
                })
            }
        }

        let mut session = self.connector.connect().await?;
        let result = self
            .run(session.as_mut(), name, manifest, settings, pending)
            .await;

        if let Err(e) = session.logout().await {
            warn!(error = %e, "Failed to log out of legacy service");
        }

        match &result {
            Ok(()) => info!("Stack migrated"),
            Err(e) => warn!(error = %e, "Stack migration failed"),
        }
        result
    }

    async fn run(
        &self,
        session: &mut dyn LegacySession,
        name: &str,
        manifest: &Manifest,
        settings: &[Setting],
        pending: Option<MigrationRecord>,
    ) -> AddonResult<()> {
        let mut record = match pending {
            Some(record) => record,
            None => self.journal.begin(name)?,
        };

        match session.delete_stack(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Legacy stack already deleted"),
            Err(e) => return Err(e),
        }

        let manifest = manifest.with_settings(settings);
        let definition = StackDefinition::render(name, &manifest, &self.labels)?;
        self.engine.create_stack(name, &definition).await?;

        let declared = manifest.declared_volume_names();
        for volume in &declared {
            if record.is_volume_done(volume) {
                debug!(volume = %volume, "Volume already migrated");
                // A crash between recording and discard leaves the copy behind.
                self.volumes.purge(&scoped_volume_name(name, volume)).await?;
                continue;
            }
            self.migrate_volume(name, volume, &mut record).await?;
        }

        let removed = self.legacy_volumes.remove_unreferenced(name, &declared)?;
        let pruned = self.engine.remove_unused_volumes(name, &declared).await?;
        if !removed.is_empty() || !pruned.is_empty() {
            info!(?removed, ?pruned, "Removed volumes no longer declared");
        }

        self.journal.finish(name)
    }

    async fn migrate_volume(
        &self,
        name: &str,
        volume: &str,
        record: &mut MigrationRecord,
    ) -> AddonResult<()> {
        let scoped = scoped_volume_name(name, volume);

        let legacy: PathBuf = match self.legacy_volumes.mountpoint(&scoped) {
            Ok(path) => path,
            Err(AddonError::VolumeNotFound { .. }) => {
                debug!(volume = %scoped, "No legacy volume, nothing to migrate");
                return self.journal.record_volume(record, volume);
            }
            Err(e) => return Err(e),
        };
        let current = self.engine.volume_mountpoint(&scoped).await?;

        let staging = self.volumes.transfer(&scoped, &legacy, &current).await?;
        self.journal.record_volume(record, volume)?;
        self.volumes.discard(staging).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_common::labels::versions;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy, PartialEq)]
    enum DeleteOutcome {
        Deleted,
        NotFound,
        Fails,
    }

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct FakeConnector {
        calls: CallLog,
        unavailable: bool,
        delete: DeleteOutcome,
        logout_fails: bool,
    }

    struct FakeSession {
        calls: CallLog,
        delete: DeleteOutcome,
        logout_fails: bool,
    }

    #[async_trait]
    impl LegacyConnector for FakeConnector {
        async fn connect(&self) -> AddonResult<Box<dyn LegacySession>> {
            self.calls.lock().unwrap().push("connect".to_string());
            if self.unavailable {
                return Err(AddonError::ServiceUnavailable {
                    endpoint: "http://127.0.0.1:9000/api/status".to_string(),
                    attempts: 5,
                    message: "connection refused".to_string(),
                });
            }
            Ok(Box::new(FakeSession {
                calls: self.calls.clone(),
                delete: self.delete,
                logout_fails: self.logout_fails,
            }))
        }
    }

    #[async_trait]
    impl LegacySession for FakeSession {
        async fn delete_stack(&mut self, name: &str) -> AddonResult<()> {
            self.calls.lock().unwrap().push(format!("delete {}", name));
            match self.delete {
                DeleteOutcome::Deleted => Ok(()),
                DeleteOutcome::NotFound => Err(AddonError::stack_not_found(name)),
                DeleteOutcome::Fails => Err(AddonError::remote("delete stack", "status 500")),
            }
        }

        async fn logout(&mut self) -> AddonResult<()> {
            self.calls.lock().unwrap().push("logout".to_string());
            if self.logout_fails {
                return Err(AddonError::remote("logout", "status 500"));
            }
            Ok(())
        }
    }

    struct FakeEngine {
        calls: CallLog,
        version: Option<String>,
        volumes_root: PathBuf,
        created: Mutex<Vec<(String, StackDefinition)>>,
    }

    #[async_trait]
    impl StackEngine for FakeEngine {
        async fn deployed_version(&self, _name: &str) -> AddonResult<Option<String>> {
            Ok(self.version.clone())
        }

        async fn create_stack(&self, name: &str, definition: &StackDefinition) -> AddonResult<()> {
            self.calls.lock().unwrap().push(format!("create {}", name));
            self.created
                .lock()
                .unwrap()
                .push((name.to_string(), definition.clone()));
            Ok(())
        }

        async fn volume_mountpoint(&self, scoped_name: &str) -> AddonResult<PathBuf> {
            let path = self.volumes_root.join(scoped_name);
            fs::create_dir_all(&path).unwrap();
            Ok(path)
        }

        async fn remove_unused_volumes(
            &self,
            _name: &str,
            _declared: &[String],
        ) -> AddonResult<Vec<String>> {
            self.calls.lock().unwrap().push("prune".to_string());
            Ok(Vec::new())
        }
    }

    struct Harness {
        root: TempDir,
        calls: CallLog,
        engine: Arc<FakeEngine>,
        legacy: Arc<LocalVolumeDriver>,
        journal: MigrationJournal,
        migrator: StackMigrator,
    }

    impl Harness {
        fn current_mount(&self, scoped: &str) -> PathBuf {
            self.root.path().join("current").join(scoped)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn harness_with(
        version: Option<&str>,
        unavailable: bool,
        delete: DeleteOutcome,
        logout_fails: bool,
    ) -> Harness {
        let root = TempDir::new().unwrap();
        let calls = CallLog::default();
        let engine = Arc::new(FakeEngine {
            calls: calls.clone(),
            version: version.map(str::to_string),
            volumes_root: root.path().join("current"),
            created: Mutex::new(Vec::new()),
        });
        let legacy = Arc::new(LocalVolumeDriver::open(
            root.path().join("state"),
            VolumeScope::Local,
        ));
        let journal = MigrationJournal::new(root.path().join("state").join(MIGRATIONS_DIR_NAME));
        let migrator = StackMigrator::new(
            Arc::new(FakeConnector {
                calls: calls.clone(),
                unavailable,
                delete,
                logout_fails,
            }),
            engine.clone(),
            legacy.clone(),
            VolumeMigrator::new(root.path().join("cache")),
            journal.clone(),
            StackLabels::current("3.1.0"),
        );
        Harness {
            root,
            calls,
            engine,
            legacy,
            journal,
            migrator,
        }
    }

    fn harness() -> Harness {
        harness_with(Some(versions::LEGACY), false, DeleteOutcome::Deleted, false)
    }

    fn manifest() -> Manifest {
        Manifest::from_yaml_str(
            r#"
title: My Addon
environments:
  main:
    format: docker-compose
    services:
      app:
        image: busybox:latest
        volumes:
          - data:/data
    volumes:
      data: {}
settings:
  env:
    - name: param1
      type: text-box
      default: aaa
"#,
        )
        .unwrap()
    }

    fn write_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_migrates_legacy_stack() {
        let h = harness();
        let legacy_data = h.legacy.create("myaddon_data").unwrap();
        write_file(&legacy_data.join("logDir/tmpfile.txt"), "log");
        write_file(&legacy_data.join("tmpfile.txt"), "top");
        let obsolete = h.legacy.create("myaddon_old").unwrap();
        h.legacy.create("otheraddon_old").unwrap();

        h.migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap();

        let current = h.current_mount("myaddon_data");
        assert_eq!(fs::read_to_string(current.join("logDir/tmpfile.txt")).unwrap(), "log");
        assert_eq!(fs::read_to_string(current.join("tmpfile.txt")).unwrap(), "top");
        assert_eq!(fs::read_dir(&legacy_data).unwrap().count(), 0);

        assert!(!obsolete.exists());
        assert!(h.legacy.get("myaddon_old").is_err());
        assert!(h.legacy.get("otheraddon_old").is_ok());

        assert_eq!(
            h.calls(),
            vec!["connect", "delete My Addon", "create My Addon", "prune", "logout"]
        );
        assert!(!h.journal.is_pending("My Addon").unwrap());
    }

    #[tokio::test]
    async fn test_current_stack_is_untouched() {
        let h = harness();
        let current = h.current_mount("myaddon_data");
        write_file(&current.join("keep.txt"), "kept");

        for _ in 0..2 {
            h.migrator
                .migrate_stack("My Addon", versions::CURRENT, &manifest(), &[])
                .await
                .unwrap();
        }

        assert!(h.calls().is_empty());
        assert_eq!(fs::read_to_string(current.join("keep.txt")).unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_unknown_version_attempts_nothing() {
        let h = harness();

        let err = h
            .migrator
            .migrate_stack("My Addon", "7", &manifest(), &[])
            .await
            .unwrap_err();

        match err {
            AddonError::UnknownVersion { name, version } => {
                assert_eq!(name, "My Addon");
                assert_eq!(version, "7");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_legacy_stack_is_tolerated() {
        let h = harness_with(Some(versions::LEGACY), false, DeleteOutcome::NotFound, false);

        h.migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap();

        assert!(h.calls().contains(&"create My Addon".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_service_fails_before_any_change() {
        let h = harness_with(Some(versions::LEGACY), true, DeleteOutcome::Deleted, false);
        let legacy_data = h.legacy.create("myaddon_data").unwrap();
        write_file(&legacy_data.join("tmpfile.txt"), "top");

        let err = h
            .migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AddonError::ServiceUnavailable { .. }));
        assert_eq!(h.calls(), vec!["connect"]);
        assert!(legacy_data.join("tmpfile.txt").exists());
        assert!(!h.journal.is_pending("My Addon").unwrap());
    }

    #[tokio::test]
    async fn test_logout_failure_does_not_mask_primary_error() {
        let h = harness_with(Some(versions::LEGACY), false, DeleteOutcome::Fails, true);

        let err = h
            .migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AddonError::Remote { ref operation, .. } if operation == "delete stack"
        ));
        assert_eq!(h.calls(), vec!["connect", "delete My Addon", "logout"]);
    }

    #[tokio::test]
    async fn test_logout_failure_after_success_is_ignored() {
        let h = harness_with(Some(versions::LEGACY), false, DeleteOutcome::Deleted, true);

        h.migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settings_carried_over() {
        let h = harness();

        h.migrator
            .migrate_stack(
                "My Addon",
                versions::LEGACY,
                &manifest(),
                &[Setting::text("param1", "bbb")],
            )
            .await
            .unwrap();

        let created = h.engine.created.lock().unwrap();
        let (name, definition) = &created[0];
        assert_eq!(name, "My Addon");
        let environment = definition.service_environment("app").unwrap();
        assert!(environment.contains(&"param1=bbb".to_string()));
        assert!(!environment.contains(&"param1=aaa".to_string()));
    }

    #[tokio::test]
    async fn test_resumes_interrupted_migration() {
        let h = harness();
        // Earlier run moved "data" and crashed before finishing.
        let mut record = h.journal.begin("My Addon").unwrap();
        h.journal.record_volume(&mut record, "data").unwrap();
        let current = h.current_mount("myaddon_data");
        write_file(&current.join("tmpfile.txt"), "migrated");
        h.legacy.create("myaddon_data").unwrap();

        h.migrator
            .migrate_stack("My Addon", versions::CURRENT, &manifest(), &[])
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(current.join("tmpfile.txt")).unwrap(), "migrated");
        assert!(h.calls().contains(&"create My Addon".to_string()));
        assert!(!h.journal.is_pending("My Addon").unwrap());
    }

    #[tokio::test]
    async fn test_resume_removes_staging_of_recorded_volume() {
        let h = harness();
        // Crash after "data" was recorded but before its staging was dropped.
        let mut record = h.journal.begin("My Addon").unwrap();
        h.journal.record_volume(&mut record, "data").unwrap();
        let cache = h.root.path().join("cache");
        write_file(&cache.join("myaddon_data.AbC123/tmpfile.txt"), "migrated");
        write_file(&cache.join("myaddon_data.AbC123.staged"), "");
        write_file(&cache.join("otheraddon_data.XyZ/tmpfile.txt"), "other");

        h.migrator
            .migrate_stack("My Addon", versions::CURRENT, &manifest(), &[])
            .await
            .unwrap();

        let mut left: Vec<String> = fs::read_dir(&cache)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["otheraddon_data.XyZ".to_string()]);
        assert!(!h.journal.is_pending("My Addon").unwrap());
    }

    #[tokio::test]
    async fn test_declared_volume_without_legacy_counterpart() {
        let h = harness();

        h.migrator
            .migrate_stack("My Addon", versions::LEGACY, &manifest(), &[])
            .await
            .unwrap();

        assert!(!h.current_mount("myaddon_data").exists());
    }

    #[tokio::test]
    async fn test_ensure_migrated_without_containers_is_noop() {
        let h = harness_with(None, false, DeleteOutcome::Deleted, false);

        h.migrator
            .ensure_migrated("My Addon", &manifest(), &[])
            .await
            .unwrap();

        assert!(h.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_migrated_legacy() {
        let h = harness();
        let legacy_data = h.legacy.create("myaddon_data").unwrap();
        write_file(&legacy_data.join("tmpfile.txt"), "top");

        h.migrator
            .ensure_migrated("My Addon", &manifest(), &[])
            .await
            .unwrap();

        assert!(h.current_mount("myaddon_data").join("tmpfile.txt").exists());
    }
}
