//! Current-backend compose engine adapter.
//!
//! The migration needs four things from the compose engine: the stack-format
//! label of a deployed add-on, creating (not starting) a stack, the host
//! mount of a named volume, and pruning volumes the manifest no longer
//! declares. [`DockerComposeEngine`] drives the container runtime CLI for
//! all of them.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

use addon_common::labels::{versions, COMPOSE_PROJECT_LABEL, STACK_VERSION_LABEL};
use addon_common::naming::{normalize_stack_name, unscoped_volume_name};
use addon_common::shell;
use addon_common::{AddonConfig, AddonError, AddonResult, StackDefinition};

/// Compose file name inside each stack directory.
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Current-backend stack operations used by the migration.
#[async_trait]
pub trait StackEngine: Send + Sync {
    /// Returns the stack-format version of the deployed add-on, or `None` if
    /// no container of it exists.
    async fn deployed_version(&self, name: &str) -> AddonResult<Option<String>>;

    /// Creates the stack without starting any service.
    async fn create_stack(&self, name: &str, definition: &StackDefinition) -> AddonResult<()>;

    /// Resolves the host mount path of a scoped volume.
    async fn volume_mountpoint(&self, scoped_name: &str) -> AddonResult<PathBuf>;

    /// Removes the stack's volumes whose logical name is not in `declared`.
    /// Returns the removed volume names.
    async fn remove_unused_volumes(&self, name: &str, declared: &[String])
        -> AddonResult<Vec<String>>;
}

/// [`StackEngine`] backed by `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerComposeEngine {
    docker: String,
    stacks_dir: PathBuf,
}

impl DockerComposeEngine {
    /// Creates an engine using the `docker` CLI at `docker`, keeping compose
    /// files under `stacks_dir`.
    pub fn new(docker: impl Into<String>, stacks_dir: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            stacks_dir: stacks_dir.into(),
        }
    }

    /// Creates an engine from the configuration.
    pub fn from_config(config: &AddonConfig) -> Self {
        Self::new(config.engine.docker_binary.clone(), config.stacks_dir())
    }

    /// Path of the rendered compose file of `name`.
    pub fn compose_file(&self, name: &str) -> PathBuf {
        self.stacks_dir
            .join(normalize_stack_name(name))
            .join(COMPOSE_FILE_NAME)
    }

    async fn docker<I, S>(&self, args: I) -> AddonResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        shell::exec_or_throw(&shell::command(&self.docker, args)).await
    }
}

#[async_trait]
impl StackEngine for DockerComposeEngine {
    async fn deployed_version(&self, name: &str) -> AddonResult<Option<String>> {
        let filter = project_filter(name);
        let format = format!("{{{{ .Label \"{}\" }}}}", STACK_VERSION_LABEL);
        let output = self
            .docker(["ps", "-a", "--filter", &filter, "--format", &format])
            .await?;
        Ok(parse_deployed_version(&output))
    }

    #[instrument(skip(self, definition))]
    async fn create_stack(&self, name: &str, definition: &StackDefinition) -> AddonResult<()> {
        let compose_file = self.compose_file(name);
        if let Some(dir) = compose_file.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AddonError::io("create stack directory", dir, e))?;
        }
        tokio::fs::write(&compose_file, definition.to_yaml()?)
            .await
            .map_err(|e| AddonError::io("write compose file", &compose_file, e))?;

        let file = compose_file.to_string_lossy();
        self.docker(["compose", "-p", definition.name.as_str(), "-f", &*file, "create"])
            .await?;

        info!(project = %definition.name, file = %compose_file.display(), "Created stack");
        Ok(())
    }

    async fn volume_mountpoint(&self, scoped_name: &str) -> AddonResult<PathBuf> {
        let cmd = shell::command(
            &self.docker,
            ["volume", "inspect", "--format", "{{ .Mountpoint }}", scoped_name],
        );
        let result = shell::exec(&cmd).await?;
        if !result.success() {
            let output = result.combined_output();
            if is_no_such_volume(&output) {
                return Err(AddonError::volume_not_found(scoped_name));
            }
            return Err(AddonError::ShellCommandFailed {
                command: cmd,
                exit_code: result.exit_code,
                output,
            });
        }

        let mountpoint = result.stdout.trim();
        if mountpoint.is_empty() {
            return Err(AddonError::internal(format!(
                "volume {} has no mountpoint",
                scoped_name
            )));
        }
        Ok(PathBuf::from(mountpoint))
    }

    async fn remove_unused_volumes(
        &self,
        name: &str,
        declared: &[String],
    ) -> AddonResult<Vec<String>> {
        let filter = project_filter(name);
        let output = self
            .docker(["volume", "ls", "--filter", &filter, "--format", "{{ .Name }}"])
            .await?;

        let mut removed = Vec::new();
        for volume in unused_volumes(name, &output, declared) {
            self.docker(["volume", "rm", volume.as_str()]).await?;
            debug!(volume = %volume, "Removed unused volume");
            removed.push(volume);
        }
        Ok(removed)
    }
}

/// Reads the version label from `docker ps --format` output, one line per
/// container. Containers without the label predate it and are legacy.
fn parse_deployed_version(output: &str) -> Option<String> {
    let mut containers = output.lines().map(str::trim).peekable();
    containers.peek()?;

    let labelled = containers.find(|label| !label.is_empty() && *label != "<no value>");
    Some(labelled.unwrap_or(versions::LEGACY).to_string())
}

fn project_filter(name: &str) -> String {
    format!("label={}={}", COMPOSE_PROJECT_LABEL, normalize_stack_name(name))
}

fn is_no_such_volume(output: &str) -> bool {
    output.to_ascii_lowercase().contains("no such volume")
}

fn unused_volumes(name: &str, listing: &str, declared: &[String]) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|volume| {
            unscoped_volume_name(name, volume)
                .is_some_and(|logical| !declared.iter().any(|d| d == logical))
        })
        .map(str::to_string)
        .collect()
}
