//! Add-on manifest model.
//!
//! A manifest describes an add-on: its environments (deployable units with
//! their services and declared volumes) and the user-facing settings groups.
//! Manifests are loaded from YAML and treated as read-only; merging carried
//! over settings produces a new manifest.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{AddonError, AddonResult};

/// Environment format rendered by the compose engine.
pub const FORMAT_DOCKER_COMPOSE: &str = "docker-compose";

/// Setting group whose entries become service environment variables.
pub const ENV_SETTINGS_GROUP: &str = "env";

/// Declarative description of an add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Display title.
    pub title: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Manifest format version.
    #[serde(default)]
    pub version: String,

    /// Deployable units, keyed by environment name.
    pub environments: BTreeMap<String, Environment>,

    /// Setting groups, keyed by group name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, Vec<Setting>>,
}

/// One deployable unit inside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Backend format indicator (e.g., "docker-compose").
    pub format: String,

    /// Services, keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,

    /// Declared volumes. Options are passed through untouched.
    #[serde(default)]
    pub volumes: BTreeMap<String, serde_yaml::Value>,
}

/// A service declared by an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Container image reference.
    pub image: String,

    /// Environment variables as `NAME=value` entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,

    /// Volume mounts (`volume:/container/path[:mode]`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Port publications.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    /// Restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,

    /// Command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<serde_yaml::Value>,

    /// Any other compose keys, passed through to the rendered definition.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Kind of user-facing setting control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingKind {
    /// Free text input.
    TextBox,
    /// Selection from `options`.
    Dropdown,
    /// Boolean toggle.
    Checkbox,
    /// Numeric input.
    Number,
    /// Masked text input.
    Password,
}

/// A named, typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// Setting name; for the `env` group this is the variable name.
    pub name: String,

    /// Control kind.
    #[serde(rename = "type", default = "default_setting_kind")]
    pub kind: SettingKind,

    /// Current value (the manifest default until the user changes it).
    #[serde(default, alias = "default")]
    pub value: String,

    /// Allowed values for dropdowns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_setting_kind() -> SettingKind {
    SettingKind::TextBox
}

impl Setting {
    /// Creates a text-box setting.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SettingKind::TextBox,
            value: value.into(),
            options: Vec::new(),
        }
    }

    /// Returns the setting as a `NAME=value` environment entry.
    pub fn env_entry(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl Manifest {
    /// Parses a manifest from YAML and validates it.
    pub fn from_yaml_str(content: &str) -> AddonResult<Self> {
        let manifest: Manifest = serde_yaml::from_str(content)
            .map_err(|e| AddonError::invalid_manifest(format!("parse error: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads a manifest file.
    pub fn load(path: impl AsRef<Path>) -> AddonResult<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| AddonError::io("read manifest", path, e))?;
        debug!(path = %path.display(), "Loaded add-on manifest");
        Self::from_yaml_str(&content)
    }

    /// Checks structural invariants.
    ///
    /// A manifest needs a title and at least one environment, and a volume
    /// name may be declared by only one environment.
    pub fn validate(&self) -> AddonResult<()> {
        if self.title.trim().is_empty() {
            return Err(AddonError::invalid_manifest("title must not be empty"));
        }
        if self.environments.is_empty() {
            return Err(AddonError::invalid_manifest(
                "at least one environment is required",
            ));
        }

        let mut seen = BTreeSet::new();
        for (env_name, env) in &self.environments {
            for volume in env.volumes.keys() {
                if !seen.insert(volume.as_str()) {
                    return Err(AddonError::invalid_manifest(format!(
                        "volume '{}' in environment '{}' is declared more than once",
                        volume, env_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns every declared volume name across all environments, sorted.
    pub fn declared_volume_names(&self) -> Vec<String> {
        self.environments
            .values()
            .flat_map(|env| env.volumes.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns the environment-variable settings group, if any.
    pub fn env_settings(&self) -> &[Setting] {
        self.settings
            .get(ENV_SETTINGS_GROUP)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Merges settings into the environment-variable group.
    ///
    /// Values replace same-named settings; unknown names are appended.
    pub fn apply_settings(&mut self, settings: &[Setting]) {
        let group = self
            .settings
            .entry(ENV_SETTINGS_GROUP.to_string())
            .or_default();

        for setting in settings {
            match group.iter_mut().find(|s| s.name == setting.name) {
                Some(existing) => {
                    debug!(setting = %setting.name, "Overriding manifest setting");
                    existing.value = setting.value.clone();
                }
                None => {
                    debug!(setting = %setting.name, "Adding carried-over setting");
                    group.push(setting.clone());
                }
            }
        }
    }

    /// Returns a copy of this manifest with `settings` merged in.
    pub fn with_settings(&self, settings: &[Setting]) -> Self {
        let mut merged = self.clone();
        if !settings.is_empty() {
            merged.apply_settings(settings);
        }
        merged
    }
}
