//! Current-backend stack definitions.
//!
//! A [`StackDefinition`] is the compose document rendered from a manifest.
//! Rendering flattens every environment into one project, injects the
//! environment-variable settings into each service and stamps the stack
//! labels on every service and volume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AddonError, AddonResult};
use crate::labels::StackLabels;
use crate::manifest::{Manifest, ServiceSpec, Setting, FORMAT_DOCKER_COMPOSE};
use crate::naming::normalize_stack_name;

/// Compose key holding labels.
const LABELS_KEY: &str = "labels";

/// Rendered compose document for one add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// Compose project name (the normalized add-on name).
    pub name: String,

    /// Services, keyed by service name.
    pub services: BTreeMap<String, ServiceDefinition>,

    /// Named volumes, keyed by logical volume name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeDefinition>,
}

/// One rendered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Container image reference.
    pub image: String,

    /// Environment entries (`NAME=value`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,

    /// Volume mounts.
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

    /// Object labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Passthrough compose keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// One rendered named volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    /// Object labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Driver options from the manifest, passed through.
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl StackDefinition {
    /// Renders the compose document for `name` from `manifest`.
    ///
    /// Only `docker-compose` environments can be rendered. Service names must
    /// be unique across environments.
    pub fn render(name: &str, manifest: &Manifest, labels: &StackLabels) -> AddonResult<Self> {
        let label_map = labels.to_map();
        let env_settings = manifest.env_settings();

        let mut services = BTreeMap::new();
        let mut volumes = BTreeMap::new();

        for (env_name, env) in &manifest.environments {
            if env.format != FORMAT_DOCKER_COMPOSE {
                return Err(AddonError::invalid_manifest(format!(
                    "environment '{}' has unsupported format '{}'",
                    env_name, env.format
                )));
            }

            for (service_name, spec) in &env.services {
                let service = render_service(spec, env_settings, &label_map);
                if services.insert(service_name.clone(), service).is_some() {
                    return Err(AddonError::invalid_manifest(format!(
                        "service '{}' is declared more than once",
                        service_name
                    )));
                }
            }

            for (volume_name, options) in &env.volumes {
                volumes.insert(volume_name.clone(), render_volume(options, &label_map));
            }
        }

        Ok(Self {
            name: normalize_stack_name(name),
            services,
            volumes,
        })
    }

    /// Returns the environment entries of a service.
    pub fn service_environment(&self, service: &str) -> Option<&[String]> {
        self.services.get(service).map(|s| s.environment.as_slice())
    }

    /// Serializes the definition as a compose YAML document.
    pub fn to_yaml(&self) -> AddonResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AddonError::internal(format!("failed to encode stack definition: {}", e)))
    }
}

fn render_service(
    spec: &ServiceSpec,
    env_settings: &[Setting],
    labels: &BTreeMap<String, String>,
) -> ServiceDefinition {
    let mut environment = spec.environment.clone();
    for setting in env_settings {
        environment.retain(|entry| env_key(entry) != setting.name);
        environment.push(setting.env_entry());
    }

    let mut extra = spec.extra.clone();
    let mut service_labels = extra
        .remove(LABELS_KEY)
        .map(|v| string_map(&v))
        .unwrap_or_default();
    service_labels.extend(labels.clone());

    ServiceDefinition {
        image: spec.image.clone(),
        environment,
        volumes: spec.volumes.clone(),
        ports: spec.ports.clone(),
        restart: spec.restart.clone(),
        command: spec.command.clone(),
        labels: service_labels,
        extra,
    }
}

fn render_volume(
    options: &serde_yaml::Value,
    labels: &BTreeMap<String, String>,
) -> VolumeDefinition {
    let mut rendered = VolumeDefinition::default();

    if let serde_yaml::Value::Mapping(map) = options {
        for (key, value) in map {
            let Some(key) = key.as_str() else { continue };
            if key == LABELS_KEY {
                rendered.labels.extend(string_map(value));
            } else {
                rendered.options.insert(key.to_string(), value.clone());
            }
        }
    }

    rendered.labels.extend(labels.clone());
    rendered
}

/// Returns the variable name of a `NAME=value` entry.
fn env_key(entry: &str) -> &str {
    entry.split_once('=').map(|(k, _)| k).unwrap_or(entry)
}

fn string_map(value: &serde_yaml::Value) -> BTreeMap<String, String> {
    let serde_yaml::Value::Mapping(map) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let value = match v {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}
