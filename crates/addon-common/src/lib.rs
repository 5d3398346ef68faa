//! Common infrastructure for gateway add-on stack management.
//!
//! This crate holds what both stack backends share:
//!
//! - [`manifest`]: Add-on manifest model and settings merge
//! - [`stack`]: Rendering a manifest into a compose stack definition
//! - [`registry`]: Crash-durable volume name → host path registry
//! - [`driver`]: Local volume driver on top of a registry scope
//! - [`naming`]: Stack name normalization and volume scoping
//! - [`labels`]: Metadata labels and stack-format versions
//! - [`config`]: TOML configuration with environment overrides
//! - [`shell`]: Quoted shell command execution
//! - [`error`]: Error types

pub mod config;
pub mod driver;
pub mod error;
pub mod labels;
pub mod manifest;
pub mod naming;
pub mod registry;
pub mod shell;
pub mod stack;

// Re-export commonly used items at crate root
pub use config::AddonConfig;
pub use driver::{LocalVolumeDriver, VolumeScope};
pub use error::{AddonError, AddonResult};
pub use labels::{StackFormat, StackLabels};
pub use manifest::{Environment, Manifest, ServiceSpec, Setting, SettingKind};
pub use registry::{VolumeEntry, VolumeRegistry};
pub use stack::StackDefinition;
