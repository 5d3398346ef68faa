//! Error types for add-on stack operations.
//!
//! This module defines the error types used throughout the add-on crates.
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for add-on operations.
pub type AddonResult<T> = Result<T, AddonError>;

/// Errors that can occur while managing or migrating add-on stacks.
#[derive(Debug, Error)]
pub enum AddonError {
    /// File-system operation failed.
    #[error("I/O error during {operation} on '{}': {source}", path.display())]
    Io {
        /// The operation that failed (e.g., "copy", "remove content").
        operation: String,
        /// The path the operation targeted.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration file or value is invalid.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Manifest could not be parsed or is inconsistent.
    #[error("Invalid manifest: {message}")]
    InvalidManifest {
        /// Error message.
        message: String,
    },

    /// A volume with this name is already registered.
    #[error("Volume '{name}' already exists")]
    VolumeExists {
        /// The logical volume name.
        name: String,
    },

    /// Volume name cannot be used as a directory name.
    #[error("Invalid volume name '{name}'")]
    InvalidVolumeName {
        /// The rejected name.
        name: String,
    },

    /// A volume could not be found in the backend's records.
    #[error("Volume '{name}' not found")]
    VolumeNotFound {
        /// The logical or scoped volume name.
        name: String,
    },

    /// The registry state file could not be written or encoded.
    #[error("Volume registry persistence failed for '{}': {message}", path.display())]
    RegistryPersist {
        /// The registry state file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Legacy control plane could not be reached.
    #[error("Legacy service unavailable at {endpoint} after {attempts} attempt(s): {message}")]
    ServiceUnavailable {
        /// The probed endpoint.
        endpoint: String,
        /// Number of probe attempts made.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// Authentication with the legacy control plane failed.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Error message.
        message: String,
    },

    /// Bearer token could not be decoded.
    #[error("Malformed bearer token: {message}")]
    MalformedToken {
        /// Error message.
        message: String,
    },

    /// Remote request returned an error status or failed in transit.
    #[error("Legacy API request failed: {operation}: {message}")]
    Remote {
        /// The API operation (e.g., "list stacks").
        operation: String,
        /// Error message.
        message: String,
    },

    /// No legacy stack record matches the requested name.
    #[error("Legacy stack '{name}' not found")]
    StackNotFound {
        /// The add-on name as requested.
        name: String,
    },

    /// Detected stack-format version is neither legacy nor current.
    #[error("Unknown stack version '{version}' for add-on '{name}'")]
    UnknownVersion {
        /// The add-on name.
        name: String,
        /// The version label found on the deployed stack.
        version: String,
    },

    /// Volume content migration failed at a given step.
    #[error("Volume migration step '{step}' failed for '{}': {source}", path.display())]
    VolumeMigration {
        /// The migration step that failed.
        step: &'static str,
        /// The path the step was working on.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl AddonError {
    /// Creates an I/O error with operation and path context.
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid manifest error.
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates a remote request error.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a stack not found error.
    pub fn stack_not_found(name: impl Into<String>) -> Self {
        Self::StackNotFound { name: name.into() }
    }

    /// Creates a volume not found error.
    pub fn volume_not_found(name: impl Into<String>) -> Self {
        Self::VolumeNotFound { name: name.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error reports an already-absent legacy stack.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AddonError::StackNotFound { .. })
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed when the whole operation is re-run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AddonError::ServiceUnavailable { .. }
                | AddonError::Remote { .. }
                | AddonError::VolumeMigration { .. }
                | AddonError::ShellCommandFailed { .. }
        )
    }
}
