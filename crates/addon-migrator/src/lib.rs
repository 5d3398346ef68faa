//! Add-on migration from the legacy stack service to the compose engine.
//!
//! On start-up an add-on deployed by the legacy stack-management service is
//! moved, with its volume data and user settings, to a stack created by the
//! local compose engine:
//!
//! - [`migrate`]: Orchestrator and start-up entry point
//! - [`session`]: Legacy REST session (liveness probe, auth, stack deletion)
//! - [`token`]: Bearer token lifecycle state machine
//! - [`credentials`]: Local administrator credential file
//! - [`engine`]: Compose engine adapter
//! - [`volume`]: Staged volume content migration
//! - [`journal`]: Persistent record of in-flight migrations

pub mod credentials;
pub mod engine;
pub mod journal;
pub mod migrate;
pub mod session;
pub mod token;
pub mod volume;

pub use credentials::AdminCredentials;
pub use engine::{DockerComposeEngine, StackEngine};
pub use journal::{MigrationJournal, MigrationRecord};
pub use migrate::StackMigrator;
pub use session::{
    LegacyClientSettings, LegacyConnector, LegacySession, RemoteConnector, RemoteSession,
};
pub use token::{TokenEvent, TokenState};
pub use volume::{LegacyVolumes, VolumeMigrator};
