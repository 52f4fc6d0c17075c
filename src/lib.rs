pub mod agent;
pub mod archive;
pub mod backoff;
pub mod clienv;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod handlers;
pub mod installer;
pub mod model;
pub mod plugin;
pub mod reconciler;
pub mod schema;
pub mod watchdog;

pub use agent::Agent;
pub use config::AgentConfig;
pub use control_plane::{ControlPlane, RestControlPlane};
pub use error::{DriverError, DriverFailure, Result, Stage};
pub use handlers::LifecycleHandlers;
pub use installer::DriverInstaller;
pub use reconciler::{DriverSetReconciler, DriverSetSnapshot, SyncReport};
pub use schema::SchemaPublisher;
pub use watchdog::{DriftWatchdog, WatchOutcome};
