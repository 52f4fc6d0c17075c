//! Wires the collaborators together and drives sync-then-watch cycles.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::control_plane::{ControlPlane, RestControlPlane};
use crate::error::{DriverError, Result};
use crate::handlers::LifecycleHandlers;
use crate::installer::DriverInstaller;
use crate::plugin::{FlagSource, PluginClient};
use crate::reconciler::{DriverSetReconciler, SyncReport};
use crate::schema::{FieldOverrides, SchemaPublisher};
use crate::watchdog::{DriftWatchdog, WatchOutcome};

pub struct Agent {
    config: AgentConfig,
    reconciler: DriverSetReconciler,
    watchdog: DriftWatchdog,
}

impl Agent {
    /// Agent talking to the configured REST control plane and launching real
    /// driver plugins.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let control_plane: Arc<dyn ControlPlane> = Arc::new(RestControlPlane::new(&config.control_plane)?);
        let flags: Arc<dyn FlagSource> = Arc::new(PluginClient::new(&config.install_dir, config.plugin_timeout()));
        Self::with_collaborators(config, control_plane, flags)
    }

    pub fn with_collaborators(
        config: AgentConfig,
        control_plane: Arc<dyn ControlPlane>,
        flags: Arc<dyn FlagSource>,
    ) -> Result<Self> {
        let installer = DriverInstaller::new(&config.install_dir, &config.work_dir)?;
        let overrides = FieldOverrides::builtin().merge(&config.field_overrides);
        let publisher = SchemaPublisher::new(control_plane.clone(), flags, overrides, config.schema_wait_timeout());
        let reconciler = DriverSetReconciler::new(control_plane.clone(), installer, publisher, &config);
        let watchdog = DriftWatchdog::new(control_plane, &config);

        Ok(Self {
            config,
            reconciler,
            watchdog,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &DriverSetReconciler {
        &self.reconciler
    }

    pub fn handlers(&self) -> LifecycleHandlers {
        LifecycleHandlers::new(self.reconciler.clone())
    }

    /// One sync, retrying while the control plane cannot be reached.
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut backoff = Backoff::reconnect(self.config.reconnect_backoff_cap());
        loop {
            match self.reconciler.sync().await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_transient() => {
                    if backoff.attempt() >= self.config.max_reconnect_attempts {
                        return Err(DriverError::ControlPlaneUnavailable {
                            attempts: backoff.attempt(),
                        });
                    }
                    let delay = backoff.next();
                    warn!(attempt = backoff.attempt(), delay = ?delay, error = %e, "Control plane unreachable, retrying sync");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Syncs, logs per-driver failures, then watches until the driver set
    /// drifts.
    pub async fn run_cycle(&self) -> Result<WatchOutcome> {
        let mut report = self.sync().await?;
        if let Some(err) = report.take_error() {
            warn!(error = %err, "Sync finished with driver failures");
        }
        info!(
            published = ?report.published,
            activated = ?report.activated,
            "Watching control plane for driver changes"
        );
        self.watchdog.watch(&report.snapshot).await
    }
}
