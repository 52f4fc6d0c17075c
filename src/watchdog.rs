use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::control_plane::ControlPlane;
use crate::error::{DriverError, Result};
use crate::reconciler::{observe_driver_set, DriverSetSnapshot};

/// Why the watchdog stopped watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The driver set no longer matches the snapshot the last cycle started
    /// from; the supervisor should start over from a fresh cycle.
    RestartRequested { reason: String },
}

/// Polls the control plane and signals a restart once the driver set drifts
/// from the reconciled snapshot.
pub struct DriftWatchdog {
    control_plane: Arc<dyn ControlPlane>,
    blacklist_setting: String,
    poll_interval: Duration,
    max_reconnect_attempts: u32,
    backoff_cap: Duration,
}

impl DriftWatchdog {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: &AgentConfig) -> Self {
        Self {
            control_plane,
            blacklist_setting: config.blacklist_setting.clone(),
            poll_interval: config.poll_interval(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            backoff_cap: config.reconnect_backoff_cap(),
        }
    }

    pub async fn observe(&self) -> Result<DriverSetSnapshot> {
        let (records, blacklist) = observe_driver_set(self.control_plane.as_ref(), &self.blacklist_setting).await?;
        Ok(DriverSetSnapshot::capture(&records, &blacklist))
    }

    /// Returns on drift. Connectivity failures are retried with exponential
    /// backoff and only become fatal past the attempt ceiling.
    pub async fn watch(&self, baseline: &DriverSetSnapshot) -> Result<WatchOutcome> {
        let mut backoff = Backoff::reconnect(self.backoff_cap);

        loop {
            match self.observe().await {
                Ok(current) => {
                    if backoff.attempt() > 0 {
                        info!(attempts = backoff.attempt(), "Reconnected to control plane");
                        backoff.reset();
                    }
                    if let Some(reason) = baseline.drift(&current) {
                        info!(reason = %reason, "Driver set drifted, restart requested");
                        return Ok(WatchOutcome::RestartRequested { reason });
                    }
                    trace!(drivers = current.driver_count(), "No drift");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) if e.is_transient() => {
                    if backoff.attempt() >= self.max_reconnect_attempts {
                        return Err(DriverError::ControlPlaneUnavailable {
                            attempts: backoff.attempt(),
                        });
                    }
                    let delay = backoff.next();
                    warn!(attempt = backoff.attempt(), delay = ?delay, error = %e, "Control plane unreachable, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
