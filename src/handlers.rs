//! Entry points for driver lifecycle events.
//!
//! Each handler performs the single-driver workflow for one event and then a
//! full resync, so the aggregate `machine` schema always reflects the result.

use tracing::{info, warn};

use crate::error::{DriverError, Result, Stage};
use crate::model::{DriverAction, DriverRecord, DriverState};
use crate::reconciler::{DriverSetReconciler, SyncReport};

pub struct LifecycleHandlers {
    reconciler: DriverSetReconciler,
}

impl LifecycleHandlers {
    pub fn new(reconciler: DriverSetReconciler) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &DriverSetReconciler {
        &self.reconciler
    }

    async fn fetch(&self, id: &str) -> Result<DriverRecord> {
        self.reconciler
            .control_plane()
            .get_driver(id)
            .await?
            .ok_or_else(|| DriverError::DriverNotFound(id.to_string()))
    }

    /// Installs if needed, publishes the driver's config schema and marks it
    /// active. Failures are reported on the record and returned.
    pub async fn on_activate(&self, id: &str) -> Result<SyncReport> {
        let record = self.fetch(id).await?;

        if self.reconciler.blacklist().await?.contains(&record.name) {
            warn!(driver = %record.name, "Ignoring activation of blacklisted driver");
            return self.reconciler.sync().await;
        }

        info!(driver = %record.name, id = %id, "Activating driver");
        let installer = self.reconciler.installer();
        let reinstall = record.is_downloadable()
            && (record.state != DriverState::Active || !installer.binary_is_on_path(&record.name));

        let result = async {
            if reinstall {
                installer
                    .install(&record.name, &record.source_uri, &record.checksum)
                    .await?;
            }
            self.reconciler
                .publisher()
                .publish_driver_config_schema(&record.name)
                .await?;
            if record.state != DriverState::Active {
                self.reconciler
                    .control_plane()
                    .driver_action(id, DriverAction::Activate)
                    .await?;
            }
            Ok::<_, DriverError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(driver = %record.name, stage = %Stage::Activate, error = %e, "Activation failed");
            if let Err(report) = self.reconciler.report_error(&record, &e.to_string()).await {
                warn!(driver = %record.name, error = %report, "Failed to report driver error");
            }
            return Err(e);
        }

        self.reconciler.sync().await
    }

    /// Tears down the driver's config schema. The binary stays installed.
    pub async fn on_deactivate(&self, id: &str) -> Result<SyncReport> {
        let record = self.fetch(id).await?;
        info!(driver = %record.name, id = %id, "Deactivating driver");

        self.reconciler
            .publisher()
            .remove_schema(&record.config_schema_name())
            .await?;
        self.reconciler.sync().await
    }

    /// Tears down the config schema and deletes the installed binary.
    pub async fn on_remove(&self, id: &str) -> Result<SyncReport> {
        let record = self.fetch(id).await?;
        info!(driver = %record.name, id = %id, "Removing driver");

        self.reconciler
            .publisher()
            .remove_schema(&record.config_schema_name())
            .await?;
        if !record.builtin {
            self.reconciler.installer().uninstall(&record.name).await?;
        }
        self.reconciler.sync().await
    }
}
