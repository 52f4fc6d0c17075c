use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use super::machine::{machine_schema, RoleProfile};
use super::translate::{translate_flags, FieldOverrides};
use crate::backoff::{poll_until, Backoff};
use crate::control_plane::ControlPlane;
use crate::error::{DriverError, Result};
use crate::model::{config_schema_name, NewSchema, SchemaDocument};
use crate::plugin::FlagSource;

/// Which existing documents a new one supersedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replace {
    /// Every live document with the same name, whatever its roles.
    ByName,
    /// Only the document with the same name and role set.
    BySlot,
}

/// Generates and publishes schema documents with replace semantics.
///
/// Clones share one lock, so every generate-and-publish sequence in the
/// process runs one at a time.
#[derive(Clone)]
pub struct SchemaPublisher {
    control_plane: Arc<dyn ControlPlane>,
    flags: Arc<dyn FlagSource>,
    overrides: Arc<FieldOverrides>,
    lock: Arc<Mutex<()>>,
    wait_timeout: Duration,
}

impl SchemaPublisher {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        flags: Arc<dyn FlagSource>,
        overrides: FieldOverrides,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            control_plane,
            flags,
            overrides: Arc::new(overrides),
            lock: Arc::new(Mutex::new(())),
            wait_timeout,
        }
    }

    /// Asks the driver's plugin for its flags and builds `<driver>Config`.
    async fn generate_locked(&self, driver: &str) -> Result<NewSchema> {
        let flags = self.flags.create_flags(driver).await?;
        trace!(driver = %driver, count = flags.len(), "Plugin declared create flags");
        let definition = translate_flags(driver, &flags, &self.overrides)?;

        Ok(NewSchema {
            name: config_schema_name(driver),
            parent_name: String::new(),
            roles: RoleProfile::all_roles(),
            definition,
        })
    }

    pub async fn publish_driver_config_schema(&self, driver: &str) -> Result<SchemaDocument> {
        let _guard = self.lock.lock().await;
        let schema = self.generate_locked(driver).await?;
        self.replace_locked(schema, Replace::ByName).await
    }

    pub async fn publish_aggregate_machine_schema<S: AsRef<str>>(
        &self,
        drivers: &[S],
        role: RoleProfile,
    ) -> Result<SchemaDocument> {
        let schema = machine_schema(drivers, role);
        self.publish(schema).await
    }

    /// Replaces whatever document currently occupies the schema's slot.
    /// Documents with the same name but other roles are left alone.
    pub async fn publish(&self, schema: NewSchema) -> Result<SchemaDocument> {
        let _guard = self.lock.lock().await;
        self.replace_locked(schema, Replace::BySlot).await
    }

    /// Deletes every non-removed document named `name`. Returns how many were
    /// deleted.
    pub async fn remove_schema(&self, name: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let existing = self.control_plane.find_schemas(name).await?;
        for doc in &existing {
            self.delete_settled(doc).await?;
        }
        if !existing.is_empty() {
            info!(schema = %name, count = existing.len(), "Schema removed");
        }
        Ok(existing.len())
    }

    async fn replace_locked(&self, schema: NewSchema, replace: Replace) -> Result<SchemaDocument> {
        let existing = self.control_plane.find_schemas(&schema.name).await?;
        let superseded = existing
            .iter()
            .filter(|doc| replace == Replace::ByName || schema.same_slot(doc));
        for doc in superseded {
            debug!(schema = %schema.name, id = %doc.id, "Replacing existing schema");
            self.delete_settled(doc).await?;
        }

        let created = self.control_plane.create_schema(&schema).await?;
        let settled = self
            .wait_settled(&created.id, &schema.name)
            .await?
            .ok_or_else(|| DriverError::ControlPlane {
                request: format!("GET dynamicschemas/{}", created.id),
                status: 404,
            })?;

        info!(schema = %settled.name, id = %settled.id, "Schema published");
        Ok(settled)
    }

    async fn delete_settled(&self, doc: &SchemaDocument) -> Result<()> {
        if self.wait_settled(&doc.id, &doc.name).await?.is_none() {
            return Ok(());
        }
        self.control_plane.delete_schema(&doc.id).await?;
        self.wait_gone(&doc.id, &doc.name).await
    }

    /// Waits for the document to stop transitioning. `None` if it vanished.
    async fn wait_settled(&self, id: &str, name: &str) -> Result<Option<SchemaDocument>> {
        let control_plane = &self.control_plane;
        poll_until(self.wait_timeout, Backoff::schema_wait(), || async move {
            Ok(match control_plane.get_schema(id).await? {
                Some(doc) if doc.removed => Some(None),
                Some(doc) if doc.transitioning => None,
                Some(doc) => Some(Some(doc)),
                None => Some(None),
            })
        })
        .await?
        .ok_or_else(|| DriverError::SchemaTimeout { name: name.to_string() })
    }

    async fn wait_gone(&self, id: &str, name: &str) -> Result<()> {
        let control_plane = &self.control_plane;
        poll_until(self.wait_timeout, Backoff::schema_wait(), || async move {
            Ok(match control_plane.get_schema(id).await? {
                Some(doc) if !doc.removed => None,
                _ => Some(()),
            })
        })
        .await?
        .ok_or_else(|| DriverError::SchemaTimeout { name: name.to_string() })
    }
}
