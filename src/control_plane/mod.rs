//! Control-plane collaborator.
//!
//! The engine only talks to the control plane through [`ControlPlane`], so
//! the REST client, test fakes and alternative transports are interchangeable.

pub mod rest;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DriverAction, DriverRecord, NewSchema, SchemaDocument};

pub use rest::RestControlPlane;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// All driver records that have not been purged.
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>>;

    async fn get_driver(&self, id: &str) -> Result<Option<DriverRecord>>;

    async fn driver_action(&self, id: &str, action: DriverAction) -> Result<DriverRecord>;

    /// Non-removed schema documents with the given name.
    async fn find_schemas(&self, name: &str) -> Result<Vec<SchemaDocument>>;

    async fn get_schema(&self, id: &str) -> Result<Option<SchemaDocument>>;

    async fn create_schema(&self, schema: &NewSchema) -> Result<SchemaDocument>;

    async fn delete_schema(&self, id: &str) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
}
