//! Plugin RPC: launching a driver executable and asking it which creation
//! parameters it accepts.

pub mod client;
pub mod protocol;
pub mod server;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{PluginClient, PluginConnection};
pub use protocol::CreateFlag;
pub use server::FlagServer;

/// Source of a driver's declared creation parameters.
#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn create_flags(&self, driver: &str) -> Result<Vec<CreateFlag>>;
}
