//! # Data Models
//!
//! SeaORM entities for every table the gateway reads or writes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod changeset;
pub mod changeset_event;
pub mod changeset_sync_job;
pub mod code_host;
pub mod repo;
pub mod webhook_log;
pub mod webhook_registration;

pub use changeset::Entity as Changeset;
pub use changeset_event::Entity as ChangesetEvent;
pub use changeset_sync_job::Entity as ChangesetSyncJob;
pub use code_host::Entity as CodeHost;
pub use repo::Entity as Repo;
pub use webhook_log::Entity as WebhookLog;
pub use webhook_registration::Entity as WebhookRegistration;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "hookgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
