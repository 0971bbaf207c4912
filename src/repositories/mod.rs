//! # Repository Layer
//!
//! Repository types that encapsulate SeaORM operations for the gateway's
//! tables. Functions that must run inside the upsert transaction are generic
//! over [`sea_orm::ConnectionTrait`].

pub mod changeset;
pub mod changeset_event;
pub mod changeset_sync_job;
pub mod code_host;
pub mod webhook_log;
pub mod webhook_registration;

pub use changeset::ChangesetRepository;
pub use changeset_event::ChangesetEventRepository;
pub use changeset_sync_job::ChangesetSyncJobRepository;
pub use code_host::CodeHostRepository;
pub use webhook_log::WebhookLogRepository;
pub use webhook_registration::WebhookRegistrationRepository;
