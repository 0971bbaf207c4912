//! # Hookgate Library
//!
//! Webhook ingestion for code hosts: authenticated delivery endpoints,
//! per-host decoding and normalization, idempotent changeset event storage,
//! diagnostic delivery logs and the administration API.

pub mod auth;
pub mod changeset_events;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod purger;
pub mod repositories;
pub mod resync;
pub mod server;
pub mod telemetry;
pub mod upsert;
pub mod webhook_logging;
pub mod webhook_verification;
pub mod webhooks;
pub use migration;
