//! Sheetflow domain logic.
//!
//! Everything here is storage- and transport-agnostic:
//!
//! - [`ledger::Ledger`]: per-user credit balances with optimistic
//!   concurrency and an append-only audit trail.
//! - [`lifecycle::ConversionService`]: the conversion state machine
//!   (submit, processor outcome, retry, delete).
//! - [`webhook::WebhookIngress`]: authenticated, idempotent processor
//!   callbacks.
//! - [`progress`]: deterministic progress estimation for status polling.
//! - [`store`]: the traits the database, object storage, and processor
//!   adapters implement; [`memory`] holds in-process implementations.

pub mod conversion;
pub mod credits;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod progress;
pub mod status;
pub mod store;
pub mod types;
pub mod webhook;
