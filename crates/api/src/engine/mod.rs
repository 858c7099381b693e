//! Adapters to the outside world used by the conversion service.
//!
//! - [`dispatcher`]: hands conversions to the external processor (HTTP),
//!   or to a local stub that calls back with a signed webhook.
//! - [`storage`]: filesystem-backed object storage for uploaded sources.

pub mod dispatcher;
pub mod storage;
