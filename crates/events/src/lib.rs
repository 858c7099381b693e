//! Conversion event fan-out.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`; implements the core `ConversionNotifier`.
//! - [`ConversionEvent`]: the event envelope.
//! - [`EventLogger`]: background subscriber writing every event to the log.

pub mod bus;
pub mod logger;

pub use bus::{ConversionEvent, EventBus};
pub use logger::EventLogger;
