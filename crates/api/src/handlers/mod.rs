pub mod admin;
pub mod conversions;
pub mod credits;
pub mod status;
pub mod webhooks;
