pub mod analytics;
pub mod conversion;
pub mod credit;
