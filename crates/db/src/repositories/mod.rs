//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod analytics_repo;
pub mod conversion_repo;
pub mod credit_repo;

pub use analytics_repo::AnalyticsRepo;
pub use conversion_repo::ConversionRepo;
pub use credit_repo::CreditRepo;
