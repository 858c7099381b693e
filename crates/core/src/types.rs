/// All user primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Conversions are keyed by UUID so ids handed to the external processor
/// are not guessable.
pub type ConversionId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
