/// Domain error taxonomy shared by the ledger, the conversion state machine,
/// and the webhook ingress.
///
/// The HTTP layer maps each variant to a status code; see `AppError` in the
/// API crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The webhook signature (or body secret) did not match.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The webhook body could not be parsed or failed validation.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A business-rule rejection: the user has to upgrade or wait for a refill.
    #[error("Insufficient credits: {available} available, {required} required")]
    InsufficientCredits { available: i32, required: i32 },

    /// A conditional write lost a race. Callers retry; this is never a
    /// permanent denial.
    #[error("Concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    /// The external processor was unreachable or rejected the job.
    #[error("Dispatch to conversion processor failed: {0}")]
    DispatchFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a [`CoreError::NotFound`] with any displayable id.
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the same request may succeed if simply repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::DispatchFailure(_) | Self::Internal(_)
        )
    }
}
