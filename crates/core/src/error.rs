use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The caller's usable balance cannot cover the requested amount.
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// The caller is authenticated but not entitled to a gated feature
    /// (e.g. a resolution tier that needs a paid plan).
    #[error("No permission: {0}")]
    PermissionDenied(String),

    /// A one-time grant scene was already claimed by this user.
    #[error("Grant already claimed for scene '{scene}'")]
    DuplicateGrant { scene: String },

    /// The generation provider failed or returned no usable task id.
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
