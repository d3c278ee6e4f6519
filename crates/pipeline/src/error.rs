use banana_core::error::CoreError;
use banana_db::error::LedgerError;

/// Errors surfaced by [`crate::TaskCoordinator`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A domain rule rejected the request, or the provider failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Core(core) => PipelineError::Core(core),
            LedgerError::Database(db) => PipelineError::Database(db),
            corrupt @ LedgerError::CorruptDetail { .. } => {
                PipelineError::Core(CoreError::Internal(corrupt.to_string()))
            }
        }
    }
}
