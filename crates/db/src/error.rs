use banana_core::error::CoreError;
use banana_core::types::DbId;

/// Errors from ledger operations that combine domain checks with SQL.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A domain rule rejected the operation (insufficient credits, duplicate
    /// one-time grant, unknown record, bad amount).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A consume record's `consumed_detail` could not be decoded.
    #[error("Corrupt consumed detail on credit {credit_id}: {source}")]
    CorruptDetail {
        credit_id: DbId,
        source: serde_json::Error,
    },
}
