//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Operations that must compose into
//! a caller's transaction also come in an `*_in_tx` form taking
//! `&mut PgConnection`.

pub mod ai_task_repo;
pub mod credit_repo;

pub use ai_task_repo::AiTaskRepo;
pub use credit_repo::CreditRepo;

/// Default page size for listings.
const DEFAULT_LIMIT: i64 = 30;

/// Maximum page size for listings.
const MAX_LIMIT: i64 = 100;

/// Resolve 1-based `page`/`limit` parameters into `(limit, offset)`.
pub(crate) fn page_bounds(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let page = page.unwrap_or(1).max(1);
    (limit, (page - 1) * limit)
}
