//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - Input DTOs for inserts and partial updates
//! - Query-parameter structs for listing

pub mod ai_task;
pub mod credit;
