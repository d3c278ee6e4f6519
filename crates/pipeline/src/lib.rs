//! Generation task lifecycle: charge, dispatch, poll, settle.

pub mod config;
pub mod coordinator;
pub mod error;

pub use config::{CoordinatorConfig, DispatchMode};
pub use coordinator::{Caller, GenerateRequest, TaskCoordinator};
pub use error::PipelineError;
