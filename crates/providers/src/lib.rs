//! Generation provider clients.
//!
//! Every provider implements [`AiProvider`]. Providers that can report the
//! state of an accepted task on demand additionally expose a [`TaskQuery`]
//! through [`AiProvider::capability`]; the rest only ever report back through
//! the notify callback.

pub mod gemini;
pub mod kie;
pub mod provider;
pub mod registry;
pub mod replicate;

pub use provider::{
    AiProvider, GenerateParams, ProviderCapability, ProviderError, ProviderTask, TaskQuery,
};
pub use registry::{ProviderConfig, ProviderRegistry, PROVIDER_HTTP_TIMEOUT};
