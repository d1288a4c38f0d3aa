//! Proxy instance orchestration
//!
//! The coordinating core of geoproxy: validates start/stop/destroy
//! requests, enforces the instance limit, selects an exit server from
//! the catalog, drives the backend executor, and keeps the instance
//! registry as the single source of truth for what is running.

mod credentials;
mod orchestrator;
mod registry;

pub use credentials::CredentialIssuer;
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, StartSelector, StartedInstance,
};
pub use registry::{InstanceRecord, InstanceRegistry, InstanceState, InstanceStatus};

use geoproxy_backend::BackendError;
use thiserror::Error;

/// Orchestration error taxonomy.
///
/// Selector and not-found variants are client errors; the limit variant
/// asks the client to retry later; backend variants are surfaced without
/// ever leaving a partial registry record behind.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown server '{0}'")]
    UnknownServer(String),

    #[error("No server found for {0}")]
    NoMatchingServer(String),

    #[error("Must provide either 'server' or 'country'/'city' parameters")]
    SelectorRequired,

    #[error("Instance limit reached ({limit} instances)")]
    InstanceLimitReached { limit: usize },

    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
