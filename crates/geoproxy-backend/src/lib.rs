//! Backend executor interface
//!
//! The orchestrator drives ephemeral VPN+proxy compute units through the
//! [`BackendExecutor`] trait and stays agnostic to what actually runs
//! them. Two adapters implement it: `geoproxy-backend-docker` talks to
//! the Docker Engine API, `geoproxy-backend-k8s` talks to the Kubernetes
//! API. Protocol-specific details (capability flags, device mounts, RBAC
//! scope) live entirely inside the adapters.

mod unit;

pub use unit::{
    format_gluetun_duration, gluetun_env, CreatedUnit, HealthTuning, ProxyCredentials,
    UnitRequest, VpnTunnelConfig,
};

use std::time::Duration;
use thiserror::Error;

/// Errors reported by backend adapters
#[derive(Error, Debug)]
pub enum BackendError {
    /// Unit creation failed outright; the adapter has already cleaned up
    /// whatever partial resources it managed to create.
    #[error("Failed to create backend unit: {0}")]
    Create(String),

    /// The unit came up but never passed its readiness check
    #[error("Backend unit did not become ready within {0:?}")]
    ReadyTimeout(Duration),

    /// Stop-without-remove is only meaningful on the container target
    #[error("Stop is not supported by this backend; use destroy")]
    StopUnsupported,

    /// Non-success response from the backend control plane
    #[error("Backend API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure talking to the control plane
    #[error("Backend transport error: {0}")]
    Transport(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capability interface to the backend control plane.
///
/// One executor manages one kind of ephemeral compute unit running the
/// VPN+proxy software. `destroy_unit` is idempotent: destroying a unit
/// that is already gone is success, because the desired end state has
/// been reached.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait::async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Create a unit that tunnels to the requested server and exposes an
    /// authenticated HTTP proxy on the request's listen port. Returns
    /// the opaque handle used for later stop/destroy calls and the
    /// address at which callers reach the proxy.
    async fn create_unit(&self, request: UnitRequest) -> Result<CreatedUnit, BackendError>;

    /// Stop the unit without removing it (container target only)
    async fn stop_unit(&self, handle: &str) -> Result<(), BackendError>;

    /// Stop and remove the unit; gone-already is success
    async fn destroy_unit(&self, handle: &str) -> Result<(), BackendError>;

    /// Handles of every unit this executor currently knows about,
    /// tracked or not; used to reconcile orphans after a crash
    async fn list_units(&self) -> Result<Vec<String>, BackendError>;

    /// Run a throwaway unit purely to extract its discovered server
    /// list payload, bounded by `timeout`
    async fn fetch_server_payload(&self, timeout: Duration) -> Result<String, BackendError>;
}
