//! Kubernetes backend for tunnel proxy units
//!
//! Drives the Kubernetes REST API from inside the cluster using the
//! mounted service-account credentials. Each unit is a single pod
//! running the VPN gateway image; callers reach the proxy on the pod
//! IP, so no Service objects are created. Pods cannot be stopped and
//! resumed, only destroyed, and the executor says so.

mod client;
mod executor;
mod manifest;

pub use client::InClusterConfig;
pub use executor::{K8sExecutor, K8sExecutorConfig};
