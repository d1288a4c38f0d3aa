//! Docker backend for tunnel proxy units
//!
//! Talks to the Docker Engine API directly over its Unix socket, one
//! HTTP/1.1 connection per request. Each unit is a single container
//! running the VPN gateway image with `NET_ADMIN` and the TUN device,
//! publishing the embedded HTTP proxy on a Docker-allocated host port.

mod client;
mod executor;
mod logs;

pub use executor::{DockerExecutor, DockerExecutorConfig};
