//! Unit specification shared by both backend adapters

use std::fmt;
use std::time::Duration;

use geoproxy_catalog::ServerEntry;
use serde::{Deserialize, Serialize};

/// Per-instance proxy credentials, write-once
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl ProxyCredentials {
    /// Fully-formed proxy URL for a reachable `host:port` address
    pub fn proxy_url(&self, address: &str) -> String {
        format!("http://{}:{}@{}", self.username, self.password, address)
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// VPN provider credential material, injected at startup and treated as
/// secret (never logged, redacted in Debug output)
#[derive(Clone)]
pub struct VpnTunnelConfig {
    /// VPN service provider tag understood by the unit image
    pub provider: String,
    pub wireguard_private_key: String,
    pub wireguard_addresses: String,
    /// Extra inbound ports to allow through the unit's firewall
    pub firewall_input_ports: Option<String>,
}

impl fmt::Debug for VpnTunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpnTunnelConfig")
            .field("provider", &self.provider)
            .field("wireguard_private_key", &"<redacted>")
            .field("wireguard_addresses", &self.wireguard_addresses)
            .field("firewall_input_ports", &self.firewall_input_ports)
            .finish()
    }
}

/// Health check tuning for the VPN connectivity check inside a unit.
///
/// VPN handshake plus route setup is much slower than a typical liveness
/// check; an aggressive check makes units restart-loop without ever
/// converging, so the initial grace period is deliberately generous.
#[derive(Debug, Clone)]
pub struct HealthTuning {
    /// Grace period for the very first connectivity check
    pub initial_grace: Duration,
    /// Extra allowance added to subsequent checks
    pub check_addition: Duration,
    /// Wait between successful checks
    pub success_wait: Duration,
    /// Address probed to confirm tunnel connectivity
    pub target_address: String,
}

impl Default for HealthTuning {
    fn default() -> Self {
        Self {
            initial_grace: Duration::from_secs(60),
            check_addition: Duration::from_secs(10),
            success_wait: Duration::from_secs(10),
            target_address: "1.1.1.1:443".to_string(),
        }
    }
}

/// Request to create one VPN+proxy unit
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub server: ServerEntry,
    pub credentials: ProxyCredentials,
    /// Port the HTTP proxy listens on inside the unit
    pub listen_port: u16,
}

/// A successfully created unit
#[derive(Debug, Clone)]
pub struct CreatedUnit {
    /// Opaque handle the adapter uses to target the unit later
    pub handle: String,
    /// `host:port` at which callers reach the proxy
    pub address: String,
}

/// Render a duration the way gluetun env vars expect, e.g. "60s"
pub fn format_gluetun_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Environment for a gluetun unit.
///
/// This is the single definition of the unit's env contract; both
/// adapters render it into their own manifest formats.
pub fn gluetun_env(
    tunnel: &VpnTunnelConfig,
    health: &HealthTuning,
    request: &UnitRequest,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("VPN_SERVICE_PROVIDER".into(), tunnel.provider.clone()),
        ("VPN_TYPE".into(), "wireguard".into()),
        (
            "WIREGUARD_PRIVATE_KEY".into(),
            tunnel.wireguard_private_key.clone(),
        ),
        (
            "WIREGUARD_ADDRESSES".into(),
            tunnel.wireguard_addresses.clone(),
        ),
        ("SERVER_HOSTNAMES".into(), request.server.hostname.clone()),
        ("HTTPPROXY".into(), "on".into()),
        ("HTTPPROXY_USER".into(), request.credentials.username.clone()),
        (
            "HTTPPROXY_PASSWORD".into(),
            request.credentials.password.clone(),
        ),
        (
            "HTTPPROXY_LISTENING_ADDRESS".into(),
            format!(":{}", request.listen_port),
        ),
        ("HTTPPROXY_LOG".into(), "off".into()),
        ("HTTPPROXY_STEALTH".into(), "off".into()),
        (
            "HEALTH_VPN_DURATION_INITIAL".into(),
            format_gluetun_duration(health.initial_grace),
        ),
        (
            "HEALTH_VPN_DURATION_ADDITION".into(),
            format_gluetun_duration(health.check_addition),
        ),
        (
            "HEALTH_SUCCESS_WAIT_DURATION".into(),
            format_gluetun_duration(health.success_wait),
        ),
        (
            "HEALTH_TARGET_ADDRESS".into(),
            health.target_address.clone(),
        ),
        ("DNS_ADDRESS".into(), "8.8.8.8".into()),
    ];
    if let Some(ports) = &tunnel.firewall_input_ports {
        env.push(("FIREWALL_INPUT_PORTS".into(), ports.clone()));
    }
    env
}
