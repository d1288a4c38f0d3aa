use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use geoproxy_catalog::{CitySummary, CountrySummary, LocationsSummary, ServerEntry};
use geoproxy_control::{InstanceState, InstanceStatus};

/// A selectable VPN exit server
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerInfo {
    /// Stable identifier usable in start requests
    pub key: String,
    pub hostname: String,
    pub country: String,
    pub city: String,
    /// Tunnel endpoint addresses
    pub ip_addresses: Vec<String>,
    /// Tunnel public key
    pub public_key: String,
    pub protocol: String,
}

impl From<&ServerEntry> for ServerInfo {
    fn from(entry: &ServerEntry) -> Self {
        Self {
            key: entry.key.clone(),
            hostname: entry.hostname.clone(),
            country: entry.country.clone(),
            city: entry.city.clone(),
            ip_addresses: entry.ip_addresses.clone(),
            public_key: entry.public_key.clone(),
            protocol: entry.protocol.clone(),
        }
    }
}

/// Per-city slice of the location listing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CityInfo {
    pub name: String,
    pub server_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_hostname: Option<String>,
}

/// Per-country slice of the location listing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountryInfo {
    pub name: String,
    pub city_count: usize,
    pub total_servers: usize,
    pub cities: Vec<CityInfo>,
}

/// Hierarchical view of all available locations
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationList {
    pub countries: Vec<CountryInfo>,
    pub total_countries: usize,
    pub total_cities: usize,
    pub total_servers: usize,
}

impl From<LocationsSummary> for LocationList {
    fn from(summary: LocationsSummary) -> Self {
        let countries = summary
            .countries
            .into_iter()
            .map(|c: CountrySummary| CountryInfo {
                name: c.name,
                city_count: c.city_count,
                total_servers: c.total_servers,
                cities: c
                    .cities
                    .into_iter()
                    .map(|city: CitySummary| CityInfo {
                        name: city.name,
                        server_count: city.server_count,
                        sample_hostname: city.sample_hostname,
                    })
                    .collect(),
            })
            .collect();
        Self {
            countries,
            total_countries: summary.total_countries,
            total_cities: summary.total_cities,
            total_servers: summary.total_servers,
        }
    }
}

/// Request to provision a proxy instance.
///
/// Either `server` (an exact key) or a `country`/`city` filter must be
/// present; `server` wins if both are given.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartRequest {
    /// Exact server key
    #[serde(default)]
    pub server: Option<String>,
    /// Country filter, case-insensitive substring
    #[serde(default)]
    pub country: Option<String>,
    /// City filter, case-insensitive substring
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartResponse {
    /// Instance id for later stop/destroy calls
    pub id: String,
    /// Ready-to-use proxy URL with embedded credentials
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DestroyRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub message: String,
    /// Catalog size after the refresh
    pub server_count: usize,
}

/// A provisioned proxy instance as reported by /status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceInfo {
    /// Key of the exit server this instance tunnels through
    pub server: String,
    pub username: String,
    pub password: String,
    /// `host:port` of the proxy endpoint
    pub address: String,
    /// Full proxy URL with credentials
    pub proxy: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl From<&InstanceStatus> for InstanceInfo {
    fn from(status: &InstanceStatus) -> Self {
        Self {
            server: status.server.clone(),
            username: status.username.clone(),
            password: status.password.clone(),
            address: status.address.clone(),
            proxy: status.proxy.clone(),
            state: state_name(status.state).to_string(),
            created_at: status.created_at,
        }
    }
}

pub(crate) fn state_name(state: InstanceState) -> &'static str {
    match state {
        InstanceState::Creating => "creating",
        InstanceState::Running => "running",
        InstanceState::Stopped => "stopped",
        InstanceState::Destroying => "destroying",
        InstanceState::Destroyed => "destroyed",
        InstanceState::Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub servers_loaded: usize,
    pub active_instances: usize,
    pub instance_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
