//! Server entry model and payload parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::CatalogError;

/// One VPN exit point, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Stable composite identifier: `{country}-{city}-{hostname}`,
    /// lower-cased with spaces replaced by dashes
    pub key: String,
    pub hostname: String,
    pub country: String,
    pub city: String,
    /// Ordered endpoint addresses for the tunnel
    pub ip_addresses: Vec<String>,
    /// Tunnel public key (WireGuard)
    pub public_key: String,
    /// Tunnel protocol tag, e.g. "wireguard"
    pub protocol: String,
}

impl ServerEntry {
    /// Case-insensitive substring match against optional filters.
    /// A missing filter always matches.
    pub fn matches(&self, country: Option<&str>, city: Option<&str>) -> bool {
        let country_ok = match country {
            Some(filter) if !filter.trim().is_empty() => self
                .country
                .to_lowercase()
                .contains(&filter.trim().to_lowercase()),
            _ => true,
        };
        let city_ok = match city {
            Some(filter) if !filter.trim().is_empty() => {
                self.city.to_lowercase().contains(&filter.trim().to_lowercase())
            }
            _ => true,
        };
        country_ok && city_ok
    }
}

fn normalize_key(country: &str, city: &str, hostname: &str) -> String {
    format!("{}-{}-{}", country, city, hostname)
        .replace(' ', "-")
        .to_lowercase()
}

/// Parse a raw gluetun `servers.json` payload into catalog entries.
///
/// The payload shape is `{"version": ..., "mullvad": {"servers": [...]}}`;
/// only WireGuard servers (tagged `"vpn": "wireguard"` or carrying a
/// `wgpubkey` field) with a hostname are kept. Entry order follows the
/// payload's own server order.
pub fn parse_server_payload(
    payload: &str,
    source_name: &'static str,
) -> Result<Vec<ServerEntry>, CatalogError> {
    let root: Value = serde_json::from_str(payload).map_err(|e| CatalogError::Parse {
        source_name,
        message: e.to_string(),
    })?;

    let servers = root
        .get("mullvad")
        .and_then(|provider| provider.get("servers"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            warn!(source = source_name, "No mullvad.servers array in payload");
            CatalogError::Parse {
                source_name,
                message: "missing mullvad.servers array".to_string(),
            }
        })?;

    let mut entries = Vec::new();
    for server in servers {
        let vpn_type = server
            .get("vpn")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let public_key = server
            .get("wgpubkey")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // WireGuard servers only; entries without a hostname are unusable
        if vpn_type != "wireguard" && (!vpn_type.is_empty() || public_key.is_empty()) {
            continue;
        }
        let hostname = match server.get("hostname").and_then(Value::as_str) {
            Some(h) if !h.is_empty() => h,
            _ => continue,
        };

        let country = server
            .get("country")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let city = server.get("city").and_then(Value::as_str).unwrap_or("unknown");
        let ip_addresses = server
            .get("ips")
            .and_then(Value::as_array)
            .map(|ips| {
                ips.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        entries.push(ServerEntry {
            key: normalize_key(country, city, hostname),
            hostname: hostname.to_string(),
            country: country.to_string(),
            city: city.to_string(),
            ip_addresses,
            public_key: public_key.to_string(),
            protocol: "wireguard".to_string(),
        });
    }

    debug!(
        source = source_name,
        total = servers.len(),
        usable = entries.len(),
        "Parsed server payload"
    );

    if entries.is_empty() {
        return Err(CatalogError::Empty { source_name });
    }
    Ok(entries)
}
