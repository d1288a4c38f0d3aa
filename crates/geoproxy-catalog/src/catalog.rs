//! Catalog cache with atomic whole-snapshot replacement

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entry::{parse_server_payload, ServerEntry};
use crate::{CatalogError, ServerListFetcher};

/// Default server list shipped with the binary, in gluetun format
const BUNDLED_SERVERS: &str = include_str!("../data/servers.json");

/// Catalog load configuration
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    /// Explicit inline server-list payload; highest priority source
    pub inline_payload: Option<String>,
    /// Path to a file containing the same payload
    pub file_path: Option<PathBuf>,
    /// Ignore the compiled-in fallback payload, so only configured or
    /// live sources count
    pub skip_bundled: bool,
    /// Bound on the live-fetch fallback (probe unit startup included)
    pub fetch_timeout: Duration,
}

impl CatalogConfig {
    pub fn new() -> Self {
        Self {
            inline_payload: None,
            file_path: None,
            skip_bundled: false,
            fetch_timeout: Duration::from_secs(90),
        }
    }
}

/// One fully-loaded generation of the catalog.
///
/// Entries keep their payload insertion order; lookups by key scan the
/// index built at load time. Snapshots are immutable and shared.
#[derive(Debug, Default)]
struct CatalogSnapshot {
    entries: Vec<ServerEntry>,
}

/// Per-city slice of the locations summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitySummary {
    pub name: String,
    pub server_count: usize,
    pub sample_hostname: Option<String>,
}

/// Per-country slice of the locations summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountrySummary {
    pub name: String,
    pub city_count: usize,
    pub total_servers: usize,
    pub cities: Vec<CitySummary>,
}

/// Hierarchical read-only projection of the catalog for UI enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationsSummary {
    pub countries: Vec<CountrySummary>,
    pub total_countries: usize,
    pub total_cities: usize,
    pub total_servers: usize,
}

/// Cached set of VPN exit servers
///
/// Populated lazily on first read or explicitly through [`refresh`].
/// Readers clone an `Arc` to the current snapshot, so a refresh in
/// flight never exposes a half-built catalog.
///
/// [`refresh`]: ServerCatalog::refresh
pub struct ServerCatalog {
    config: CatalogConfig,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    // Serializes load attempts so concurrent cold reads trigger one fetch
    load_guard: tokio::sync::Mutex<()>,
}

impl ServerCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            load_guard: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Whether a load has ever succeeded
    pub fn is_loaded(&self) -> bool {
        !self.current().entries.is_empty()
    }

    /// Number of servers in the current snapshot
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact lookup by server key
    pub fn get(&self, key: &str) -> Option<ServerEntry> {
        self.current().entries.iter().find(|e| e.key == key).cloned()
    }

    /// Filtered view of the catalog, in insertion order.
    ///
    /// Both filters are case-insensitive substring matches; no filters
    /// returns the full catalog. An unloaded catalog yields no entries
    /// rather than an error.
    pub fn query(&self, country: Option<&str>, city: Option<&str>) -> Vec<ServerEntry> {
        self.current()
            .entries
            .iter()
            .filter(|e| e.matches(country, city))
            .cloned()
            .collect()
    }

    /// Countries and cities with server counts, for location pickers
    pub fn locations_summary(&self) -> LocationsSummary {
        let snapshot = self.current();

        // BTreeMap gives the sorted country/city ordering the API exposes
        let mut by_country: BTreeMap<&str, BTreeMap<&str, Vec<&str>>> = BTreeMap::new();
        for entry in &snapshot.entries {
            by_country
                .entry(entry.country.as_str())
                .or_default()
                .entry(entry.city.as_str())
                .or_default()
                .push(entry.hostname.as_str());
        }

        let countries: Vec<CountrySummary> = by_country
            .into_iter()
            .map(|(country, cities)| {
                let cities: Vec<CitySummary> = cities
                    .into_iter()
                    .map(|(city, hostnames)| CitySummary {
                        name: city.to_string(),
                        server_count: hostnames.len(),
                        sample_hostname: hostnames.first().map(|h| h.to_string()),
                    })
                    .collect();
                CountrySummary {
                    name: country.to_string(),
                    city_count: cities.len(),
                    total_servers: cities.iter().map(|c| c.server_count).sum(),
                    cities,
                }
            })
            .collect();

        LocationsSummary {
            total_countries: countries.len(),
            total_cities: countries.iter().map(|c| c.city_count).sum(),
            total_servers: countries.iter().map(|c| c.total_servers).sum(),
            countries,
        }
    }

    /// Load the catalog if it has never been populated
    pub async fn ensure_loaded(&self, fetcher: Option<&dyn ServerListFetcher>) {
        if !self.is_loaded() {
            // An unloaded catalog degrades to empty results, not an error
            let _ = self.refresh(false, fetcher).await;
        }
    }

    /// Re-run the load chain and swap in the result.
    ///
    /// With `force == false` a populated catalog is left untouched.
    /// When every source fails the existing snapshot (possibly stale)
    /// is kept and the failure is reported, so an explicit refresh can
    /// tell "reloaded" from "still serving the old list".
    pub async fn refresh(
        &self,
        force: bool,
        fetcher: Option<&dyn ServerListFetcher>,
    ) -> Result<usize, CatalogError> {
        let _guard = self.load_guard.lock().await;

        if !force && self.is_loaded() {
            return Ok(self.len());
        }

        match self.load(fetcher).await {
            Some(entries) => {
                let count = entries.len();
                info!(server_count = count, "Server catalog refreshed");
                *self.snapshot.write().unwrap() = Arc::new(CatalogSnapshot { entries });
                Ok(count)
            }
            None => {
                warn!("All catalog sources failed; keeping existing catalog");
                Err(CatalogError::SourcesExhausted)
            }
        }
    }

    /// Try each source in priority order; first success wins
    async fn load(&self, fetcher: Option<&dyn ServerListFetcher>) -> Option<Vec<ServerEntry>> {
        if let Some(payload) = &self.config.inline_payload {
            match parse_server_payload(payload, "inline payload") {
                Ok(entries) => {
                    info!(server_count = entries.len(), "Loaded servers from inline payload");
                    return Some(entries);
                }
                Err(e) => warn!(error = %e, "Inline server payload unusable"),
            }
        }

        if let Some(path) = &self.config.file_path {
            match tokio::fs::read_to_string(path).await {
                Ok(payload) => match parse_server_payload(&payload, "servers file") {
                    Ok(entries) => {
                        info!(
                            server_count = entries.len(),
                            path = %path.display(),
                            "Loaded servers from file"
                        );
                        return Some(entries);
                    }
                    Err(e) => warn!(error = %e, path = %path.display(), "Servers file unusable"),
                },
                Err(e) => warn!(error = %e, path = %path.display(), "Failed to read servers file"),
            }
        }

        if !self.config.skip_bundled {
            match parse_server_payload(BUNDLED_SERVERS, "bundled payload") {
                Ok(entries) => {
                    info!(server_count = entries.len(), "Loaded servers from bundled payload");
                    return Some(entries);
                }
                Err(e) => warn!(error = %e, "Bundled server payload unusable"),
            }
        }

        if let Some(fetcher) = fetcher {
            let timeout = self.config.fetch_timeout;
            info!(?timeout, "Fetching server list via throwaway backend unit");
            let fetched = tokio::time::timeout(timeout, fetcher.fetch_server_payload(timeout))
                .await
                .map_err(|_| CatalogError::FetchTimeout(timeout))
                .and_then(|r| r);
            match fetched {
                Ok(payload) => match parse_server_payload(&payload, "live fetch") {
                    Ok(entries) => {
                        info!(server_count = entries.len(), "Loaded servers from live fetch");
                        return Some(entries);
                    }
                    Err(e) => warn!(error = %e, "Live-fetched server payload unusable"),
                },
                Err(e) => warn!(error = %e, "Live server list fetch failed"),
            }
        }

        None
    }
}
