//! VPN exit server catalog
//!
//! Loads, caches and filters the list of available VPN exit servers.
//! Sources are tried in priority order: an inline JSON payload, a file
//! path, the bundled default payload, and finally a live fetch that runs
//! a throwaway backend unit purely to extract its discovered server list.
//! Whichever source succeeds first wins; sources are never merged.
//!
//! The catalog is either empty (not yet loaded) or fully populated.
//! Refreshes swap the whole snapshot behind an `RwLock<Arc<_>>`, so
//! concurrent readers always observe either the old or the new catalog,
//! never a partial one.

mod catalog;
mod entry;

pub use catalog::{
    CatalogConfig, CitySummary, CountrySummary, LocationsSummary, ServerCatalog,
};
pub use entry::{parse_server_payload, ServerEntry};

use std::time::Duration;
use thiserror::Error;

/// Errors from catalog load sources
///
/// These never propagate out of `query`/`locations_summary`: a catalog
/// whose sources all failed degrades to empty results.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to parse server payload from {source_name}: {message}")]
    Parse {
        source_name: &'static str,
        message: String,
    },

    #[error("Server payload from {source_name} contained no usable servers")]
    Empty { source_name: &'static str },

    #[error("Live server list fetch failed: {0}")]
    Fetch(String),

    #[error("Live server list fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("All server list sources failed")]
    SourcesExhausted,
}

/// Seam to the backend executor for the live-fetch fallback
///
/// The implementation is expected to spin up a single throwaway unit,
/// extract the server list payload it discovers, and tear the unit down
/// again. The whole operation must complete within `timeout`.
#[async_trait::async_trait]
pub trait ServerListFetcher: Send + Sync {
    async fn fetch_server_payload(&self, timeout: Duration) -> Result<String, CatalogError>;
}
