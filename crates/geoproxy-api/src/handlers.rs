use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use geoproxy_backend::BackendError;
use geoproxy_control::{OrchestratorError, StartSelector};

use crate::models::*;
use crate::AppState;

/// Query parameters accepted by the catalog endpoints
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub country: Option<String>,
    pub city: Option<String>,
    pub force: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    pub force: Option<String>,
}

/// Truthy parsing for the `force` query parameter
fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes")
    )
}

fn error_response(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        OrchestratorError::UnknownServer(_)
        | OrchestratorError::NoMatchingServer(_)
        | OrchestratorError::SelectorRequired => StatusCode::BAD_REQUEST,
        OrchestratorError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InstanceLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::Backend(BackendError::ReadyTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Backend(BackendError::StopUnsupported) => StatusCode::BAD_REQUEST,
        OrchestratorError::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// List catalog servers, optionally filtered by location
#[utoipa::path(
    get,
    path = "/servers",
    params(
        ("country" = Option<String>, Query, description = "Country filter (case-insensitive substring)"),
        ("city" = Option<String>, Query, description = "City filter (case-insensitive substring)"),
        ("force" = Option<String>, Query, description = "Force a catalog refresh first (true/1/yes)")
    ),
    responses(
        (status = 200, description = "Matching servers keyed by server key", body = BTreeMap<String, ServerInfo>)
    ),
    tag = "catalog"
)]
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> Json<BTreeMap<String, ServerInfo>> {
    debug!(?query, "listing servers");
    let servers = state
        .orchestrator
        .servers(
            query.country.as_deref(),
            query.city.as_deref(),
            is_truthy(query.force.as_deref()),
        )
        .await;
    Json(
        servers
            .iter()
            .map(|entry| (entry.key.clone(), ServerInfo::from(entry)))
            .collect(),
    )
}

/// Hierarchical country/city listing of the catalog
#[utoipa::path(
    get,
    path = "/locations",
    params(
        ("force" = Option<String>, Query, description = "Force a catalog refresh first (true/1/yes)")
    ),
    responses(
        (status = 200, description = "Available locations", body = LocationList)
    ),
    tag = "catalog"
)]
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ForceQuery>,
) -> Json<LocationList> {
    let summary = state
        .orchestrator
        .locations(is_truthy(query.force.as_deref()))
        .await;
    Json(summary.into())
}

/// Force a reload of the server catalog
#[utoipa::path(
    post,
    path = "/servers/refresh",
    responses(
        (status = 200, description = "Catalog refreshed", body = RefreshResponse),
        (status = 500, description = "Every server list source failed", body = ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn refresh_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, (StatusCode, Json<ErrorResponse>)> {
    let server_count = match state.orchestrator.refresh_catalog(true).await {
        Ok(count) => count,
        Err(e) => {
            warn!("catalog refresh failed: {e}");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Server list refresh failed".to_string(),
                }),
            ));
        }
    };
    Ok(Json(RefreshResponse {
        message: "Server list refreshed".to_string(),
        server_count,
    }))
}

/// Provision a proxy instance through the selected exit server
#[utoipa::path(
    post,
    path = "/start",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Instance provisioned", body = StartResponse),
        (status = 400, description = "Invalid selector", body = ErrorResponse),
        (status = 429, description = "Instance limit reached", body = ErrorResponse),
        (status = 502, description = "Backend failure", body = ErrorResponse),
        (status = 504, description = "Instance never became ready", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn start_instance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, (StatusCode, Json<ErrorResponse>)> {
    let selector = StartSelector {
        server: request.server,
        country: request.country,
        city: request.city,
    };
    let started = state
        .orchestrator
        .start(selector)
        .await
        .map_err(error_response)?;
    Ok(Json(StartResponse {
        id: started.id,
        proxy: started.proxy,
    }))
}

/// Stop a running instance without removing it
#[utoipa::path(
    post,
    path = "/stop",
    request_body = StopRequest,
    responses(
        (status = 200, description = "Instance stopped", body = MessageResponse),
        (status = 400, description = "Backend cannot stop instances", body = ErrorResponse),
        (status = 404, description = "Unknown instance id", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn stop_instance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator
        .stop(&request.id)
        .await
        .map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: format!("Instance {} stopped", request.id),
    }))
}

/// Destroy an instance and free its capacity slot
#[utoipa::path(
    post,
    path = "/destroy",
    request_body = DestroyRequest,
    responses(
        (status = 200, description = "Instance destroyed", body = MessageResponse),
        (status = 404, description = "Unknown instance id", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn destroy_instance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DestroyRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator
        .destroy(&request.id)
        .await
        .map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: format!("Instance {} destroyed", request.id),
    }))
}

/// Snapshot of every tracked instance, keyed by id
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Tracked instances", body = HashMap<String, InstanceInfo>)
    ),
    tag = "instances"
)]
pub async fn instance_status(
    State(state): State<Arc<AppState>>,
) -> Json<HashMap<String, InstanceInfo>> {
    let snapshot = state.orchestrator.status();
    Json(
        snapshot
            .iter()
            .map(|(id, status)| (id.clone(), InstanceInfo::from(status)))
            .collect(),
    )
}

/// Service health and headline counters
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        servers_loaded: state.orchestrator.catalog_len(),
        active_instances: state.orchestrator.instance_count(),
        instance_limit: state.orchestrator.instance_limit(),
    })
}
