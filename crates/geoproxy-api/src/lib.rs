//! HTTP surface for the proxy orchestrator
//!
//! A thin axum layer over the orchestrator: JSON in, JSON out, with
//! OpenAPI documentation and Swagger UI. All domain decisions live in
//! the control crate; handlers only translate errors to status codes.

pub mod handlers;
pub mod models;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use geoproxy_control::Orchestrator;

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Geoproxy API",
        version = "0.1.0",
        description = "REST API for provisioning VPN-tunnelled HTTP proxy instances",
        contact(
            name = "Geoproxy Team",
            email = "team@geoproxy.io"
        )
    ),
    paths(
        handlers::list_servers,
        handlers::list_locations,
        handlers::refresh_servers,
        handlers::start_instance,
        handlers::stop_instance,
        handlers::destroy_instance,
        handlers::instance_status,
        handlers::health_check,
    ),
    components(
        schemas(
            models::ServerInfo,
            models::CityInfo,
            models::CountryInfo,
            models::LocationList,
            models::StartRequest,
            models::StartResponse,
            models::StopRequest,
            models::DestroyRequest,
            models::MessageResponse,
            models::RefreshResponse,
            models::InstanceInfo,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "catalog", description = "Server catalog endpoints"),
        (name = "instances", description = "Proxy instance lifecycle endpoints"),
        (name = "system", description = "System health endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable permissive CORS for browser frontends
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".parse().expect("static address"),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { orchestrator }),
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route("/servers", get(handlers::list_servers))
            .route("/servers/refresh", post(handlers::refresh_servers))
            .route("/locations", get(handlers::list_locations))
            .route("/start", post(handlers::start_instance))
            .route("/stop", post(handlers::stop_instance))
            .route("/destroy", post(handlers::destroy_instance))
            .route("/status", get(handlers::instance_status))
            .route("/health", get(handlers::health_check))
            .with_state(self.state.clone());

        let mut router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", api_doc))
            .merge(api_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!("OpenAPI spec: http://{}/openapi.json", self.config.bind_addr);
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
