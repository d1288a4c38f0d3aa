//! Kubernetes API client using the in-cluster service account

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use geoproxy_backend::BackendError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Credentials and endpoint of the API server, as mounted into every
/// pod by the kubelet.
#[derive(Clone)]
pub struct InClusterConfig {
    pub host: String,
    pub port: u16,
    pub namespace: String,
    token: String,
    ca_pem: Vec<u8>,
}

impl InClusterConfig {
    pub async fn load() -> Result<Self, BackendError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            BackendError::Transport("KUBERNETES_SERVICE_HOST is not set; not running in a cluster".into())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(443);

        let token = tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token")).await?;
        let ca_pem = tokio::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")).await?;
        let namespace = tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/namespace"))
            .await?
            .trim()
            .to_string();

        Ok(Self {
            host,
            port,
            namespace,
            token: token.trim().to_string(),
            ca_pem,
        })
    }
}

pub(crate) struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BackendError::InvalidResponse(format!("bad API response: {e}")))
    }

    /// The API server wraps errors in a Status object with a `message`
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned())
    }
}

pub(crate) struct KubeClient {
    host: String,
    port: u16,
    token: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

impl KubeClient {
    pub fn new(config: &InClusterConfig) -> Result<Self, BackendError> {
        ensure_crypto_provider();

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut config.ca_pem.as_slice()) {
            let cert = cert
                .map_err(|e| BackendError::Transport(format!("invalid cluster CA: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| BackendError::Transport(format!("invalid cluster CA: {e}")))?;
        }

        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| BackendError::Transport(format!("invalid API server name: {e}")))?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            token: config.token.clone(),
            server_name,
            connector: TlsConnector::from(Arc::new(tls)),
        })
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, BackendError> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| BackendError::Transport(format!("failed to connect to {addr}: {e}")))?;

        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| BackendError::Transport(format!("TLS handshake failed: {e}")))?;

        let io = TokioIo::new(tls);
        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| BackendError::Transport(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("API server connection closed: {e}");
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value).map_err(|e| {
                BackendError::InvalidResponse(format!("failed to encode request: {e}"))
            })?),
            None => Bytes::new(),
        };

        debug!(%method, path, "kubernetes API request");
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, &self.host)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| BackendError::Transport(format!("failed to build request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| BackendError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| BackendError::Transport(format!("failed to read response body: {e}")))?
            .to_bytes();

        Ok(ApiResponse { status, body })
    }
}
