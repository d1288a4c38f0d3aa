//! Minimal Docker Engine API client over the Unix socket

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use tokio::net::UnixStream;
use tracing::debug;

use geoproxy_backend::BackendError;

pub(crate) struct DockerClient {
    socket_path: PathBuf,
}

pub(crate) struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BackendError::InvalidResponse(format!("bad engine response: {e}")))
    }

    /// The engine wraps errors as `{"message": "..."}`
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned())
    }
}

impl DockerClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// One request, one connection. The engine socket is local so the
    /// handshake cost is negligible and there is no pool to go stale.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, BackendError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            BackendError::Transport(format!(
                "failed to connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| BackendError::Transport(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("engine connection closed: {e}");
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value).map_err(|e| {
                BackendError::InvalidResponse(format!("failed to encode request: {e}"))
            })?),
            None => Bytes::new(),
        };

        debug!(%method, path, "docker engine request");
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "docker")
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
