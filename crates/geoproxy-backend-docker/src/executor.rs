//! Container lifecycle for proxy units

use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use geoproxy_backend::{
    gluetun_env, BackendError, BackendExecutor, CreatedUnit, HealthTuning, UnitRequest,
    VpnTunnelConfig,
};

use crate::client::DockerClient;
use crate::logs::demux_log_stream;

/// Name prefix for every container this adapter manages. Listing and
/// orphan cleanup key off it.
const UNIT_PREFIX: &str = "geoproxy-";

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DockerExecutorConfig {
    /// Docker Engine API socket
    pub socket_path: PathBuf,
    /// VPN gateway image to run units from
    pub image: String,
    /// Optional Docker network to attach units to
    pub network: Option<String>,
    pub tunnel: VpnTunnelConfig,
    pub health: HealthTuning,
    /// How long to wait for a fresh unit to pass its health check
    pub ready_timeout: Duration,
}

impl DockerExecutorConfig {
    pub fn new(tunnel: VpnTunnelConfig) -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            image: "qmcgaw/gluetun:latest".to_string(),
            network: None,
            tunnel,
            health: HealthTuning::default(),
            ready_timeout: Duration::from_secs(90),
        }
    }
}

pub struct DockerExecutor {
    client: DockerClient,
    config: DockerExecutorConfig,
}

impl DockerExecutor {
    pub fn new(config: DockerExecutorConfig) -> Self {
        Self {
            client: DockerClient::new(config.socket_path.clone()),
            config,
        }
    }

    /// Container create payload for a proxy unit. The gateway needs
    /// `NET_ADMIN` and the TUN device; the proxy port is published on a
    /// host port picked by the engine.
    fn create_body(&self, request: &UnitRequest) -> Value {
        let env: Vec<String> = gluetun_env(&self.config.tunnel, &self.config.health, request)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let port_key = format!("{}/tcp", request.listen_port);

        let mut host_config = json!({
            "CapAdd": ["NET_ADMIN"],
            "Devices": [{
                "PathOnHost": "/dev/net/tun",
                "PathInContainer": "/dev/net/tun",
                "CgroupPermissions": "rwm"
            }],
            "PortBindings": { port_key.clone(): [{"HostPort": ""}] }
        });
        if let Some(network) = &self.config.network {
            host_config["NetworkMode"] = json!(network);
        }

        json!({
            "Image": self.config.image,
            "Env": env,
            "ExposedPorts": { port_key: {} },
            "Labels": {
                "managed-by": "geoproxy",
                "server-key": request.server.key
            },
            "HostConfig": host_config
        })
    }

    /// Short-lived container that prints the bundled server list to
    /// stdout and exits.
    fn probe_body(&self) -> Value {
        json!({
            "Image": self.config.image,
            "Entrypoint": ["/bin/sh", "-c", "cat /gluetun/servers.json"],
            "Labels": { "managed-by": "geoproxy" }
        })
    }

    /// Pull the engine-allocated host port out of a container inspect
    /// document.
    fn host_port_from_inspect(inspect: &Value, listen_port: u16) -> Result<u16, BackendError> {
        // "/" inside the port key must be escaped for the JSON pointer
        let port_key = format!("{listen_port}~1tcp");
        inspect
            .pointer(&format!("/NetworkSettings/Ports/{port_key}/0/HostPort"))
            .and_then(Value::as_str)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| {
                BackendError::InvalidResponse(format!("no host port bound for {listen_port}/tcp"))
            })
    }

    /// Container names from a list document, filtered to our prefix
    fn unit_names(listing: &Value) -> Vec<String> {
        listing
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|c| c.pointer("/Names/0").and_then(Value::as_str))
            .map(|name| name.trim_start_matches('/').to_string())
            .filter(|name| name.starts_with(UNIT_PREFIX))
            .collect()
    }

    async fn force_remove(&self, name: &str) {
        let path = format!("/containers/{name}?force=true&v=true");
        if let Err(e) = self.client.request(Method::DELETE, &path, None).await {
            warn!(unit = name, "failed to remove container: {e}");
        }
    }

    /// Poll inspect until the unit reports healthy. Falls back to the
    /// plain running flag for images without a health check.
    async fn wait_ready(&self, name: &str) -> Result<(), BackendError> {
        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            let response = self
                .client
                .request(Method::GET, &format!("/containers/{name}/json"), None)
                .await?;
            if response.status != StatusCode::OK {
                return Err(BackendError::Api {
                    status: response.status.as_u16(),
                    message: response.error_message(),
                });
            }
            let inspect: Value = response.json()?;

            let status = inspect
                .pointer("/State/Status")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            if status == "exited" || status == "dead" {
                return Err(BackendError::Create(format!(
                    "unit exited during startup (status {status})"
                )));
            }

            match inspect.pointer("/State/Health/Status").and_then(Value::as_str) {
                Some("healthy") => return Ok(()),
                Some(health) => debug!(unit = name, health, "waiting for unit health"),
                None if status == "running" => return Ok(()),
                None => debug!(unit = name, status, "waiting for unit to run"),
            }

            if Instant::now() >= deadline {
                return Err(BackendError::ReadyTimeout(self.config.ready_timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait::async_trait]
impl BackendExecutor for DockerExecutor {
    async fn create_unit(&self, request: UnitRequest) -> Result<CreatedUnit, BackendError> {
        let name = format!("{UNIT_PREFIX}{}", Uuid::new_v4());
        info!(unit = %name, server = %request.server.key, "creating proxy unit");

        let body = self.create_body(&request);
        let response = self
            .client
            .request(
                Method::POST,
                &format!("/containers/create?name={name}"),
                Some(body),
            )
            .await?;
        if response.status != StatusCode::CREATED {
            return Err(BackendError::Create(response.error_message()));
        }

        // The container exists from here on; unwind it on any failure
        let bring_up = async {
            let response = self
                .client
                .request(Method::POST, &format!("/containers/{name}/start"), None)
                .await?;
            if !response.status.is_success() {
                return Err(BackendError::Create(response.error_message()));
            }

            let response = self
                .client
                .request(Method::GET, &format!("/containers/{name}/json"), None)
                .await?;
            let inspect: Value = response.json()?;
            let host_port = Self::host_port_from_inspect(&inspect, request.listen_port)?;

            self.wait_ready(&name).await?;
            Ok(host_port)
        };
        let host_port = match bring_up.await {
            Ok(port) => port,
            Err(e) => {
                warn!(unit = %name, "unit never came up: {e}");
                self.force_remove(&name).await;
                return Err(e);
            }
        };

        let address = format!("127.0.0.1:{host_port}");
        info!(unit = %name, %address, "proxy unit ready");
        Ok(CreatedUnit {
            handle: name,
            address,
        })
    }

    async fn stop_unit(&self, handle: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .request(Method::POST, &format!("/containers/{handle}/stop?t=10"), None)
            .await?;
        match response.status {
            // 304 means already stopped, 404 means already gone
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED | StatusCode::NOT_FOUND => {
                info!(unit = handle, "proxy unit stopped");
                Ok(())
            }
            status => Err(BackendError::Api {
                status: status.as_u16(),
                message: response.error_message(),
            }),
        }
    }

    async fn destroy_unit(&self, handle: &str) -> Result<(), BackendError> {
        let path = format!("/containers/{handle}?force=true&v=true");
        let response = self.client.request(Method::DELETE, &path, None).await?;
        match response.status {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                info!(unit = handle, "proxy unit destroyed");
                Ok(())
            }
            status => Err(BackendError::Api {
                status: status.as_u16(),
                message: response.error_message(),
            }),
        }
    }

    async fn list_units(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .request(Method::GET, "/containers/json?all=true", None)
            .await?;
        if response.status != StatusCode::OK {
            return Err(BackendError::Api {
                status: response.status.as_u16(),
                message: response.error_message(),
            });
        }
        let listing: Value = response.json()?;
        Ok(Self::unit_names(&listing))
    }

    async fn fetch_server_payload(&self, timeout: Duration) -> Result<String, BackendError> {
        let name = format!("{UNIT_PREFIX}probe-{}", Uuid::new_v4());
        info!(unit = %name, "fetching server list via probe container");

        let response = self
            .client
            .request(
                Method::POST,
                &format!("/containers/create?name={name}"),
                Some(self.probe_body()),
            )
            .await?;
        if response.status != StatusCode::CREATED {
            return Err(BackendError::Create(response.error_message()));
        }

        let result = async {
            let response = self
                .client
                .request(Method::POST, &format!("/containers/{name}/start"), None)
                .await?;
            if !response.status.is_success() {
                return Err(BackendError::Create(response.error_message()));
            }

            self.client
                .request(Method::POST, &format!("/containers/{name}/wait"), None)
                .await?;

            let response = self
                .client
                .request(
                    Method::GET,
                    &format!("/containers/{name}/logs?stdout=true&stderr=false"),
                    None,
                )
                .await?;
            if !response.status.is_success() {
                return Err(BackendError::Api {
                    status: response.status.as_u16(),
                    message: response.error_message(),
                });
            }
            Ok(demux_log_stream(&response.body))
        };

        let payload = match tokio::time::timeout(timeout, result).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                self.force_remove(&name).await;
                return Err(e);
            }
            Err(_) => {
                self.force_remove(&name).await;
                return Err(BackendError::ReadyTimeout(timeout));
            }
        };
        self.force_remove(&name).await;

        if payload.trim().is_empty() {
            return Err(BackendError::InvalidResponse(
                "probe container produced no output".to_string(),
            ));
        }
        Ok(payload)
    }
}
