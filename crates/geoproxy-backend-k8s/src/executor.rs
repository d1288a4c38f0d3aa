//! Pod lifecycle for proxy units

use hyper::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use geoproxy_backend::{
    BackendError, BackendExecutor, CreatedUnit, HealthTuning, UnitRequest, VpnTunnelConfig,
};

use crate::client::{InClusterConfig, KubeClient};
use crate::manifest;

const UNIT_PREFIX: &str = "geoproxy-";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct K8sExecutorConfig {
    /// Namespace units are created in
    pub namespace: String,
    /// VPN gateway image to run units from
    pub image: String,
    pub tunnel: VpnTunnelConfig,
    pub health: HealthTuning,
    /// How long to wait for a fresh pod to become ready
    pub ready_timeout: Duration,
}

impl K8sExecutorConfig {
    pub fn new(namespace: String, tunnel: VpnTunnelConfig) -> Self {
        Self {
            namespace,
            image: "qmcgaw/gluetun:latest".to_string(),
            tunnel,
            health: HealthTuning::default(),
            ready_timeout: Duration::from_secs(180),
        }
    }
}

pub struct K8sExecutor {
    client: KubeClient,
    config: K8sExecutorConfig,
}

impl K8sExecutor {
    pub fn new(cluster: &InClusterConfig, config: K8sExecutorConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: KubeClient::new(cluster)?,
            config,
        })
    }

    fn pods_path(&self) -> String {
        format!("/api/v1/namespaces/{}/pods", self.config.namespace)
    }

    fn pod_path(&self, name: &str) -> String {
        format!("{}/{name}", self.pods_path())
    }

    async fn delete_pod(&self, name: &str) -> Result<StatusCode, BackendError> {
        let path = format!("{}?gracePeriodSeconds=5", self.pod_path(name));
        let response = self.client.request(Method::DELETE, &path, None).await?;
        Ok(response.status)
    }

    async fn best_effort_delete(&self, name: &str) {
        if let Err(e) = self.delete_pod(name).await {
            warn!(unit = name, "failed to delete pod: {e}");
        }
    }

    async fn get_pod(&self, name: &str) -> Result<Value, BackendError> {
        let response = self
            .client
            .request(Method::GET, &self.pod_path(name), None)
            .await?;
        if response.status != StatusCode::OK {
            return Err(BackendError::Api {
                status: response.status.as_u16(),
                message: response.error_message(),
            });
        }
        response.json()
    }

    /// Readiness as the pod reports it: Running phase, the gateway
    /// container ready, and a pod IP assigned.
    fn pod_ready_ip(pod: &Value) -> Option<String> {
        let phase = pod.pointer("/status/phase").and_then(Value::as_str)?;
        if phase != "Running" {
            return None;
        }
        let ready = pod
            .pointer("/status/containerStatuses/0/ready")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !ready {
            return None;
        }
        pod.pointer("/status/podIP")
            .and_then(Value::as_str)
            .map(String::from)
    }

    async fn wait_ready(&self, name: &str) -> Result<String, BackendError> {
        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            let pod = self.get_pod(name).await?;

            let phase = pod
                .pointer("/status/phase")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            if phase == "Failed" || phase == "Succeeded" {
                return Err(BackendError::Create(format!(
                    "pod terminated during startup (phase {phase})"
                )));
            }
            if let Some(ip) = Self::pod_ready_ip(&pod) {
                return Ok(ip);
            }
            debug!(unit = name, phase, "waiting for pod readiness");

            if Instant::now() >= deadline {
                return Err(BackendError::ReadyTimeout(self.config.ready_timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait::async_trait]
impl BackendExecutor for K8sExecutor {
    async fn create_unit(&self, request: UnitRequest) -> Result<CreatedUnit, BackendError> {
        let name = format!("{UNIT_PREFIX}{}", Uuid::new_v4());
        info!(unit = %name, server = %request.server.key, "creating proxy unit pod");

        let pod = manifest::unit_pod(
            &name,
            &self.config.image,
            &self.config.tunnel,
            &self.config.health,
            &request,
        );
        let response = self
            .client
            .request(Method::POST, &self.pods_path(), Some(pod))
            .await?;
        if response.status != StatusCode::CREATED {
            return Err(BackendError::Create(response.error_message()));
        }

        let pod_ip = match self.wait_ready(&name).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(unit = %name, "pod never became ready: {e}");
                self.best_effort_delete(&name).await;
                return Err(e);
            }
        };

        let address = format!("{pod_ip}:{}", request.listen_port);
        info!(unit = %name, %address, "proxy unit pod ready");
        Ok(CreatedUnit {
            handle: name,
            address,
        })
    }

    async fn stop_unit(&self, _handle: &str) -> Result<(), BackendError> {
        // Pods have no stopped-but-resumable state
        Err(BackendError::StopUnsupported)
    }

    async fn destroy_unit(&self, handle: &str) -> Result<(), BackendError> {
        match self.delete_pod(handle).await? {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NOT_FOUND => {
                info!(unit = handle, "proxy unit pod destroyed");
                Ok(())
            }
            status => Err(BackendError::Api {
                status: status.as_u16(),
                message: format!("unexpected status deleting pod {handle}"),
            }),
        }
    }

    async fn list_units(&self) -> Result<Vec<String>, BackendError> {
        let path = format!(
            "{}?labelSelector=managed-by%3D{}",
            self.pods_path(),
            manifest::MANAGED_BY
        );
        let response = self.client.request(Method::GET, &path, None).await?;
        if response.status != StatusCode::OK {
            return Err(BackendError::Api {
                status: response.status.as_u16(),
                message: response.error_message(),
            });
        }
        let listing: Value = response.json()?;
        Ok(listing
            .pointer("/items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|pod| pod.pointer("/metadata/name").and_then(Value::as_str))
            .map(String::from)
            .collect())
    }

    async fn fetch_server_payload(&self, timeout: Duration) -> Result<String, BackendError> {
        let name = format!("{UNIT_PREFIX}probe-{}", Uuid::new_v4());
        info!(unit = %name, "fetching server list via probe pod");

        let pod = manifest::probe_pod(&name, &self.config.image);
        let response = self
            .client
            .request(Method::POST, &self.pods_path(), Some(pod))
            .await?;
        if response.status != StatusCode::CREATED {
            return Err(BackendError::Create(response.error_message()));
        }

        let result = async {
            // Wait for the run-once pod to finish
            loop {
                let pod = self.get_pod(&name).await?;
                match pod.pointer("/status/phase").and_then(Value::as_str) {
                    Some("Succeeded") => break,
                    Some("Failed") => {
                        return Err(BackendError::Create("probe pod failed".to_string()))
                    }
                    phase => debug!(unit = %name, ?phase, "waiting for probe pod"),
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
            }

            let response = self
                .client
                .request(Method::GET, &format!("{}/log", self.pod_path(&name)), None)
                .await?;
            if response.status != StatusCode::OK {
                return Err(BackendError::Api {
                    status: response.status.as_u16(),
                    message: response.error_message(),
                });
            }
            Ok(String::from_utf8_lossy(&response.body).into_owned())
        };

        let payload = match tokio::time::timeout(timeout, result).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                self.best_effort_delete(&name).await;
                return Err(e);
            }
            Err(_) => {
                self.best_effort_delete(&name).await;
                return Err(BackendError::ReadyTimeout(timeout));
            }
        };
        self.best_effort_delete(&name).await;

        if payload.trim().is_empty() {
            return Err(BackendError::InvalidResponse(
                "probe pod produced no output".to_string(),
            ));
        }
        Ok(payload)
    }
}
