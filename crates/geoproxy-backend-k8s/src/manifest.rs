//! Pod manifests for proxy units

use serde_json::{json, Value};

use geoproxy_backend::{gluetun_env, HealthTuning, UnitRequest, VpnTunnelConfig};

/// Label applied to every pod this adapter owns; listing and orphan
/// cleanup select on it.
pub(crate) const MANAGED_BY: &str = "geoproxy";

fn env_objects(pairs: Vec<(String, String)>) -> Vec<Value> {
    pairs
        .into_iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect()
}

/// Manifest for a long-running proxy unit pod. The gateway container
/// needs `NET_ADMIN`; readiness is a TCP probe against the proxy port,
/// delayed by the tunnel's initial health grace so the pod is not
/// marked ready before the tunnel can possibly be up.
pub(crate) fn unit_pod(
    name: &str,
    image: &str,
    tunnel: &VpnTunnelConfig,
    health: &HealthTuning,
    request: &UnitRequest,
) -> Value {
    let env = env_objects(gluetun_env(tunnel, health, request));
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "labels": {
                "app": "geoproxy-unit",
                "managed-by": MANAGED_BY,
                "server-key": request.server.key
            }
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": "gateway",
                "image": image,
                "env": env,
                "ports": [{"containerPort": request.listen_port, "protocol": "TCP"}],
                "securityContext": {
                    "capabilities": {"add": ["NET_ADMIN"]}
                },
                "resources": {
                    "requests": {"cpu": "100m", "memory": "128Mi"},
                    "limits": {"memory": "512Mi"}
                },
                "readinessProbe": {
                    "tcpSocket": {"port": request.listen_port},
                    "initialDelaySeconds": health.initial_grace.as_secs(),
                    "periodSeconds": 5,
                    "failureThreshold": 30
                }
            }]
        }
    })
}

/// Manifest for a run-once pod that prints the bundled server list to
/// its log and exits.
pub(crate) fn probe_pod(name: &str, image: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "labels": {"managed-by": MANAGED_BY}
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": "probe",
                "image": image,
                "command": ["/bin/sh", "-c", "cat /gluetun/servers.json"]
            }]
        }
    })
}
