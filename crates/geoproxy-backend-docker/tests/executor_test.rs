//! Lifecycle tests against a scripted engine socket

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use uuid::Uuid;

use geoproxy_backend::{
    BackendError, BackendExecutor, ProxyCredentials, UnitRequest, VpnTunnelConfig,
};
use geoproxy_backend_docker::{DockerExecutor, DockerExecutorConfig};
use geoproxy_catalog::ServerEntry;

/// Minimal engine stand-in on a Unix socket. Each connection carries one
/// request; the responder decides the canned reply, or `None` to hang up
/// without answering.
struct FakeEngine {
    socket_path: PathBuf,
    requests: Arc<Mutex<Vec<String>>>,
}

type Responder = dyn Fn(&str, &str) -> Option<(u16, String)> + Send + Sync;

impl FakeEngine {
    fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> Option<(u16, String)> + Send + Sync + 'static,
    {
        let socket_path =
            std::env::temp_dir().join(format!("geoproxy-engine-{}.sock", Uuid::new_v4()));
        let listener = UnixListener::bind(&socket_path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let respond: Arc<Responder> = Arc::new(respond);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(Self::serve_one(stream, seen.clone(), respond.clone()));
            }
        });

        Self {
            socket_path,
            requests,
        }
    }

    async fn serve_one(
        mut stream: tokio::net::UnixStream,
        seen: Arc<Mutex<Vec<String>>>,
        respond: Arc<Responder>,
    ) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
        let method = request_line.next().unwrap_or("").to_string();
        let path = request_line.next().unwrap_or("").to_string();

        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
        }

        seen.lock().unwrap().push(format!("{method} {path}"));

        match respond(&method, &path) {
            Some((status, body)) => {
                let reply = if body.is_empty() {
                    format!("HTTP/1.1 {status} X\r\nconnection: close\r\n\r\n")
                } else {
                    format!(
                        "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    )
                };
                let _ = stream.write_all(reply.as_bytes()).await;
            }
            None => {}
        }
        let _ = stream.shutdown().await;
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn executor(&self) -> DockerExecutor {
        let tunnel = VpnTunnelConfig {
            provider: "mullvad".into(),
            wireguard_private_key: "privkey".into(),
            wireguard_addresses: "10.64.0.2/32".into(),
            firewall_input_ports: None,
        };
        let mut config = DockerExecutorConfig::new(tunnel);
        config.socket_path = self.socket_path.clone();
        DockerExecutor::new(config)
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn test_request() -> UnitRequest {
    UnitRequest {
        server: ServerEntry {
            key: "usa-new-york-ny-us-nyc-wg-301".into(),
            hostname: "us-nyc-wg-301".into(),
            country: "USA".into(),
            city: "New York NY".into(),
            ip_addresses: vec!["198.51.100.1".into()],
            public_key: "pk1".into(),
            protocol: "wireguard".into(),
        },
        credentials: ProxyCredentials {
            username: "alice".into(),
            password: "s3cret".into(),
        },
        listen_port: 8888,
    }
}

fn removal_for(requests: &[String], created: &str) -> bool {
    let name = created
        .split_once("name=")
        .map(|(_, name)| name)
        .unwrap_or_default();
    requests.iter().any(|r| {
        r.starts_with(&format!("DELETE /containers/{name}")) && r.contains("force=true")
    })
}

#[tokio::test]
async fn start_transport_failure_removes_the_created_container() {
    let engine = FakeEngine::start(|method, path| match (method, path) {
        ("POST", p) if p.starts_with("/containers/create") => {
            Some((201, r#"{"Id":"abc"}"#.to_string()))
        }
        // hang up mid-request so the start call dies on the wire
        ("POST", p) if p.ends_with("/start") => None,
        ("DELETE", _) => Some((204, String::new())),
        _ => Some((500, r#"{"message":"unexpected request"}"#.to_string())),
    });

    let err = engine
        .executor()
        .create_unit(test_request())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)), "{err:?}");

    let requests = engine.requests();
    let created = requests
        .iter()
        .find(|r| r.contains("/containers/create"))
        .expect("create request recorded");
    assert!(
        removal_for(&requests, created),
        "no force removal after failed start: {requests:?}"
    );
}

#[tokio::test]
async fn unusable_inspect_removes_the_created_container() {
    let engine = FakeEngine::start(|method, path| match (method, path) {
        ("POST", p) if p.starts_with("/containers/create") => {
            Some((201, r#"{"Id":"abc"}"#.to_string()))
        }
        ("POST", p) if p.ends_with("/start") => Some((204, String::new())),
        // inspect document with no port bindings
        ("GET", p) if p.ends_with("/json") => Some((200, "{}".to_string())),
        ("DELETE", _) => Some((204, String::new())),
        _ => Some((500, r#"{"message":"unexpected request"}"#.to_string())),
    });

    let err = engine
        .executor()
        .create_unit(test_request())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(_)), "{err:?}");

    let requests = engine.requests();
    let created = requests
        .iter()
        .find(|r| r.contains("/containers/create"))
        .expect("create request recorded");
    assert!(
        removal_for(&requests, created),
        "no force removal after unusable inspect: {requests:?}"
    );
}

#[tokio::test]
async fn create_rejection_leaves_nothing_to_remove() {
    let engine = FakeEngine::start(|method, path| match (method, path) {
        ("POST", p) if p.starts_with("/containers/create") => {
            Some((409, r#"{"message":"name already in use"}"#.to_string()))
        }
        _ => Some((500, r#"{"message":"unexpected request"}"#.to_string())),
    });

    let err = engine
        .executor()
        .create_unit(test_request())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Create(_)), "{err:?}");

    let requests = engine.requests();
    assert!(
        !requests.iter().any(|r| r.starts_with("DELETE")),
        "nothing was created, nothing should be removed: {requests:?}"
    );
}
