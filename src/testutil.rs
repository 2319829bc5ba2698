//! Shared test fixtures: a mock engine stack and minimal local HTTP servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::engine::{
    BuildContext, Connection, Dialer, Egress, Engine, EngineBuilder, EngineOptions, Platform,
    SelectorGroup,
};
use crate::probe::LatencyHistory;

pub const FAIL_BUILD_CONFIG: &str = r#"{"fail":"build"}"#;
pub const FAIL_START_CONFIG: &str = r#"{"fail":"start"}"#;

/// Config with direct outbounds only. `addr` pins the dialer to a fixed
/// local server regardless of the requested target.
pub fn direct_config(outbounds: &[(&str, Option<SocketAddr>)]) -> String {
    let list: Vec<serde_json::Value> = outbounds
        .iter()
        .map(|(tag, addr)| match addr {
            Some(addr) => json!({"tag": tag, "type": "direct", "addr": addr.to_string()}),
            None => json!({"tag": tag, "type": "direct"}),
        })
        .collect();
    json!({ "outbounds": list }).to_string()
}

/// Config with a single selector group.
pub fn selector_config(tag: &str, members: &[&str], default: &str) -> String {
    json!({
        "outbounds": [
            {"tag": tag, "type": "selector", "members": members, "default": default}
        ]
    })
    .to_string()
}

/// Config with two selector groups, in the given order.
pub fn two_selector_config(
    first: (&str, &[&str], &str),
    second: (&str, &[&str], &str),
) -> String {
    json!({
        "outbounds": [
            {"tag": first.0, "type": "selector", "members": first.1, "default": first.2},
            {"tag": second.0, "type": "selector", "members": second.1, "default": second.2}
        ]
    })
    .to_string()
}

#[derive(Deserialize)]
struct MockConfig {
    #[serde(default)]
    outbounds: Vec<MockOutbound>,
    #[serde(default)]
    fail: Option<String>,
}

#[derive(Deserialize)]
struct MockOutbound {
    tag: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    members: Vec<String>,
    #[serde(rename = "default", default)]
    default_member: Option<String>,
}

pub struct MockPlatform;

impl Platform for MockPlatform {}

struct MockDialer {
    /// Fixed target; when absent, dials the requested host/port.
    addr: Option<SocketAddr>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, host: &str, port: u16) -> std::io::Result<Box<dyn Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "engine instance closed",
            ));
        }
        let target = match self.addr {
            Some(addr) => addr,
            None => {
                let ip: std::net::IpAddr = host.parse().map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::AddrNotAvailable,
                        format!("mock dialer cannot resolve {}", host),
                    )
                })?;
                SocketAddr::new(ip, port)
            }
        };
        let stream = TcpStream::connect(target).await?;
        Ok(Box::new(stream))
    }
}

struct MockSelector {
    members: Vec<String>,
    current: Mutex<String>,
    closed: Arc<AtomicBool>,
}

impl SelectorGroup for MockSelector {
    fn current(&self) -> String {
        self.current.lock().clone()
    }

    fn apply(&self, tag: &str) -> bool {
        if !self.members.iter().any(|member| member == tag) {
            return false;
        }
        *self.current.lock() = tag.to_string();
        true
    }

    fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::new(MockDialer {
            addr: None,
            closed: self.closed.clone(),
        })
    }
}

pub struct MockEngine {
    egresses: HashMap<String, Egress>,
    fail_start: bool,
    closed: Arc<AtomicBool>,
    closed_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl Engine for MockEngine {
    async fn start(&self) -> anyhow::Result<()> {
        if self.fail_start {
            anyhow::bail!("injected start failure");
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn egress(&self, tag: &str) -> Option<Egress> {
        self.egresses.get(tag).cloned()
    }
}

/// Instrumented builder producing [`MockEngine`]s from a small JSON config.
pub struct MockBuilder {
    build_delay: Option<Duration>,
    builds_in_flight: AtomicUsize,
    max_concurrent_builds: AtomicUsize,
    closed_instances: Arc<AtomicUsize>,
    dropped_conntrack: AtomicUsize,
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBuilder {
    pub fn new() -> Self {
        Self {
            build_delay: None,
            builds_in_flight: AtomicUsize::new(0),
            max_concurrent_builds: AtomicUsize::new(0),
            closed_instances: Arc::new(AtomicUsize::new(0)),
            dropped_conntrack: AtomicUsize::new(0),
        }
    }

    /// Slow down `build` so overlapping reloads would be observable.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Highest number of builds that ever ran concurrently.
    pub fn max_concurrent_builds(&self) -> usize {
        self.max_concurrent_builds.load(Ordering::SeqCst)
    }

    /// Total engine instances closed so far.
    pub fn closed_instances(&self) -> usize {
        self.closed_instances.load(Ordering::SeqCst)
    }

    /// Times the conntrack release hook was invoked.
    pub fn dropped_conntrack(&self) -> usize {
        self.dropped_conntrack.load(Ordering::SeqCst)
    }

    /// Parse, build, and start an engine directly, outside any service.
    pub async fn build_engine(&self, config: &str) -> Arc<dyn Engine> {
        let options = self.parse_config(config).unwrap();
        let (_tx, rx) = watch::channel(false);
        let engine = self
            .build(BuildContext {
                options,
                platform: Arc::new(MockPlatform),
                history: Arc::new(LatencyHistory::new()),
                shutdown: rx,
            })
            .await
            .unwrap();
        engine.start().await.unwrap();
        engine
    }

    fn assemble(&self, config: MockConfig) -> anyhow::Result<MockEngine> {
        let closed = Arc::new(AtomicBool::new(false));
        let mut egresses = HashMap::new();

        for outbound in config.outbounds {
            let egress = match outbound.kind.as_str() {
                "direct" => {
                    let addr = outbound
                        .addr
                        .map(|raw| raw.parse::<SocketAddr>())
                        .transpose()?;
                    Egress::Dialer(Arc::new(MockDialer {
                        addr,
                        closed: closed.clone(),
                    }))
                }
                "selector" => {
                    let default = outbound
                        .default_member
                        .or_else(|| outbound.members.first().cloned())
                        .unwrap_or_default();
                    Egress::Selector(Arc::new(MockSelector {
                        members: outbound.members,
                        current: Mutex::new(default),
                        closed: closed.clone(),
                    }))
                }
                other => anyhow::bail!("unknown outbound type: {}", other),
            };
            egresses.insert(outbound.tag, egress);
        }

        Ok(MockEngine {
            egresses,
            fail_start: config.fail.as_deref() == Some("start"),
            closed,
            closed_counter: self.closed_instances.clone(),
        })
    }
}

#[async_trait]
impl EngineBuilder for MockBuilder {
    fn parse_config(&self, raw: &str) -> anyhow::Result<EngineOptions> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Ok(EngineOptions(value))
    }

    async fn build(&self, ctx: BuildContext) -> anyhow::Result<Arc<dyn Engine>> {
        let in_flight = self.builds_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_builds
            .fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        let result: anyhow::Result<MockEngine> = (|| {
            let config: MockConfig = serde_json::from_value(ctx.options.0)?;
            if config.fail.as_deref() == Some("build") {
                anyhow::bail!("injected build failure");
            }
            self.assemble(config)
        })();

        self.builds_in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|engine| Arc::new(engine) as Arc<dyn Engine>)
    }

    fn close_tracked_connections(&self) {
        self.dropped_conntrack.fetch_add(1, Ordering::SeqCst);
    }
}

/// A local HTTP server answering every request with a fixed response.
pub struct TestServer {
    pub addr: SocketAddr,
    pub url: String,
    /// Raw request heads, in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
}

/// Spawn a server that reads the request head and writes `response`.
pub fn spawn_http_server(response: &'static str) -> TestServer {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|window| window == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                seen.lock().push(String::from_utf8_lossy(&head).into_owned());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    TestServer {
        addr,
        url: format!("http://{}/", addr),
        requests,
    }
}

/// Spawn a server that accepts connections but never answers. Connections
/// are held open so clients hit their own timeout instead of seeing EOF.
pub fn spawn_silent_server() -> TestServer {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });

    TestServer {
        addr,
        url: format!("http://{}/", addr),
        requests: Arc::new(Mutex::new(Vec::new())),
    }
}
