//! Engine collaborator interfaces
//!
//! The proxy engine itself lives outside this crate. Everything the control
//! layer needs from it is expressed here as traits: building an instance
//! from parsed configuration, the start/close lifecycle, and resolving a
//! named egress path to something that can dial outbound connections.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::probe::LatencyHistory;

/// A bidirectional byte stream opened through an egress path.
///
/// Engines return whatever transport their protocol produced (plain TCP,
/// a CONNECT tunnel, a SOCKS stream) behind this object.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Capability to open outbound connections through one egress path.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial the target host/port through this egress path.
    async fn dial(&self, host: &str, port: u16) -> std::io::Result<Box<dyn Connection>>;
}

/// An egress path that is itself a named choice among several underlying
/// egress paths, with one currently active member.
pub trait SelectorGroup: Send + Sync {
    /// Tag of the currently active member.
    fn current(&self) -> String;

    /// Switch the active member. Returns false if `tag` is not a member.
    fn apply(&self, tag: &str) -> bool;

    /// Dialer routing through the currently active member.
    fn dialer(&self) -> Arc<dyn Dialer>;
}

/// A named egress path resolved from the engine's routing graph.
///
/// Egress objects are a closed set of variants; selector capability is a
/// variant, not a method set to be probed at runtime.
#[derive(Clone)]
pub enum Egress {
    /// A plain dialing egress path.
    Dialer(Arc<dyn Dialer>),
    /// A selector group over several egress paths.
    Selector(Arc<dyn SelectorGroup>),
}

impl Egress {
    /// The dialer for this egress path. A selector group dials through its
    /// currently active member.
    pub fn dialer(&self) -> Arc<dyn Dialer> {
        match self {
            Egress::Dialer(dialer) => dialer.clone(),
            Egress::Selector(group) => group.dialer(),
        }
    }

    pub fn as_selector(&self) -> Option<&Arc<dyn SelectorGroup>> {
        match self {
            Egress::Selector(group) => Some(group),
            Egress::Dialer(_) => None,
        }
    }
}

/// One running engine instance, owning sockets and routing state for a
/// single configuration generation.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Bring the instance up. Called exactly once, before any egress lookup.
    async fn start(&self) -> anyhow::Result<()>;

    /// Tear the instance down, releasing its network resources.
    ///
    /// The instance is considered retired whether or not close succeeds.
    async fn close(&self) -> anyhow::Result<()>;

    /// Resolve an egress path by tag.
    fn egress(&self, tag: &str) -> Option<Egress>;
}

/// Engine-consumable configuration, produced by [`EngineBuilder::parse_config`].
///
/// Opaque to the control layer; only the builder interprets it.
pub struct EngineOptions(pub serde_json::Value);

/// Host OS integration handed to the engine at build time.
///
/// Reused across reloads: the binding outlives any single instance.
pub trait Platform: Send + Sync {
    /// Whether connection ownership should be resolved through procfs.
    fn use_proc_fs(&self) -> bool {
        false
    }

    /// Exempt an outbound socket from the host's own traffic capture.
    /// Returns false if the socket could not be protected.
    fn protect_socket(&self, _fd: i32) -> bool {
        true
    }
}

/// Platform binding with no host integration.
///
/// Used for ephemeral instances (standalone probe/fetch) that run outside
/// any hosted service and need no socket protection or procfs lookups.
pub struct StubPlatform;

impl Platform for StubPlatform {}

/// Everything a new engine generation is built from.
pub struct BuildContext {
    /// Parsed configuration.
    pub options: EngineOptions,
    /// Host platform binding, shared across generations.
    pub platform: Arc<dyn Platform>,
    /// Latency history store for this generation.
    pub history: Arc<LatencyHistory>,
    /// Lifetime scope; flips to true when the generation is retired.
    pub shutdown: watch::Receiver<bool>,
}

/// Constructs engine instances from raw configuration.
#[async_trait]
pub trait EngineBuilder: Send + Sync {
    /// Parse and validate raw configuration text.
    fn parse_config(&self, raw: &str) -> anyhow::Result<EngineOptions>;

    /// Construct a new instance. The instance is not started yet.
    async fn build(&self, ctx: BuildContext) -> anyhow::Result<Arc<dyn Engine>>;

    /// Release process-wide transient network resources (connection
    /// tracking tables) held by the previous generation. Best-effort.
    fn close_tracked_connections(&self) {}
}

/// Resolve `tag` on `engine` to its dialer.
pub(crate) fn dialer_for(
    engine: &dyn Engine,
    tag: &str,
) -> crate::error::Result<Arc<dyn Dialer>> {
    let egress = engine
        .egress(tag)
        .ok_or_else(|| crate::error::SwivelError::EgressNotFound(tag.to_string()))?;
    Ok(egress.dialer())
}
