//! Engine service handle
//!
//! Process-wide shared state holding the current engine instance, its
//! lifetime scope, and the latency-history store. Exactly one handle is
//! reloadable at a time; readers take a single atomic load, writers hold
//! the reload lock for the whole multi-step swap.

mod reload;
pub mod selection;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::engine::{BuildContext, Engine, EngineBuilder, EngineOptions, Platform, StubPlatform};
use crate::error::{Result, SwivelError};
use crate::probe::LatencyHistory;

/// One configuration generation: an engine instance plus the resources that
/// live and die with it.
pub struct Generation {
    pub(crate) engine: Arc<dyn Engine>,
    /// Lifetime scope; flipped to true exactly once, when the generation is
    /// retired. At most one generation's scope is non-cancelled.
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) history: Arc<LatencyHistory>,
}

impl Generation {
    /// Close the instance and cancel its scope. Close errors are logged and
    /// swallowed; the generation is retired regardless of close outcome.
    pub(crate) async fn retire(&self) {
        if let Err(e) = self.engine.close().await {
            warn!("Failed to close old engine instance: {:#}", e);
        }
        let _ = self.shutdown.send(true);
    }
}

/// Shared service handle for a long-lived embedded proxy engine.
///
/// Constructed once by the host and passed by reference into every
/// operation; there are no implicit globals.
pub struct EngineService {
    builder: Arc<dyn EngineBuilder>,
    /// Host platform binding, installed at first start and reused by every
    /// reload. Present iff the service has been started and not shut down.
    platform: RwLock<Option<Arc<dyn Platform>>>,
    generation: ArcSwapOption<Generation>,
    /// Serializes start/reload/shutdown. Probe and fetch never take it.
    reload_lock: tokio::sync::Mutex<()>,
    /// Strictly increasing across the process lifetime; never reset.
    reload_seq: AtomicU64,
    /// Successful reloads only. Failed attempts consume a sequence number
    /// but do not advance this.
    reload_count: AtomicU64,
}

impl EngineService {
    pub fn new(builder: Arc<dyn EngineBuilder>) -> Self {
        Self {
            builder,
            platform: RwLock::new(None),
            generation: ArcSwapOption::empty(),
            reload_lock: tokio::sync::Mutex::new(()),
            reload_seq: AtomicU64::new(0),
            reload_count: AtomicU64::new(0),
        }
    }

    /// Initial startup: build and start the first engine generation from
    /// `config_text` and install the platform binding for later reloads.
    pub async fn start(&self, config_text: &str, platform: Arc<dyn Platform>) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        if self.generation.load().is_some() {
            return Err(SwivelError::AlreadyRunning);
        }

        let options = self
            .builder
            .parse_config(config_text)
            .map_err(SwivelError::ParseConfig)?;

        let generation = self.build_generation(options, platform.clone()).await?;
        self.generation.store(Some(Arc::new(generation)));
        *self.platform.write() = Some(platform);

        info!("Engine service started");
        Ok(())
    }

    /// Stop the current engine instance and clear the platform binding.
    ///
    /// After shutdown, `reload` fails with `NotInitialized` until the host
    /// calls `start` again. The reload sequence counter is not reset.
    pub async fn shutdown(&self) {
        let _guard = self.reload_lock.lock().await;

        if let Some(old) = self.generation.swap(None) {
            old.retire().await;
            info!("Engine service stopped");
        }
        *self.platform.write() = None;
    }

    /// The current engine instance, if one is running.
    ///
    /// A single atomic read: concurrent with a reload this observes either
    /// the old instance, the new one, or nothing, never a partial swap.
    pub fn current_engine(&self) -> Option<Arc<dyn Engine>> {
        self.generation.load_full().map(|gen| gen.engine.clone())
    }

    /// Whether a reload would pass its precondition check.
    pub fn can_reload(&self) -> bool {
        self.platform.read().is_some()
    }

    /// Number of reloads completed successfully over the process lifetime.
    /// Aborted attempts (parse, build or start failure) are not counted.
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    pub(crate) fn current_generation(&self) -> Option<Arc<Generation>> {
        self.generation.load_full()
    }

    pub(crate) fn builder(&self) -> &Arc<dyn EngineBuilder> {
        &self.builder
    }

    pub(crate) fn platform_binding(&self) -> Option<Arc<dyn Platform>> {
        self.platform.read().clone()
    }

    pub(crate) fn swap_generation(
        &self,
        generation: Option<Arc<Generation>>,
    ) -> Option<Arc<Generation>> {
        self.generation.swap(generation)
    }

    /// Assign the next reload sequence number. Callers must hold the reload
    /// lock; the counter is for observability, not correctness.
    pub(crate) fn next_reload_seq(&self) -> u64 {
        self.reload_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Commit one completed reload to the host-visible count. Called on the
    /// reload success path only.
    pub(crate) fn commit_reload(&self) {
        self.reload_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Build and start a fresh generation with its own scope and history
    /// store. On build or start failure the new scope is cancelled and the
    /// handle is left untouched.
    pub(crate) async fn build_generation(
        &self,
        options: EngineOptions,
        platform: Arc<dyn Platform>,
    ) -> Result<Generation> {
        assemble_generation(self.builder.as_ref(), options, platform).await
    }
}

/// Build and start one generation with its own scope and history store. On
/// build or start failure the new scope is cancelled and nothing leaks.
pub(crate) async fn assemble_generation(
    builder: &dyn EngineBuilder,
    options: EngineOptions,
    platform: Arc<dyn Platform>,
) -> Result<Generation> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let history = Arc::new(LatencyHistory::new());

    let ctx = BuildContext {
        options,
        platform,
        history: history.clone(),
        shutdown: shutdown_rx,
    };

    let engine = match builder.build(ctx).await {
        Ok(engine) => engine,
        Err(e) => {
            let _ = shutdown_tx.send(true);
            return Err(SwivelError::CreateInstance(e));
        }
    };

    if let Err(e) = engine.start().await {
        if let Err(close_err) = engine.close().await {
            warn!("Failed to close unstarted engine instance: {:#}", close_err);
        }
        let _ = shutdown_tx.send(true);
        return Err(SwivelError::StartInstance(e));
    }

    Ok(Generation {
        engine,
        shutdown: shutdown_tx,
        history,
    })
}

/// Build and start a short-lived generation outside any service handle,
/// with a stub platform binding. The caller retires it when done.
pub(crate) async fn build_ephemeral(
    builder: &dyn EngineBuilder,
    config_text: &str,
) -> Result<Generation> {
    let options = builder
        .parse_config(config_text)
        .map_err(SwivelError::ParseConfig)?;
    assemble_generation(builder, options, Arc::new(StubPlatform)).await
}
