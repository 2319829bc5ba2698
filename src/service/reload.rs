//! Hot-reload orchestration
//!
//! Replaces the running engine instance with one built from new
//! configuration while keeping the host-visible service handle stable.
//! The whole multi-step swap runs under a single exclusive lock, so no
//! second reload can observe or mutate a half-replaced handle.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SwivelError};
use crate::service::{selection, EngineService};

impl EngineService {
    /// Hot-swap the engine configuration.
    ///
    /// Blocks until any in-flight reload finishes, then rebuilds the engine
    /// instance from `config_text`. With `preserve_selection`, the active
    /// member of the primary selector group is carried over to the new
    /// instance when the new configuration still contains it.
    ///
    /// Failure modes:
    /// - `NotInitialized`: the service was never started (or was shut
    ///   down); nothing was touched.
    /// - `ParseConfig`: the new configuration is invalid; the old instance
    ///   is still running, untouched.
    /// - `CreateInstance` / `StartInstance`: the old instance was already
    ///   retired and the new one could not be brought up. The service is
    ///   left without any running instance; the caller should treat this
    ///   as "service down, retry reload", not "service reverted".
    #[instrument(skip(self, config_text))]
    pub async fn reload(&self, config_text: &str, preserve_selection: bool) -> Result<()> {
        // Checked before taking the lock: a service that never started has
        // no platform binding to rebuild with. A missing *instance* is not
        // checked here, so a caller can retry after a transitional failure.
        let platform = self.platform_binding().ok_or(SwivelError::NotInitialized)?;

        let _guard = self.reload_lock.lock().await;
        let seq = self.next_reload_seq();
        info!(seq, "Starting engine reload");

        let saved_selection = if preserve_selection {
            let saved = self
                .current_engine()
                .and_then(|engine| selection::read_selection(engine.as_ref()));
            if let Some(tag) = &saved {
                info!(seq, selection = %tag, "Preserving selected egress");
            }
            saved
        } else {
            None
        };

        // Parse before touching anything. A malformed config must leave the
        // old instance fully intact and running.
        let options = match self.builder().parse_config(config_text) {
            Ok(options) => options,
            Err(e) => {
                warn!(seq, "Reload aborted, config did not parse: {:#}", e);
                return Err(SwivelError::ParseConfig(e));
            }
        };

        // From here on the old generation is being retired; a failure below
        // leaves the service without an instance.
        debug!(seq, "Dropping tracked connections");
        self.builder().close_tracked_connections();

        if let Some(old) = self.swap_generation(None) {
            debug!(seq, "Closing old engine instance");
            old.retire().await;
        }

        let generation = match self.build_generation(options, platform).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(seq, "Reload failed, service left without an instance: {}", e);
                return Err(e);
            }
        };

        let engine = generation.engine.clone();
        self.swap_generation(Some(Arc::new(generation)));

        if let Some(tag) = saved_selection {
            if selection::write_selection(engine.as_ref(), &tag) {
                info!(seq, selection = %tag, "Restored selected egress");
            } else {
                warn!(seq, selection = %tag, "Could not restore selected egress");
            }
        }

        self.commit_reload();
        info!(seq, "Reload completed successfully");
        Ok(())
    }
}
