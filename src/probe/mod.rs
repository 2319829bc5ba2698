//! Egress latency probing
//!
//! Measures round-trip latency of named egress paths against a test
//! endpoint, one at a time or many concurrently with a bounded worker
//! pool. Batch results always come back in input order, regardless of
//! completion order.

mod history;

pub use history::{LatencyHistory, LatencySample};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::engine::{dialer_for, Dialer, EngineBuilder};
use crate::error::{Result, SwivelError};
use crate::fetch;
use crate::service::{self, EngineService};

/// Fallback worker-pool size for batch probes.
const DEFAULT_PROBE_CONCURRENCY: usize = 10;

/// Probe endpoint used when the caller passes an empty URL.
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Delay sentinel for a failed probe.
pub const PROBE_FAILED: i32 = -1;

/// Outcome of one latency probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// Egress path tag this entry belongs to
    pub tag: String,
    /// Measured delay in whole milliseconds, or -1 on failure
    pub delay_ms: i32,
    /// Failure cause, present iff the probe failed
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.delay_ms >= 0 && self.error.is_none()
    }
}

/// Split a newline- or comma-delimited tag list, dropping empty entries.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

impl EngineService {
    /// Measure round-trip latency of one egress path.
    ///
    /// Returns the delay in whole milliseconds, or -1 on any failure
    /// (missing instance, unknown egress, dial error, timeout, non-success
    /// status). Never panics or propagates errors; the cause is logged.
    /// Successful samples are recorded into the latency history.
    pub async fn probe_one(&self, tag: &str, url: &str, probe_timeout: Duration) -> i32 {
        self.probe_entry(tag, url, probe_timeout).await.delay_ms
    }

    /// Probe several egress paths concurrently, at most `concurrency` in
    /// flight at once (0 selects the default of 10).
    ///
    /// One entry per input tag, in input order. Individual failures are
    /// encoded per entry and never fail the batch; an empty input yields an
    /// empty result. A stalled target occupies one worker slot until its
    /// own timeout fires and cannot delay unrelated targets beyond that.
    pub async fn probe_many(
        &self,
        tags: &[String],
        url: &str,
        probe_timeout: Duration,
        concurrency: usize,
    ) -> Vec<ProbeResult> {
        if tags.is_empty() {
            return Vec::new();
        }

        let limit = if concurrency == 0 {
            DEFAULT_PROBE_CONCURRENCY
        } else {
            concurrency
        };

        let indexed = futures::stream::iter(tags.iter().cloned().enumerate())
            .map(|(index, tag)| async move {
                let result = self.probe_entry(&tag, url, probe_timeout).await;
                (index, result)
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>()
            .await;

        // Results land at their original index, not in completion order.
        let mut results: Vec<Option<ProbeResult>> = vec![None; tags.len()];
        for (index, result) in indexed {
            results[index] = Some(result);
        }
        results.into_iter().flatten().collect()
    }

    /// The most recently measured delay for `tag`, or -1 if none recorded.
    pub fn last_known_delay(&self, tag: &str) -> i32 {
        self.current_generation()
            .and_then(|gen| gen.history.last(tag))
            .map(|sample| sample.delay_ms as i32)
            .unwrap_or(PROBE_FAILED)
    }

    async fn probe_entry(&self, tag: &str, url: &str, probe_timeout: Duration) -> ProbeResult {
        let url = if url.is_empty() { DEFAULT_TEST_URL } else { url };

        match self.timed_probe(tag, url, probe_timeout).await {
            Ok(delay_ms) => {
                debug!(tag, delay_ms, "Probe succeeded");
                if let Some(gen) = self.current_generation() {
                    gen.history.record(tag, delay_ms);
                }
                ProbeResult {
                    tag: tag.to_string(),
                    delay_ms: delay_ms as i32,
                    error: None,
                }
            }
            Err(e) => {
                warn!(tag, "Probe failed: {}", e);
                ProbeResult {
                    tag: tag.to_string(),
                    delay_ms: PROBE_FAILED,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn timed_probe(&self, tag: &str, url: &str, probe_timeout: Duration) -> Result<u32> {
        let dialer = self.resolve_dialer(tag)?;
        timed_round_trip(dialer, url, probe_timeout).await
    }

    /// Resolve `tag` to a dialer through the current instance.
    pub(crate) fn resolve_dialer(&self, tag: &str) -> Result<Arc<dyn Dialer>> {
        let engine = self.current_engine().ok_or(SwivelError::NotRunning)?;
        dialer_for(engine.as_ref(), tag)
    }
}

/// Probe an egress path through a temporary engine instance built from
/// `config_text`, for hosts with no running service.
///
/// The instance lives only for this call and is torn down before returning.
/// Same conventions as [`EngineService::probe_one`]: delay in whole
/// milliseconds, -1 on any failure, empty `url` selects the default
/// endpoint. No history is recorded.
pub async fn probe_standalone(
    builder: &dyn EngineBuilder,
    config_text: &str,
    tag: &str,
    url: &str,
    probe_timeout: Duration,
) -> i32 {
    let generation = match service::build_ephemeral(builder, config_text).await {
        Ok(generation) => generation,
        Err(e) => {
            warn!(tag, "Standalone probe could not bring up an instance: {}", e);
            return PROBE_FAILED;
        }
    };

    let url = if url.is_empty() { DEFAULT_TEST_URL } else { url };
    let outcome = match dialer_for(generation.engine.as_ref(), tag) {
        Ok(dialer) => timed_round_trip(dialer, url, probe_timeout).await,
        Err(e) => Err(e),
    };
    generation.retire().await;

    match outcome {
        Ok(delay_ms) => {
            debug!(tag, delay_ms, "Standalone probe succeeded");
            delay_ms as i32
        }
        Err(e) => {
            warn!(tag, "Standalone probe failed: {}", e);
            PROBE_FAILED
        }
    }
}

async fn timed_round_trip(
    dialer: Arc<dyn Dialer>,
    url: &str,
    probe_timeout: Duration,
) -> Result<u32> {
    let started = Instant::now();

    let response = timeout(probe_timeout, fetch::request_via(dialer, url, None))
        .await
        .map_err(|_| SwivelError::Timeout)??;

    if response.status >= 400 {
        return Err(SwivelError::BadStatus(response.status));
    }

    Ok(started.elapsed().as_millis() as u32)
}
