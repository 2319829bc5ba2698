//! Latency history store
//!
//! Keeps the single most recent probe sample per egress tag. Shared between
//! the prober and the engine adapter layer; last-write-wins per key.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Most recent latency measurement for one egress path
#[derive(Debug, Clone, Serialize)]
pub struct LatencySample {
    /// When the probe completed
    pub at: DateTime<Utc>,
    /// Measured round-trip delay in whole milliseconds
    pub delay_ms: u32,
}

/// Concurrent tag -> latest-sample map. No retention beyond one sample.
#[derive(Debug, Default)]
pub struct LatencyHistory {
    samples: dashmap::DashMap<String, LatencySample>,
}

impl LatencyHistory {
    pub fn new() -> Self {
        Self {
            samples: dashmap::DashMap::new(),
        }
    }

    /// Record a sample for `tag`, overwriting any prior entry.
    pub fn record(&self, tag: &str, delay_ms: u32) {
        self.samples.insert(
            tag.to_string(),
            LatencySample {
                at: Utc::now(),
                delay_ms,
            },
        );
    }

    /// The most recent sample for `tag`, if any.
    pub fn last(&self, tag: &str) -> Option<LatencySample> {
        self.samples.get(tag).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&self) {
        self.samples.clear();
    }
}
