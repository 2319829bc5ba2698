//! Swivel - Engine Hot-Reload and Probing Layer
//!
//! Control layer for a long-lived proxy engine embedded in a host
//! application.
//!
//! ## Features
//!
//! - Hot-swapping the engine configuration without tearing down the
//!   host-side service shell, with selector state carried across the swap
//! - Outbound HTTP fetches through a named egress path of the engine
//! - Latency probing of one or many egress paths with bounded concurrency
//!   and input-order result aggregation
//! - Last-known-delay history per egress path
//! - Standalone probe and fetch through a temporary instance, for hosts
//!   with no running service
//!
//! The engine itself is an external collaborator reached through the traits
//! in [`engine`]; the host constructs one [`EngineService`] and passes it by
//! reference into every operation.

pub mod engine;
pub mod error;
pub mod fetch;
pub mod probe;
pub mod service;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Result, SwivelError};
pub use fetch::{fetch_standalone, FetchResult};
pub use probe::{
    parse_tags, probe_standalone, LatencyHistory, LatencySample, ProbeResult, DEFAULT_TEST_URL,
};
pub use service::EngineService;
