//! Single-shot HTTP fetch through an engine egress path
//!
//! Thin I/O wrapper around the engine dialer: one HTTP/1.1 GET per call,
//! response body capped, every failure encoded into the result value.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::engine::{dialer_for, Dialer, EngineBuilder};
use crate::error::{Result, SwivelError};
use crate::service::{self, EngineService};

/// Response bodies are truncated at this size.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const USER_AGENT: &str = concat!("swivel/", env!("CARGO_PKG_VERSION"));

/// Outcome of a single fetch
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    /// HTTP status code, or 0 when the request never produced a response
    pub status: i32,
    /// Response body, capped at 10 MiB
    pub body: String,
    /// Failure cause, present iff the fetch failed before a response
    pub error: Option<String>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: String::new(),
            error: Some(error.into()),
        }
    }
}

pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl EngineService {
    /// Fetch `url` once through the egress path named `tag`.
    ///
    /// `headers` is an optional set of `Key: Value` lines. Never returns an
    /// error across the host boundary; all failure is in the result value.
    pub async fn fetch_once(
        &self,
        tag: &str,
        url: &str,
        headers: Option<&str>,
        fetch_timeout: Duration,
    ) -> FetchResult {
        let dialer = match self.resolve_dialer(tag) {
            Ok(dialer) => dialer,
            Err(e) => {
                warn!(tag, "Fetch failed: {}", e);
                return FetchResult::failed(e.to_string());
            }
        };

        match timeout(fetch_timeout, request_via(dialer, url, headers)).await {
            Ok(Ok(raw)) => {
                debug!(tag, status = raw.status, "Fetch completed");
                FetchResult {
                    status: raw.status as i32,
                    body: raw.body,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                warn!(tag, url, "Fetch failed: {}", e);
                FetchResult::failed(e.to_string())
            }
            Err(_) => {
                warn!(tag, url, "Fetch timed out");
                FetchResult::failed(SwivelError::Timeout.to_string())
            }
        }
    }
}

/// Fetch `url` once through an egress path of a temporary engine instance
/// built from `config_text`, for hosts with no running service.
///
/// The instance lives only for this call and is torn down before returning.
/// Never returns an error across the host boundary; all failure, including
/// a config that does not parse or an instance that does not come up, is
/// encoded in the result value.
pub async fn fetch_standalone(
    builder: &dyn EngineBuilder,
    config_text: &str,
    tag: &str,
    url: &str,
    headers: Option<&str>,
    fetch_timeout: Duration,
) -> FetchResult {
    let generation = match service::build_ephemeral(builder, config_text).await {
        Ok(generation) => generation,
        Err(e) => {
            warn!(tag, "Standalone fetch could not bring up an instance: {}", e);
            return FetchResult::failed(e.to_string());
        }
    };

    let outcome = match dialer_for(generation.engine.as_ref(), tag) {
        Ok(dialer) => match timeout(fetch_timeout, request_via(dialer, url, headers)).await {
            Ok(result) => result,
            Err(_) => Err(SwivelError::Timeout),
        },
        Err(e) => Err(e),
    };
    generation.retire().await;

    match outcome {
        Ok(raw) => {
            debug!(tag, status = raw.status, "Standalone fetch completed");
            FetchResult {
                status: raw.status as i32,
                body: raw.body,
                error: None,
            }
        }
        Err(e) => {
            warn!(tag, url, "Standalone fetch failed: {}", e);
            FetchResult::failed(e.to_string())
        }
    }
}

/// One HTTP/1.1 GET over a connection opened by `dialer`.
///
/// Callers own the timeout budget; this future runs until the body is read
/// or the transport fails.
pub(crate) async fn request_via(
    dialer: Arc<dyn Dialer>,
    url: &str,
    headers: Option<&str>,
) -> Result<RawResponse> {
    let parsed = Url::parse(url).map_err(|e| SwivelError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    // An arbitrary engine dialer yields a raw byte stream; without a TLS
    // stack in front of it only plain http is dialable.
    if parsed.scheme() != "http" {
        return Err(SwivelError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| SwivelError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);

    let stream = dialer.dial(&host, port).await?;

    let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| SwivelError::Http(format!("handshake failed: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Fetch connection ended: {}", e);
        }
    });

    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }

    let host_header = if port == 80 {
        host
    } else {
        format!("{}:{}", host, port)
    };

    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, host_header)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::ACCEPT, "*/*");

    if let Some(raw) = headers {
        for line in raw.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    builder = builder.header(key, value.trim());
                }
            }
        }
    }

    let request = builder
        .body(Empty::<Bytes>::new())
        .map_err(|e| SwivelError::Http(format!("invalid request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| SwivelError::Http(format!("request failed: {}", e)))?;

    let status = response.status().as_u16();

    // An oversized body is truncated at the cap, not treated as a failure;
    // the rest of the stream is abandoned with the connection.
    let mut incoming = response.into_body();
    let mut collected: Vec<u8> = Vec::new();
    while collected.len() < MAX_BODY_BYTES {
        let Some(frame) = incoming.frame().await else {
            break;
        };
        let frame =
            frame.map_err(|e| SwivelError::Http(format!("failed to read body: {}", e)))?;
        if let Some(data) = frame.data_ref() {
            let take = data.len().min(MAX_BODY_BYTES - collected.len());
            collected.extend_from_slice(&data[..take]);
        }
    }
    let body = String::from_utf8_lossy(&collected).into_owned();

    Ok(RawResponse { status, body })
}
