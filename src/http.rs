//! HTTP relay method.
//!
//! Sandboxed contexts cannot reach the privileged HTTP endpoint directly;
//! they call the `http.request` method and a privileged context performs
//! the actual transfer. The request carries `(method, payload)`, the
//! response carries `(statusCode, bodyText, headerMap)`.
//!
//! The fixed protocol headers are attached here, by the relay handler, not
//! by the transport: the handler is the party that owns the HTTP exchange.
//!
//! The actual I/O sits behind [`HttpExecutor`] so the protocol layer stays
//! deterministic in tests; the executor is an external collaborator.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MethodName;
use crate::registry::MethodRegistration;

// ============================================================================
// Constants
// ============================================================================

/// Method name the relay is registered under.
pub const RELAY_METHOD: &str = "http.request";

/// Content type attached to every relayed request.
const CONTENT_TYPE: &str = "application/json";

/// Header carrying the client version.
const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

/// Header carrying the relay API version.
const API_VERSION_HEADER: &str = "X-API-Version";

/// Version of the relay API this crate speaks.
const API_VERSION: &str = "2";

// ============================================================================
// Request / Response Types
// ============================================================================

/// The HTTP exchange handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Endpoint method name, e.g. `"saveItems"`.
    pub method: String,
    /// Headers to attach, fixed protocol headers included.
    pub headers: Vec<(String, String)>,
    /// Serialized request body.
    pub body: String,
}

/// The raw result of an HTTP exchange, before header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
    /// The unparsed response header block, CR/LF separated.
    pub raw_headers: String,
}

/// The relay method's result value as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
    /// Response headers, names lowercased, duplicates collapsed.
    pub headers: FxHashMap<String, String>,
}

// ============================================================================
// HttpExecutor
// ============================================================================

/// Performs the actual HTTP transfer for the relay handler.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Executes one HTTP exchange.
    ///
    /// # Errors
    ///
    /// Implementations surface transfer failures as [`Error::Handler`] so
    /// the kind and message reach the caller.
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse>;
}

// ============================================================================
// Header Parsing
// ============================================================================

/// Parses a raw response header block into a lowercased name → value map.
///
/// Each line is split at the first colon; lines without one (the status
/// line, blank lines) are skipped. When two headers share a name the last
/// occurrence wins.
#[must_use]
pub fn parse_raw_headers(raw: &str) -> FxHashMap<String, String> {
    let mut headers = FxHashMap::default();

    for line in raw.split(['\r', '\n']) {
        let Some(colon) = line.find(':') else {
            continue;
        };
        let name = line[..colon].to_lowercase();
        let value = line[colon + 1..].trim_start().to_string();
        headers.insert(name, value);
    }

    headers
}

/// Returns the fixed headers attached to every relayed request.
#[must_use]
fn fixed_headers() -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
        (
            CLIENT_VERSION_HEADER.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        (API_VERSION_HEADER.to_string(), API_VERSION.to_string()),
    ]
}

// ============================================================================
// Registration
// ============================================================================

/// Builds the `http.request` registration over the given executor.
///
/// Register this in the privileged context; sandboxed contexts call the
/// method by name and receive a [`RelayResponse`] value.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the method name constant is
/// rejected; this cannot happen for the shipped constant.
pub fn http_relay_registration(executor: Arc<dyn HttpExecutor>) -> Result<MethodRegistration> {
    let method = MethodName::new(RELAY_METHOD)?;

    Ok(MethodRegistration::new(method)
        .min_args(2)
        .handler(move |args| {
            let executor = Arc::clone(&executor);
            async move {
                let endpoint = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_argument("http.request: method must be a string"))?
                    .to_string();

                let body = match args.get(1) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => serde_json::to_string(other)?,
                };

                let raw = executor
                    .execute(OutboundRequest {
                        method: endpoint,
                        headers: fixed_headers(),
                        body,
                    })
                    .await?;

                let response = RelayResponse {
                    status: raw.status,
                    body: raw.body,
                    headers: parse_raw_headers(&raw.raw_headers),
                };
                Ok(serde_json::to_value(response)?)
            }
        }))
}

// ============================================================================
// Tests
// ============================================================================
