//! Gateway relay
//!
//! Receives `(service, url)` from the dashboard, hands the request to the
//! secret-resolution backend and relays the answer:
//! - Forwards every inbound header except `host` and the inbound framing headers
//! - Re-emits JSON payloads parsed, everything else verbatim
//! - Keeps the upstream status code
//! - Maps transport failures to `502 Bad Gateway`

use crate::config::GatewayConfig;
use crate::metrics::GatewayMetrics;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Headers that must never reach the backend
pub const NEVER_FORWARDED: [HeaderName; 1] = [header::HOST];

/// Framing and hop-by-hop headers of the inbound connection. The inbound body
/// is not forwarded, so these would describe bytes the backend never receives.
pub const INBOUND_ONLY: [HeaderName; 8] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TE,
    header::TRAILER,
    HeaderName::from_static("trailers"),
    header::UPGRADE,
];

/// Message returned when a parameter is missing
pub const MISSING_PARAMETERS_MESSAGE: &str = "Missing parameters: 'service' and 'url' are required.";

/// Message returned on gateway-level failures
pub const GATEWAY_FAILURE_MESSAGE: &str = "Gateway proxy error";

/// Relay query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayParams {
    pub service: Option<String>,
    pub url: Option<String>,
}

impl RelayParams {
    /// Both parameters, if present and non-empty
    pub fn required(&self) -> Option<(&str, &str)> {
        let service = self.service.as_deref().filter(|s| !s.is_empty())?;
        let url = self.url.as_deref().filter(|u| !u.is_empty())?;
        Some((service, url))
    }
}

/// Error body returned by the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Relay failures
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{}", MISSING_PARAMETERS_MESSAGE)]
    MissingParameters,

    #[error(transparent)]
    Upstream(#[from] reqwest::Error),

    #[error("malformed JSON from upstream: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingParameters => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Failure category reported next to `details`
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MissingParameters => "missing_parameters",
            RelayError::Upstream(e) if e.is_timeout() => "timeout",
            RelayError::Upstream(e) if e.is_connect() => "connect",
            RelayError::Upstream(e) if e.is_body() || e.is_decode() => "body",
            RelayError::Upstream(_) => "request",
            RelayError::MalformedJson(_) => "decode",
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            RelayError::MissingParameters => ErrorBody {
                error: MISSING_PARAMETERS_MESSAGE.to_string(),
                details: None,
                kind: None,
            },
            other => ErrorBody {
                error: GATEWAY_FAILURE_MESSAGE.to_string(),
                details: Some(error_chain(other)),
                kind: Some(other.kind().to_string()),
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self.body())).into_response()
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// True for `application/json` and `+json` media types
pub fn is_structured(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Copy of the inbound headers with the denylist and inbound-only headers removed
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in NEVER_FORWARDED {
        headers.remove(name);
    }
    for name in INBOUND_ONLY {
        headers.remove(name);
    }
    headers
}

/// Relay service
#[derive(Clone)]
pub struct RelayService {
    client: Client,
    upstream: Url,
    metrics: Arc<GatewayMetrics>,
}

impl RelayService {
    /// Create a relay for the configured backend
    pub fn new(config: &GatewayConfig, metrics: Arc<GatewayMetrics>) -> anyhow::Result<Self> {
        let upstream = Url::parse(&config.backend.proxy_endpoint())?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.server.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        Ok(Self {
            client: builder.build()?,
            upstream,
            metrics,
        })
    }

    /// Backend address for a relay call
    pub fn upstream_url(&self, service: &str, url: &str) -> Url {
        let mut upstream = self.upstream.clone();
        upstream
            .query_pairs_mut()
            .append_pair("service", service)
            .append_pair("url", url);
        upstream
    }

    /// Handle one relay call, recording its outcome
    pub async fn relay(&self, params: RelayParams, inbound: &HeaderMap) -> Response<Body> {
        let start = Instant::now();

        match self.forward(params, inbound).await {
            Ok(response) => {
                self.metrics
                    .record_relay(response.status().as_u16(), "relayed", start.elapsed());
                response
            }
            Err(e) => {
                let outcome = match e {
                    RelayError::MissingParameters => "rejected",
                    _ => "gateway_error",
                };
                self.metrics
                    .record_relay(e.status().as_u16(), outcome, start.elapsed());
                e.into_response()
            }
        }
    }

    /// Forward to the backend and convert its answer
    pub async fn forward(
        &self,
        params: RelayParams,
        inbound: &HeaderMap,
    ) -> Result<Response<Body>, RelayError> {
        let (service, url) = params.required().ok_or(RelayError::MissingParameters)?;
        let upstream = self.upstream_url(service, url);
        let headers = forwarded_headers(inbound);

        info!(service = %service, url = %url, "Relaying request");
        debug!(
            headers = ?headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            "Forwarded header names"
        );

        let response = self
            .client
            .get(upstream)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                error!(service = %service, error = %error_chain(&e), "Backend request failed");
                RelayError::Upstream(e)
            })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let bytes = response.bytes().await?;

        let structured = content_type
            .as_ref()
            .and_then(|ct| ct.to_str().ok())
            .map(is_structured)
            .unwrap_or(false);

        if structured {
            let payload: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                error!(service = %service, error = %e, "Backend returned malformed JSON");
                RelayError::MalformedJson(e)
            })?;
            return Ok((status, Json(payload)).into_response());
        }

        let content_type = content_type
            .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
        Ok((status, [(header::CONTENT_TYPE, content_type)], Body::from(bytes)).into_response())
    }
}
