//! Request dispatcher
//!
//! Runs a widget's request for one configured item. The effective request
//! options are an ordered merge of proxy defaults, item settings and caller
//! overrides. Items whose configuration carries the secret marker are sent
//! through the gateway relay; all others go straight to their target.

use crate::item::{Headers, Item, ProxyConfig};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default path of the relay on the gateway
pub const DEFAULT_RELAY_PATH: &str = "/server/";

/// Whether cookies travel with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    Include,
    Omit,
}

impl From<bool> for CredentialsMode {
    fn from(include: bool) -> Self {
        if include {
            CredentialsMode::Include
        } else {
            CredentialsMode::Omit
        }
    }
}

/// Request options. Unset fields fall through to lower-precedence layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub method: Option<Method>,
    pub headers: Option<Headers>,
    pub credentials: Option<CredentialsMode>,
    pub body: Option<String>,
}

impl FetchOptions {
    /// Shallow merge where every field set on `top` wins.
    /// Header sets are replaced whole, never combined.
    pub fn overlay(self, top: FetchOptions) -> FetchOptions {
        FetchOptions {
            method: top.method.or(self.method),
            headers: top.headers.or(self.headers),
            credentials: top.credentials.or(self.credentials),
            body: top.body.or(self.body),
        }
    }

    /// Layer from the shared proxy defaults
    pub fn from_proxy(proxy: &ProxyConfig) -> Self {
        FetchOptions {
            credentials: proxy.use_credentials.then_some(CredentialsMode::Include),
            headers: proxy.headers.clone(),
            ..Default::default()
        }
    }

    /// Layer from an item's own settings
    pub fn from_item(item: &Item) -> Self {
        FetchOptions {
            credentials: item.use_credentials().map(CredentialsMode::from),
            headers: item.headers().cloned(),
            ..Default::default()
        }
    }
}

/// Options for one call: proxy defaults, then item, then caller
pub fn effective_options(proxy: &ProxyConfig, item: &Item, caller: &FetchOptions) -> FetchOptions {
    FetchOptions::from_proxy(proxy)
        .overlay(FetchOptions::from_item(item))
        .overlay(caller.clone())
}

/// Strip one leading `/`
pub fn normalize_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Join an endpoint with a request path
pub fn target_url(endpoint: &str, path: &str) -> String {
    let path = normalize_path(path);
    if path.is_empty() {
        endpoint.to_string()
    } else {
        format!("{}/{}", endpoint, path)
    }
}

/// Success check for a direct request. Declared success codes replace the 2xx range.
pub fn is_success(status: StatusCode, success_codes: Option<&[u16]>) -> bool {
    match success_codes {
        Some(codes) => codes.contains(&status.as_u16()),
        None => status.is_success(),
    }
}

/// Response payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

/// Dispatcher failures
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("SecretProxy: backend not available ({0} error)")]
    BackendUnavailable(u16),

    #[error("Ping: target not available ({0} error)")]
    TargetUnavailable(u16),

    #[error("invalid gateway address '{0}'")]
    InvalidGateway(String),

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl DispatchError {
    /// Status code carried by the error, if the request got a response
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::BackendUnavailable(status) | DispatchError::TargetUnavailable(status) => {
                Some(*status)
            }
            DispatchError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Fetches resources on behalf of one item
#[derive(Debug, Clone)]
pub struct Dispatcher {
    item: Item,
    proxy: ProxyConfig,
    endpoint: String,
    relay_url: Url,
    plain: Client,
    credentialed: Client,
    jar: Arc<Jar>,
}

impl Dispatcher {
    /// Create a dispatcher sending indirected calls to `gateway`'s default relay path
    pub fn new(item: Item, proxy: ProxyConfig, gateway: &str) -> Result<Self, DispatchError> {
        Self::with_relay_path(item, proxy, gateway, DEFAULT_RELAY_PATH)
    }

    /// Create a dispatcher with an explicit relay path
    pub fn with_relay_path(
        item: Item,
        proxy: ProxyConfig,
        gateway: &str,
        relay_path: &str,
    ) -> Result<Self, DispatchError> {
        let relay_url = Url::parse(gateway)
            .and_then(|base| base.join(relay_path))
            .map_err(|e| DispatchError::InvalidGateway(format!("{}: {}", gateway, e)))?;

        let jar = Arc::new(Jar::default());
        let plain = Client::builder().build()?;
        let credentialed = Client::builder().cookie_provider(jar.clone()).build()?;
        let endpoint = item.endpoint();

        Ok(Self {
            item,
            proxy,
            endpoint,
            relay_url,
            plain,
            credentialed,
            jar,
        })
    }

    /// Cookie jar used for credentialed requests
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Resolved base address of the item
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Relay address for a target URL
    pub fn relay_url_for(&self, target: &str) -> Url {
        let mut url = self.relay_url.clone();
        url.query_pairs_mut()
            .append_pair("service", self.item.service_type().unwrap_or_default())
            .append_pair("url", target);
        url
    }

    /// Fetch `path` relative to the item's endpoint.
    ///
    /// Returns the parsed JSON body when `wants_json` is set, else the raw text.
    pub async fn fetch_resource(
        &self,
        path: &str,
        caller_options: &FetchOptions,
        wants_json: bool,
    ) -> Result<Payload, DispatchError> {
        let options = effective_options(&self.proxy, &self.item, caller_options);
        let target = target_url(&self.endpoint, path);
        let headers = header_map(options.headers.as_ref())?;

        let response = if self.item.needs_indirection() {
            let url = self.relay_url_for(&target);
            debug!(item = %self.item.label(), target = %target, "Dispatching through gateway relay");

            // The relay only serves GET; method and body are not carried.
            let client = self.client_for(options.credentials, true);
            let response = client.get(url).headers(headers).send().await?;
            if !response.status().is_success() {
                return Err(DispatchError::BackendUnavailable(response.status().as_u16()));
            }
            response
        } else {
            debug!(item = %self.item.label(), target = %target, "Dispatching directly");

            let same_origin = Url::parse(&target)
                .map(|t| t.origin() == self.relay_url.origin())
                .unwrap_or(false);
            let client = self.client_for(options.credentials, same_origin);
            let method = options.method.unwrap_or(Method::GET);
            let mut request = client.request(method, &target).headers(headers);
            if let Some(body) = options.body {
                request = request.body(body);
            }

            let response = request.send().await?;
            if !is_success(response.status(), self.item.success_codes()) {
                return Err(DispatchError::TargetUnavailable(response.status().as_u16()));
            }
            response
        };

        if wants_json {
            Ok(Payload::Json(response.json().await?))
        } else {
            Ok(Payload::Text(response.text().await?))
        }
    }

    /// Unset credentials follow the same-origin rule
    fn client_for(&self, credentials: Option<CredentialsMode>, same_origin: bool) -> &Client {
        match credentials {
            Some(CredentialsMode::Include) => &self.credentialed,
            Some(CredentialsMode::Omit) => &self.plain,
            None if same_origin => &self.credentialed,
            None => &self.plain,
        }
    }
}

fn header_map(headers: Option<&Headers>) -> Result<HeaderMap, DispatchError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.into_iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DispatchError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| DispatchError::InvalidHeader(name.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}
