//! Dashboard item configuration
//!
//! An [`Item`] keeps the raw configuration tree it was loaded from, so the
//! classifier sees every key (including ones this crate does not model),
//! alongside typed views of the fields the dispatcher uses.

use crate::classifier::needs_indirection;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Header name to value mapping
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemFields {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient_headers")]
    headers: Option<Headers>,
    #[serde(default, deserialize_with = "lenient_bool")]
    use_credentials: Option<bool>,
    #[serde(default, deserialize_with = "lenient_codes")]
    success_codes: Option<Vec<u16>>,
    #[serde(default, rename = "type")]
    service_type: Option<String>,
    #[serde(default, rename = "api-backend-secret", deserialize_with = "lenient_bool")]
    api_backend_secret: Option<bool>,
}

/// Header maps accept scalar values as text. Nulls and nested values are dropped;
/// anything other than a map reads as no headers.
fn lenient_headers<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Headers>, D::Error> {
    let headers = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(name, value)| scalar_text(value).map(|text| (name, text)))
            .collect(),
        _ => return Ok(None),
    };
    Ok(Some(headers))
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Status code lists keep their valid entries; a non-list reads as unset
fn lenient_codes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u16>>, D::Error> {
    let codes = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|code| u16::try_from(code).ok())
            .collect(),
        _ => return Ok(None),
    };
    Ok(Some(codes))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| value.as_bool()))
}

/// One dashboard entry
#[derive(Debug, Clone)]
pub struct Item {
    raw: Value,
    fields: ItemFields,
}

impl Item {
    /// Build an item from its raw configuration tree
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let fields = ItemFields::deserialize(&raw)?;
        Ok(Self { raw, fields })
    }

    /// The full configuration tree as loaded
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.name.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.fields.url.as_deref()
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.fields.headers.as_ref()
    }

    pub fn use_credentials(&self) -> Option<bool> {
        self.fields.use_credentials
    }

    pub fn success_codes(&self) -> Option<&[u16]> {
        self.fields.success_codes.as_deref()
    }

    /// Service identifier forwarded to the backend
    pub fn service_type(&self) -> Option<&str> {
        self.fields.service_type.as_deref()
    }

    /// The `api-backend-secret` flag. Informational: routing is decided by
    /// [`Item::needs_indirection`].
    pub fn api_backend_secret(&self) -> bool {
        self.fields.api_backend_secret.unwrap_or(false)
    }

    /// Base address for requests: `endpoint` if set, else `url`, with one
    /// trailing `/` removed.
    pub fn endpoint(&self) -> String {
        let base = self
            .fields
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .or(self.fields.url.as_deref())
            .unwrap_or_default();
        base.strip_suffix('/').unwrap_or(base).to_string()
    }

    /// Whether any value of this item's configuration carries the secret marker
    pub fn needs_indirection(&self) -> bool {
        needs_indirection(&self.raw)
    }

    /// Name used in logs and CLI output
    pub fn label(&self) -> String {
        self.name()
            .or(self.service_type())
            .or(self.url())
            .unwrap_or("<unnamed>")
            .to_string()
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Item::from_value(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Item {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Defaults shared by all items
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default, deserialize_with = "lenient_headers")]
    pub headers: Option<Headers>,
    #[serde(default)]
    pub use_credentials: bool,
}

fn default_gateway() -> String {
    "http://localhost:8080".to_string()
}

/// Dashboard file: gateway origin, proxy defaults and items
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Origin the gateway relay is served from
    #[serde(default = "default_gateway")]
    pub gateway: String,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl DashboardConfig {
    /// Load a dashboard from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load a dashboard from a TOML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Find an item by name, service type or url
    pub fn find_item(&self, key: &str) -> Option<&Item> {
        self.items.iter().find(|item| {
            item.name() == Some(key) || item.service_type() == Some(key) || item.url() == Some(key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_strips_one_trailing_slash() {
        let item = Item::from_value(json!({"url": "http://a/"})).unwrap();
        assert_eq!(item.endpoint(), "http://a");

        let item = Item::from_value(json!({"url": "http://a"})).unwrap();
        assert_eq!(item.endpoint(), "http://a");

        let item = Item::from_value(json!({"url": "http://a//"})).unwrap();
        assert_eq!(item.endpoint(), "http://a/");
    }

    #[test]
    fn test_endpoint_overrides_url() {
        let item = Item::from_value(json!({
            "url": "http://ui.lan/",
            "endpoint": "http://api.lan:9000/"
        }))
        .unwrap();
        assert_eq!(item.endpoint(), "http://api.lan:9000");
    }

    #[test]
    fn test_typed_fields() {
        let item = Item::from_value(json!({
            "name": "Sonarr",
            "type": "Sonarr",
            "url": "http://sonarr.lan",
            "useCredentials": false,
            "successCodes": [200, 201],
            "headers": {"X-Api-Key": "secret://sonarr:apikey"},
            "api-backend-secret": true
        }))
        .unwrap();

        assert_eq!(item.name(), Some("Sonarr"));
        assert_eq!(item.service_type(), Some("Sonarr"));
        assert_eq!(item.use_credentials(), Some(false));
        assert_eq!(item.success_codes(), Some(&[200, 201][..]));
        assert_eq!(
            item.headers().and_then(|h| h.get("X-Api-Key")).map(String::as_str),
            Some("secret://sonarr:apikey")
        );
        assert!(item.api_backend_secret());
        assert!(item.needs_indirection());
    }

    #[test]
    fn test_null_headers_are_absent() {
        let item = Item::from_value(json!({"url": "http://a", "headers": null})).unwrap();
        assert!(item.headers().is_none());
    }

    #[test]
    fn test_scalar_header_values_read_as_text() {
        let item = Item::from_value(json!({
            "url": "http://a",
            "headers": {"X-Count": 1, "X-On": true, "X-Name": "n", "X-Nested": {"a": 1}}
        }))
        .unwrap();
        let headers = item.headers().unwrap();
        assert_eq!(headers.get("X-Count").map(String::as_str), Some("1"));
        assert_eq!(headers.get("X-On").map(String::as_str), Some("true"));
        assert_eq!(headers.get("X-Name").map(String::as_str), Some("n"));
        assert!(headers.get("X-Nested").is_none());
    }

    #[test]
    fn test_malformed_optional_fields_are_unset() {
        let item = Item::from_value(json!({
            "url": "http://a",
            "successCodes": 200,
            "useCredentials": "yes",
            "headers": "secret://x"
        }))
        .unwrap();
        assert!(item.success_codes().is_none());
        assert!(item.use_credentials().is_none());
        assert!(item.headers().is_none());
        // The raw tree is still classified in full
        assert!(item.needs_indirection());

        let item = Item::from_value(json!({"url": "http://a", "successCodes": [200, "x", 70000]})).unwrap();
        assert_eq!(item.success_codes(), Some(&[200][..]));
    }

    #[test]
    fn test_dashboard_tolerates_loose_item_fields() {
        let toml = r#"
[proxy]
headers = { X-Retries = 3 }

[[items]]
name = "Glances"
url = "http://glances.lan"
successCodes = 200
headers = { X-Count = 1 }
"#;
        let dashboard = DashboardConfig::parse(toml).unwrap();
        assert_eq!(
            dashboard.proxy.headers.as_ref().unwrap().get("X-Retries").map(String::as_str),
            Some("3")
        );
        let glances = dashboard.find_item("Glances").unwrap();
        assert!(glances.success_codes().is_none());
        assert_eq!(
            glances.headers().and_then(|h| h.get("X-Count")).map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn test_unmodelled_keys_are_classified() {
        let item = Item::from_value(json!({
            "url": "http://a",
            "custom": {"nested": ["secret://x"]}
        }))
        .unwrap();
        assert!(item.needs_indirection());
    }

    #[test]
    fn test_parse_dashboard() {
        let toml = r#"
gateway = "http://dashboard.lan:8080"

[proxy]
useCredentials = true
headers = { Accept = "application/json" }

[[items]]
name = "Pi-hole"
type = "PiHole"
url = "http://pihole.lan/admin/"
successCodes = [200]

[[items]]
name = "Sonarr"
type = "Sonarr"
url = "http://sonarr.lan"
headers = { X-Api-Key = "secret://sonarr:apikey" }
"#;

        let dashboard = DashboardConfig::parse(toml).unwrap();
        assert_eq!(dashboard.gateway, "http://dashboard.lan:8080");
        assert!(dashboard.proxy.use_credentials);
        assert_eq!(dashboard.items.len(), 2);

        let pihole = dashboard.find_item("Pi-hole").unwrap();
        assert_eq!(pihole.endpoint(), "http://pihole.lan/admin");
        assert!(!pihole.needs_indirection());

        let sonarr = dashboard.find_item("Sonarr").unwrap();
        assert!(sonarr.needs_indirection());
        assert!(dashboard.find_item("missing").is_none());
    }

    #[test]
    fn test_dashboard_defaults() {
        let dashboard = DashboardConfig::parse("").unwrap();
        assert_eq!(dashboard.gateway, "http://localhost:8080");
        assert_eq!(dashboard.proxy, ProxyConfig::default());
        assert!(dashboard.items.is_empty());
    }
}
