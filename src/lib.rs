//! Secret Gateway - a credential-shielding HTTP gateway
//!
//! Lets a browser-side dashboard query services whose configuration embeds
//! secret material without ever exposing that material to the browser:
//! - Indirection classification of item configuration (`secret://` marker)
//! - Request dispatch with proxy/item/caller option layering
//! - A relay endpoint that forwards to the secret-resolution backend
//! - Prometheus metrics and health checks

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod item;
pub mod metrics;
pub mod relay;
pub mod server;

pub use config::GatewayConfig;
pub use dispatcher::{Dispatcher, FetchOptions, Payload};
pub use item::{DashboardConfig, Item, ProxyConfig};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
