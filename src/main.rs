//! Secret Gateway - CLI Application
//!
//! A credential-shielding HTTP gateway with:
//! - A relay endpoint forwarding to the secret-resolution backend
//! - Configuration via TOML and environment variables
//! - Dashboard tooling to classify items and dispatch fetches

use clap::{Parser, Subcommand};
use secret_gateway::{
    config::GatewayConfig, dispatcher::Dispatcher, item::DashboardConfig, server, FetchOptions,
    Payload,
};
use tracing_subscriber::EnvFilter;

/// Secret Gateway - keeps service credentials out of the browser
#[derive(Parser)]
#[command(name = "secret-gateway")]
#[command(version, about = "A credential-shielding HTTP gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Configuration file path (defaults and environment only when omitted)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Validate the configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
    /// Report which dashboard items are routed through the gateway
    Classify {
        /// Dashboard file path
        #[arg(short, long, default_value = "dashboard.toml")]
        dashboard: String,
    },
    /// Fetch a resource for a dashboard item
    Fetch {
        /// Dashboard file path
        #[arg(short, long, default_value = "dashboard.toml")]
        dashboard: String,
        /// Item name, service type or url
        #[arg(short, long)]
        item: String,
        /// Path relative to the item's endpoint
        #[arg(short, long, default_value = "")]
        path: String,
        /// Print the raw body instead of parsed JSON
        #[arg(long)]
        text: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(config.as_deref()).await?,
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
        Commands::Classify { dashboard } => classify_items(&dashboard)?,
        Commands::Fetch {
            dashboard,
            item,
            path,
            text,
        } => fetch_item(&dashboard, &item, &path, !text).await?,
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Start the gateway server
async fn start_server(config_path: Option<&str>) -> anyhow::Result<()> {
    init_logging();

    let config = GatewayConfig::load(config_path)?;
    match config_path {
        Some(path) => tracing::info!("Loaded configuration from {}", path),
        None => tracing::info!("Using default configuration"),
    }

    server::serve(config).await
}

/// Validate configuration file
fn validate_config(config_path: &str) -> anyhow::Result<()> {
    match GatewayConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}", config.server_addr());
            println!("Relay: {}", config.relay.path);
            println!("Backend: {}", config.backend.proxy_endpoint());
            match config.server.timeout {
                Some(timeout) => println!("Upstream timeout: {}s", timeout),
                None => println!("Upstream timeout: transport default"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &str) -> anyhow::Result<()> {
    let sample_config = r#"# Secret Gateway Configuration
# PORT, HOST and API_BACKEND_URL environment variables override these values.

[server]
host = "0.0.0.0"
port = 8080
# timeout = 30  # upstream timeout in seconds; unset uses transport defaults

[backend]
url = "http://homer-api-backend:8001"
proxy_path = "/api-proxy/"

[relay]
path = "/server"

[metrics]
enabled = true
path = "/metrics"

[health]
enabled = true
path = "/health"
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path);
    Ok(())
}

/// Print the routing decision for each item
fn classify_items(dashboard_path: &str) -> anyhow::Result<()> {
    let dashboard = DashboardConfig::from_file(dashboard_path)?;

    println!("Items: {}", dashboard.items.len());
    for item in &dashboard.items {
        let route = if item.needs_indirection() {
            "gateway"
        } else {
            "direct"
        };
        println!("  {} → {} ({})", item.label(), route, item.endpoint());
    }
    Ok(())
}

/// Fetch one resource the way a dashboard widget would
async fn fetch_item(
    dashboard_path: &str,
    key: &str,
    path: &str,
    wants_json: bool,
) -> anyhow::Result<()> {
    let dashboard = DashboardConfig::from_file(dashboard_path)?;
    let item = dashboard
        .find_item(key)
        .ok_or_else(|| anyhow::anyhow!("No item named '{}' in {}", key, dashboard_path))?;

    let dispatcher = Dispatcher::new(item.clone(), dashboard.proxy.clone(), &dashboard.gateway)?;
    match dispatcher
        .fetch_resource(path, &FetchOptions::default(), wants_json)
        .await?
    {
        Payload::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Payload::Text(text) => println!("{}", text),
    }
    Ok(())
}
