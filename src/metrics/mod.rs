//! Metrics module for Prometheus
//!
//! This module provides metrics collection for the relay:
//! - Relay call count by status and outcome
//! - Relay latency histogram by outcome

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    relay_counter: CounterVec,
    relay_latency: HistogramVec,
    total_relayed: Arc<AtomicU64>,
    total_gateway_errors: Arc<AtomicU64>,
}

impl GatewayMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let relay_counter = CounterVec::new(
            Opts::new("gateway_relay_requests_total", "Total number of relay calls"),
            &["status", "outcome"],
        )
        .expect("Failed to create relay counter");

        let relay_latency = HistogramVec::new(
            HistogramOpts::new("gateway_relay_latency_seconds", "Relay latency in seconds")
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
            &["outcome"],
        )
        .expect("Failed to create latency histogram");

        registry
            .register(Box::new(relay_counter.clone()))
            .expect("Failed to register relay counter");
        registry
            .register(Box::new(relay_latency.clone()))
            .expect("Failed to register latency histogram");

        Self {
            registry,
            relay_counter,
            relay_latency,
            total_relayed: Arc::new(AtomicU64::new(0)),
            total_gateway_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one relay call. `outcome` is `relayed`, `rejected` or `gateway_error`.
    /// Labels are bounded; the caller-supplied service name is never one.
    pub fn record_relay(&self, status: u16, outcome: &str, latency: Duration) {
        let status_str = status.to_string();

        self.relay_counter
            .with_label_values(&[&status_str, outcome])
            .inc();
        self.relay_latency
            .with_label_values(&[outcome])
            .observe(latency.as_secs_f64());

        match outcome {
            "relayed" => self.total_relayed.fetch_add(1, Ordering::Relaxed),
            "gateway_error" => self.total_gateway_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Get the Prometheus metrics output
    pub fn prometheus_output(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Calls that reached the backend and got an answer
    pub fn total_relayed(&self) -> u64 {
        self.total_relayed.load(Ordering::Relaxed)
    }

    /// Calls that failed at the gateway level
    pub fn total_gateway_errors(&self) -> u64 {
        self.total_gateway_errors.load(Ordering::Relaxed)
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
