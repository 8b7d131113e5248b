//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction broadcasting
//! - Gas gate decisions and sampled fees
//! - Swaps and conversions
//! - Wallet balances

use crate::error::{ArbError, ArbResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "pulse_arb_transactions_submitted_total",
        "Total signed transactions accepted by the node",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "pulse_arb_transactions_confirmed_total",
        "Total transactions confirmed with success status",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "pulse_arb_transactions_failed_total",
        "Total broadcasts that ended without a confirmation",
        &["reason"]
    ).unwrap();

    // Gas metrics
    pub static ref RAPID_FEE: GaugeVec = register_gauge_vec!(
        "pulse_arb_rapid_fee_gwei",
        "Last live rapid-tier fee sample in gwei",
        &[]
    ).unwrap();

    pub static ref GAS_GATE_SKIPS: CounterVec = register_counter_vec!(
        "pulse_arb_gas_gate_skips_total",
        "Operations skipped because fees exceeded the ceiling",
        &["operation"]
    ).unwrap();

    // Trading metrics
    pub static ref SWAPS: CounterVec = register_counter_vec!(
        "pulse_arb_swaps_total",
        "Swaps broadcast by direction and result",
        &["direction", "result"]
    ).unwrap();

    pub static ref CONVERSIONS: CounterVec = register_counter_vec!(
        "pulse_arb_conversion_units_total",
        "Conversion units completed per route",
        &["route"]
    ).unwrap();

    // Wallet metrics
    pub static ref NATIVE_BALANCE: GaugeVec = register_gauge_vec!(
        "pulse_arb_native_balance",
        "Native balance per wallet",
        &["wallet"]
    ).unwrap();

    pub static ref TICKS: CounterVec = register_counter_vec!(
        "pulse_arb_ticks_total",
        "Completed control loop iterations per role",
        &["role"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ArbResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ArbError::Internal(format!("Failed to bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ArbError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health_handler() -> &'static str {
    "ok"
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_confirmed() {
    TX_CONFIRMED.with_label_values(&[]).inc();
}

pub fn record_tx_failed(reason: &str) {
    TX_FAILED.with_label_values(&[reason]).inc();
}

pub fn record_rapid_fee(gwei: f64) {
    RAPID_FEE.with_label_values(&[]).set(gwei);
}

pub fn record_gas_gate_skip(operation: &str) {
    GAS_GATE_SKIPS.with_label_values(&[operation]).inc();
}

pub fn record_swap(direction: &str, confirmed: bool) {
    let result = if confirmed { "confirmed" } else { "failed" };
    SWAPS.with_label_values(&[direction, result]).inc();
}

pub fn record_conversion(route: &str, units: u64) {
    CONVERSIONS.with_label_values(&[route]).inc_by(units as f64);
}

pub fn record_native_balance(wallet: &str, balance: f64) {
    NATIVE_BALANCE.with_label_values(&[wallet]).set(balance);
}

pub fn record_tick(role: &str) {
    TICKS.with_label_values(&[role]).inc();
}
