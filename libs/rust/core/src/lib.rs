//! Core library for the secure aggregation coordinator.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static PROM_INIT: OnceCell<(SdkMeterProvider, Registry)> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }

fn json_logs_enabled() -> bool {
    std::env::var("SECAGG_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json_logs_enabled() {
            registry.with(tracing_subscriber::fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false)).try_init()?;
        } else {
            registry.with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(target: "secagg", service, "tracing initialized");
    Ok(())
}

/// Installs the Prometheus exporter as the global meter provider. The exporter
/// writes into a registry owned by this crate, which `/metrics` serves.
pub fn init_metrics() -> Result<()> {
    PROM_INIT.get_or_try_init(|| -> Result<(SdkMeterProvider, Registry)> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        opentelemetry::global::set_meter_provider(provider.clone());
        Ok((provider, registry))
    })?;
    Ok(())
}

/// Text exposition of everything recorded since [`init_metrics`].
pub fn render_metrics() -> Result<String> {
    let Some((_, registry)) = PROM_INIT.get() else { anyhow::bail!("metrics not initialized") };
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// `/live`, `/ready` and `/metrics`, to be merged into a service router.
pub fn health_router<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> axum::response::Response {
    if PROM_INIT.get().is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response();
    }
    match render_metrics() {
        Ok(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response(),
    }
}

pub mod config;
pub mod crypto_he;
pub mod error;
pub mod federated_learning;
pub mod metrics;

pub use config::{load_config, CoordinatorConfig, ParameterConfig};
pub use crypto_he::{AdditiveHomomorphic, MaskedCiphertext, MaskedSumScheme};
pub use error::{HeError, ModelError, SecureAggError};
pub use federated_learning::{
    Accepted, AggregateResult, AggregationCoordinator, AppliedRound, Contribution, GlobalModelStore, InMemoryModel,
    ModelSnapshot, ParameterSchema, RoundController, RoundId, RoundState, RoundStatus, RoundSummary,
};
pub use metrics::{SecAggMetrics, SECAGG_METRICS};
