//! Secure aggregation metrics (OpenTelemetry instruments on the `secagg` meter).

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

pub struct SecAggMetrics {
    pub contributions_accepted: Counter<u64>,
    pub contributions_rejected: Counter<u64>,
    pub rounds_completed: Counter<u64>,
    pub rounds_aborted: Counter<u64>,
    pub round_participants: Counter<u64>,
    pub aggregation_latency_ms: Histogram<f64>,
}

static SECAGG_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("secagg"));

pub static SECAGG_METRICS: Lazy<SecAggMetrics> = Lazy::new(|| SecAggMetrics {
    contributions_accepted: SECAGG_METER.u64_counter("secagg_contributions_accepted_total").with_description("Contributions appended to a round buffer").build(),
    contributions_rejected: SECAGG_METER.u64_counter("secagg_contributions_rejected_total").with_description("Contributions rejected, labelled by reason").build(),
    rounds_completed: SECAGG_METER.u64_counter("secagg_rounds_completed_total").with_description("Rounds aggregated and applied to the global model").build(),
    rounds_aborted: SECAGG_METER.u64_counter("secagg_rounds_aborted_total").with_description("Rounds discarded before reaching the model").build(),
    round_participants: SECAGG_METER.u64_counter("secagg_round_participants_total").with_description("Contributors across all completed rounds").build(),
    aggregation_latency_ms: SECAGG_METER.f64_histogram("secagg_aggregation_latency_ms").with_description("Fold + decrypt latency ms").with_unit("ms").build(),
});

pub(crate) fn record_rejection(reason: &'static str) {
    SECAGG_METRICS.contributions_rejected.add(1, &[KeyValue::new("reason", reason)]);
}
