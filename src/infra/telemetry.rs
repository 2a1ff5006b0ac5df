use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "stash_read_hit_total",
            Unit::Count,
            "Total number of cache reads answered with a value, by source."
        );
        describe_counter!(
            "stash_read_miss_total",
            Unit::Count,
            "Total number of cache reads that found nothing, by source."
        );
        describe_counter!(
            "stash_queue_rejected_total",
            Unit::Count,
            "Total number of inserts refused because the key was already queued."
        );
        describe_histogram!(
            "stash_flush_ms",
            Unit::Milliseconds,
            "Latency of flushing one unit of work in milliseconds."
        );
        describe_counter!(
            "stash_pruned_total",
            Unit::Count,
            "Total number of expired entries removed by prune passes."
        );
        describe_counter!(
            "stash_mirror_failure_total",
            Unit::Count,
            "Total number of failed static mirror operations, by operation."
        );
    });
}
