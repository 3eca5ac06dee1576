use std::sync::Once;

use metrics::{Unit, describe_counter};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "marginalia_shared_cache_hit_total",
            Unit::Count,
            "Total number of shared discussion cache hits."
        );
        describe_counter!(
            "marginalia_shared_cache_miss_total",
            Unit::Count,
            "Total number of shared discussion cache misses."
        );
        describe_counter!(
            "marginalia_user_cache_hit_total",
            Unit::Count,
            "Total number of per-user reaction cache hits."
        );
        describe_counter!(
            "marginalia_user_cache_miss_total",
            Unit::Count,
            "Total number of per-user reaction cache misses."
        );
        describe_counter!(
            "marginalia_remote_request_total",
            Unit::Count,
            "Total number of requests sent to the discussion API, by operation."
        );
        describe_counter!(
            "marginalia_remote_failure_total",
            Unit::Count,
            "Total number of absorbed discussion API failures, by operation and kind."
        );
        describe_counter!(
            "marginalia_inflight_joined_total",
            Unit::Count,
            "Total number of reads that joined an in-flight fetch."
        );
        describe_counter!(
            "marginalia_batch_flush_total",
            Unit::Count,
            "Total number of fetch batch flushes, by mode."
        );
        describe_counter!(
            "marginalia_cache_patch_total",
            Unit::Count,
            "Total number of in-place reaction count patches, by outcome."
        );
    });
}
