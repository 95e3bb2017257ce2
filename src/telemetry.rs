//! Logging setup, metric names and one-time metric descriptions.
//!
//! The binary is a batch job, so no exporter is installed by default; the counters
//! go through the `metrics` facade and are picked up by whatever recorder the
//! embedding process installs.

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

pub const DECISIONS_TOTAL: &str = "moderation_decisions_total";
pub const CLASSIFIER_CALLS_TOTAL: &str = "classifier_calls_total";
pub const CLASSIFIER_ERRORS_TOTAL: &str = "classifier_errors_total";
pub const CLASSIFIER_CACHE_HITS_TOTAL: &str = "classifier_cache_hits_total";
pub const BATCH_DURATION_MS: &str = "batch_duration_ms";

/// One-time metrics registration (so series carry help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(DECISIONS_TOTAL, "Moderation decisions, labelled by reason.");
        describe_counter!(
            CLASSIFIER_CALLS_TOTAL,
            "Semantic classifier invocations, labelled by provider."
        );
        describe_counter!(
            CLASSIFIER_ERRORS_TOTAL,
            "Classifier calls that fell back to the failure default."
        );
        describe_counter!(
            CLASSIFIER_CACHE_HITS_TOTAL,
            "Classifier answers served from the response cache."
        );
        describe_histogram!(BATCH_DURATION_MS, "Wall time of one batch run in milliseconds.");
    });
}

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG` when set, else `policyguard=info,warn`
/// (`policyguard=debug,info` with `verbose`). `json` switches to one JSON object per line.
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fallback = if verbose {
        "policyguard=debug,info"
    } else {
        "policyguard=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: tests and embedders may already have a subscriber installed
    let _ = if json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(false))
            .try_init()
    };
}
