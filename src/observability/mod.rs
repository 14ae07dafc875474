// src/observability/mod.rs
//! Tracing and metrics initialisation
//!
//! - `RUST_LOG` selects the log filter (default `info`)
//! - `SCRIPTHOST_LOG_FORMAT=json` switches to JSON log lines
//! - metrics are recorded into a Prometheus recorder whose handle renders
//!   the text exposition format

use crate::utils::errors::{Result, ScriptError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "SCRIPTHOST_LOG_FORMAT";

fn json_output(format: Option<&str>) -> bool {
    format
        .map(|f| f.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var(LOG_FORMAT_ENV).ok();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json_output(format.as_deref()) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ScriptError::ConfigError(format!("tracing subscriber: {}", e)))
}

/// Install the global Prometheus recorder and describe the host metrics
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ScriptError::ConfigError(format!("metrics recorder: {}", e)))?;

    metrics::describe_counter!("scripthost_pool_claims_total", "Contexts claimed from the pool");
    metrics::describe_counter!(
        "scripthost_pool_claim_timeouts_total",
        "Claims that gave up waiting for a context"
    );
    metrics::describe_gauge!("scripthost_contexts_in_use", "Contexts currently claimed");
    metrics::describe_counter!("scripthost_cache_hits_total", "Resolution cache hits");
    metrics::describe_counter!("scripthost_cache_misses_total", "Resolution cache misses");
    metrics::describe_counter!(
        "scripthost_cache_evictions_total",
        "Entries evicted to stay within capacity"
    );
    metrics::describe_counter!("scripthost_setups_total", "Module and service setups run");
    metrics::describe_counter!(
        "scripthost_privileged_grants_total",
        "Setup ids granted privileged access"
    );
    metrics::describe_counter!("scripthost_reloads_total", "Runtime reloads by result");

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_output_selection() {
        assert!(json_output(Some("json")));
        assert!(json_output(Some(" JSON ")));
        assert!(!json_output(Some("pretty")));
        assert!(!json_output(None));
    }
}
