use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("http_requests_total", "HTTP requests served by status");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    metrics::describe_counter!(
        "delivery_sessions_opened_total",
        "Sessions opened, labelled fresh/resumed/completed"
    );
    metrics::describe_counter!("delivery_submits_total", "Submit attempts by reason and outcome");
    metrics::describe_counter!(
        "delivery_progress_saves_total",
        "Progress saves by trigger and outcome"
    );
    metrics::describe_counter!("proctoring_events_total", "Proctoring events logged by type");
    metrics::describe_counter!("delivery_sessions_blocked_total", "Sessions moved into blocked");
    metrics::describe_counter!(
        "delivery_sessions_pruned_total",
        "Completed sessions evicted from the registry"
    );
}
