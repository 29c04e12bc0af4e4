pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, shutdown::StopSignal, state::AppState, telemetry};
use crate::services::assessment_client::HttpAssessmentClient;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let backend = HttpAssessmentClient::from_settings(&settings)?;
    let state = AppState::new(settings, Arc::new(backend));

    let background = StopSignal::new();
    let tasks = tasks::scheduler::spawn(&state, background.subscribe());

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        assessment_api = %state.settings().assessment().base_url,
        "Picrete delivery gateway listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    background.trigger();
    for handle in tasks {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    let closed = state.registry().shutdown_all().await;
    tracing::info!(closed, "Delivery sessions torn down");

    result?;

    Ok(())
}
