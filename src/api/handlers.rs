use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let api = state.settings().api();
    let response = RootResponse {
        message: format!("{} API", api.project_name),
        version: api.version.clone(),
        docs_url: format!("{}/sessions", api.api_v1_str),
    };

    Json(response)
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let live = state.registry().len();
    let capacity = state.settings().delivery().max_concurrent_sessions;

    let mut components = HashMap::new();
    components.insert("sessions".to_string(), format!("{live}/{capacity}"));
    components
        .insert("assessment_api".to_string(), state.settings().assessment().base_url.clone());

    let status = if (live as u64) < capacity { "healthy" } else { "degraded" };

    Json(HealthResponse {
        service: "picrete-delivery".to_string(),
        status: status.to_string(),
        components,
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
