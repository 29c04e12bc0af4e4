use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CandidateToken;
use crate::api::validation::validate_identifier;
use crate::core::state::AppState;
use crate::schemas::delivery::SessionStatus;
use crate::schemas::session::{
    AnswerRequest, AnswerResponse, OpenSessionResponse, SaveResponse, SessionView, SignalRequest,
    SignalResponse, SubmitReason, SubmitResponse,
};
use crate::services::assessment_client::CandidateCredential;
use crate::services::session_controller::SessionController;

pub(super) async fn open_session(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
) -> Result<Json<OpenSessionResponse>, ApiError> {
    validate_identifier(&test_id, "test id")?;
    let opened = state.registry().open(&test_id, &credential).await?;

    Ok(Json(OpenSessionResponse {
        session: opened.controller.snapshot(),
        request_fullscreen: opened.request_fullscreen,
    }))
}

pub(super) async fn get_session(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
) -> Result<Json<SessionView>, ApiError> {
    let controller = live_session(&state, &test_id, &credential)?;
    Ok(Json(controller.snapshot()))
}

pub(super) async fn record_answer(
    Path((test_id, question_id)): Path<(String, String)>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    validate_identifier(&question_id, "question id")?;
    let Json(payload) = payload.map_err(bad_body)?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let controller = live_session(&state, &test_id, &credential)?;
    let ack = controller.record_answer(&question_id, payload.value)?;
    Ok(Json(ack))
}

pub(super) async fn report_signal(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
    payload: Result<Json<SignalRequest>, JsonRejection>,
) -> Result<Json<SignalResponse>, ApiError> {
    let Json(payload) = payload.map_err(bad_body)?;
    let controller = live_session(&state, &test_id, &credential)?;
    Ok(Json(controller.handle_signal(payload.signal).await))
}

pub(super) async fn submit_session(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let controller = live_session(&state, &test_id, &credential)?;
    let submission = controller.submit(SubmitReason::Manual).await?;

    Ok(Json(SubmitResponse {
        status: SessionStatus::Completed,
        receipt: submission.receipt,
        release_fullscreen: submission.release_fullscreen,
    }))
}

pub(super) async fn unload_session(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
) -> Result<Json<SaveResponse>, ApiError> {
    let controller = live_session(&state, &test_id, &credential)?;
    let outcome = controller.unload().await;
    Ok(Json(SaveResponse { outcome: outcome.as_str() }))
}

pub(super) async fn close_session(
    Path(test_id): Path<String>,
    CandidateToken(credential): CandidateToken,
    State(state): State<AppState>,
) -> Result<Json<SaveResponse>, ApiError> {
    validate_identifier(&test_id, "test id")?;
    let outcome = state
        .registry()
        .teardown(&test_id, &credential)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(SaveResponse { outcome: outcome.as_str() }))
}

fn live_session(
    state: &AppState,
    test_id: &str,
    credential: &CandidateCredential,
) -> Result<Arc<SessionController>, ApiError> {
    validate_identifier(test_id, "test id")?;
    state
        .registry()
        .get(test_id, credential)
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}
