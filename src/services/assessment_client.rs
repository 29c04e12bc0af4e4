use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::delivery::{
    Answers, DeliverableTest, LogEventRequest, LogVerdict, ProctoringEventKind,
    ProctoringSettings, RemoteSessionState, SaveProgressRequest, SubmitAttemptRequest,
    SubmitOutcome,
};

/// Candidate bearer token, forwarded verbatim to the assessment service.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct CandidateCredential(String);

impl CandidateCredential {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CandidateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CandidateCredential(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub(crate) enum BackendError {
    #[error("assessment service unreachable: {0}")]
    Transport(String),
    #[error("assessment service returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("assessment service rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected assessment service payload: {0}")]
    Decode(String),
}

impl BackendError {
    /// Message safe to show to the candidate.
    pub(crate) fn user_message(&self) -> String {
        match self {
            Self::Rejected(message) | Self::Status { message, .. } if !message.is_empty() => {
                message.clone()
            }
            Self::Transport(_) => "Assessment service is unreachable. Please try again.".into(),
            _ => "Assessment service returned an unexpected response.".into(),
        }
    }
}

/// Remote collaborator that owns tests, saved progress, grading and the proctoring log.
#[async_trait]
pub(crate) trait AssessmentBackend: Send + Sync {
    async fn session_status(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<RemoteSessionState, BackendError>;

    async fn deliverable_test(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<DeliverableTest, BackendError>;

    async fn proctoring_settings(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<ProctoringSettings, BackendError>;

    async fn save_progress(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        answers: &Answers,
        time_remaining: u64,
    ) -> Result<(), BackendError>;

    async fn submit_attempt(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        answers: &Answers,
    ) -> Result<SubmitOutcome, BackendError>;

    async fn log_event(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        event_type: ProctoringEventKind,
        event_data: &Value,
    ) -> Result<LogVerdict, BackendError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpAssessmentClient {
    client: Client,
    base_url: String,
}

impl HttpAssessmentClient {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let assessment = settings.assessment();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(assessment.connect_timeout_seconds))
            .timeout(Duration::from_secs(assessment.request_timeout_seconds))
            .build()
            .context("Failed to build assessment service HTTP client")?;

        Ok(Self { client, base_url: assessment.base_url.trim_end_matches('/').to_string() })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        credential: &CandidateCredential,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &endpoint).bearer_auth(credential.token());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|err| BackendError::Transport(err.to_string()))?;
        let status = response.status();
        let raw_body =
            response.text().await.map_err(|err| BackendError::Transport(err.to_string()))?;

        let parsed = if raw_body.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(&raw_body) {
                Ok(value) => value,
                Err(err) if status.is_success() => {
                    return Err(BackendError::Decode(format!(
                        "non-JSON body from {path} (status {status}): {err}"
                    )));
                }
                Err(_) => Value::Null,
            }
        };

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: extract_message(&parsed).unwrap_or_default(),
            });
        }

        if parsed.get("success").and_then(Value::as_bool).is_some_and(|value| !value) {
            return Err(BackendError::Rejected(extract_message(&parsed).unwrap_or_default()));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl AssessmentBackend for HttpAssessmentClient {
    async fn session_status(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<RemoteSessionState, BackendError> {
        let body =
            self.call(Method::GET, &format!("/tests/{test_id}/session"), credential, None).await?;
        decode(body)
    }

    async fn deliverable_test(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<DeliverableTest, BackendError> {
        let body =
            self.call(Method::GET, &format!("/tests/{test_id}/take"), credential, None).await?;
        decode_field(body, "test")
    }

    async fn proctoring_settings(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
    ) -> Result<ProctoringSettings, BackendError> {
        let body = self
            .call(Method::GET, &format!("/proctoring/settings/{test_id}"), credential, None)
            .await?;
        decode_field(body, "settings")
    }

    async fn save_progress(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        answers: &Answers,
        time_remaining: u64,
    ) -> Result<(), BackendError> {
        let payload = encode(&SaveProgressRequest { answers, time_remaining })?;
        self.call(Method::POST, &format!("/tests/{test_id}/progress"), credential, Some(payload))
            .await?;
        Ok(())
    }

    async fn submit_attempt(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        answers: &Answers,
    ) -> Result<SubmitOutcome, BackendError> {
        let payload = encode(&SubmitAttemptRequest { answers })?;
        let body = self
            .call(Method::POST, &format!("/tests/{test_id}/submit"), credential, Some(payload))
            .await?;
        decode_field(body, "submission")
    }

    async fn log_event(
        &self,
        credential: &CandidateCredential,
        test_id: &str,
        event_type: ProctoringEventKind,
        event_data: &Value,
    ) -> Result<LogVerdict, BackendError> {
        let payload = encode(&LogEventRequest { test_id, event_type, event_data })?;
        let body = self.call(Method::POST, "/proctoring/log", credential, Some(payload)).await?;
        decode(body)
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<Value, BackendError> {
    serde_json::to_value(payload).map_err(|err| BackendError::Decode(err.to_string()))
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, BackendError> {
    serde_json::from_value(body).map_err(|err| BackendError::Decode(err.to_string()))
}

fn decode_field<T: DeserializeOwned>(mut body: Value, field: &str) -> Result<T, BackendError> {
    let value = body
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| BackendError::Decode(format!("missing '{field}' in response")))?;
    decode(value)
}

fn extract_message(body: &Value) -> Option<String> {
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::schemas::delivery::SessionStatus;

    #[derive(Clone, Default)]
    struct Recorded {
        bodies: Arc<Mutex<Vec<Value>>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    fn remember_auth(recorded: &Recorded, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        recorded.auth.lock().unwrap().push(value);
    }

    async fn spawn_remote(recorded: Recorded) -> HttpAssessmentClient {
        let app = Router::new()
            .route(
                "/api/tests/:test_id/session",
                get(|State(recorded): State<Recorded>, headers: HeaderMap| async move {
                    remember_auth(&recorded, &headers);
                    Json(json!({
                        "success": true,
                        "status": "in_progress",
                        "saved_answers": { "q1": "B" },
                        "time_remaining": 42
                    }))
                }),
            )
            .route(
                "/api/tests/:test_id/take",
                get(|Path(test_id): Path<String>| async move {
                    if test_id == "missing" {
                        return (
                            StatusCode::NOT_FOUND,
                            Json(json!({ "success": false, "message": "Test not found" })),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "success": true,
                            "test": { "title": "Quiz", "time_limit": 30, "questions": [] }
                        })),
                    )
                }),
            )
            .route(
                "/api/tests/:test_id/submit",
                post(|State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                    recorded.bodies.lock().unwrap().push(body);
                    Json(json!({ "success": false, "message": "Attempt already graded" }))
                }),
            )
            .route(
                "/api/proctoring/log",
                post(|State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                    recorded.bodies.lock().unwrap().push(body);
                    Json(json!({ "success": true, "flagged": true }))
                }),
            )
            .with_state(recorded);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        HttpAssessmentClient { client: Client::new(), base_url: format!("http://{addr}/api") }
    }

    #[tokio::test]
    async fn session_status_forwards_bearer_and_decodes_resume_payload() {
        let recorded = Recorded::default();
        let client = spawn_remote(recorded.clone()).await;
        let credential = CandidateCredential::new("candidate-token");

        let state = client.session_status(&credential, "t1").await.expect("status");

        assert_eq!(state.status, SessionStatus::InProgress);
        assert_eq!(state.time_remaining, Some(42));
        assert_eq!(state.saved_answers.unwrap()["q1"], json!("B"));
        assert_eq!(recorded.auth.lock().unwrap().as_slice(), ["Bearer candidate-token"]);
    }

    #[tokio::test]
    async fn non_success_status_carries_remote_message() {
        let client = spawn_remote(Recorded::default()).await;
        let credential = CandidateCredential::new("candidate-token");

        let err = client.deliverable_test(&credential, "missing").await.unwrap_err();
        match &err {
            BackendError::Status { status, message } => {
                assert_eq!(*status, 404);
                assert_eq!(message, "Test not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.user_message(), "Test not found");
    }

    #[tokio::test]
    async fn success_false_envelope_is_a_rejection() {
        let recorded = Recorded::default();
        let client = spawn_remote(recorded.clone()).await;
        let credential = CandidateCredential::new("candidate-token");
        let answers = Answers::from([("q1".to_string(), json!("B"))]);

        let err = client.submit_attempt(&credential, "t1", &answers).await.unwrap_err();

        assert!(matches!(err, BackendError::Rejected(ref message) if message == "Attempt already graded"));
        assert_eq!(recorded.bodies.lock().unwrap()[0], json!({ "answers": { "q1": "B" } }));
    }

    #[tokio::test]
    async fn log_event_sends_wire_names_and_reads_verdict() {
        let recorded = Recorded::default();
        let client = spawn_remote(recorded.clone()).await;
        let credential = CandidateCredential::new("candidate-token");

        let verdict = client
            .log_event(&credential, "t1", ProctoringEventKind::TabSwitch, &json!({ "count": 1 }))
            .await
            .expect("verdict");

        assert!(verdict.flagged);
        assert_eq!(
            recorded.bodies.lock().unwrap()[0],
            json!({ "test_id": "t1", "event_type": "tab_switch", "event_data": { "count": 1 } })
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let client = HttpAssessmentClient {
            client: Client::new(),
            base_url: "http://127.0.0.1:9/api".to_string(),
        };
        let err = client
            .proctoring_settings(&CandidateCredential::new("token"), "t1")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = CandidateCredential::new("secret-token");
        assert!(!format!("{credential:?}").contains("secret-token"));
    }
}
