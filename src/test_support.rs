use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::schemas::delivery::{
    Answers, DeliverableTest, LogVerdict, ProctoringEventKind, ProctoringSettings, Question,
    QuestionType, RemoteSessionState, SessionStatus, SubmitOutcome,
};
use crate::services::assessment_client::{AssessmentBackend, BackendError, CandidateCredential};
use crate::services::session_controller::SessionTiming;

pub(crate) const TEST_ID: &str = "test-1";
pub(crate) const CANDIDATE_TOKEN: &str = "candidate-token";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) backend: Arc<FakeBackend>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("PICRETE_ENV", "test");
    std::env::set_var("PICRETE_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "ENVIRONMENT",
        "PICRETE_HOST",
        "PICRETE_PORT",
        "PROJECT_NAME",
        "API_V1_STR",
        "BACKEND_CORS_ORIGINS",
        "ASSESSMENT_API_URL",
        "TIMER_TICK_MILLIS",
        "AUTO_SAVE_INTERVAL_SECONDS",
        "MAX_CONCURRENT_SESSIONS",
        "COMPLETED_SESSION_RETENTION_SECONDS",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) async fn setup_test_context(backend: FakeBackend) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let backend = Arc::new(backend);
    let state = AppState::new(settings, backend.clone());
    let app = api::router::router(state.clone());

    TestContext { state, app, backend, _guard: guard }
}

pub(crate) fn timing() -> SessionTiming {
    SessionTiming {
        tick_period: std::time::Duration::from_secs(1),
        auto_save_period: std::time::Duration::from_secs(30),
    }
}

pub(crate) fn credential() -> CandidateCredential {
    CandidateCredential::new(CANDIDATE_TOKEN)
}

pub(crate) fn sample_test(time_limit_minutes: u32) -> DeliverableTest {
    DeliverableTest {
        title: "Rust fundamentals".to_string(),
        description: "Ownership and borrowing".to_string(),
        time_limit_minutes,
        questions: vec![
            Question {
                id: "q1".to_string(),
                question_text: "Which keyword moves a closure's captures?".to_string(),
                question_type: QuestionType::MultipleChoice,
                options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            },
            Question {
                id: "q2".to_string(),
                question_text: "Explain the borrow checker".to_string(),
                question_type: QuestionType::ShortAnswer,
                options: Vec::new(),
            },
            Question {
                id: "q3".to_string(),
                question_text: "Implement FizzBuzz".to_string(),
                question_type: QuestionType::Coding,
                options: Vec::new(),
            },
        ],
    }
}

pub(crate) fn strict_proctoring() -> ProctoringSettings {
    ProctoringSettings {
        enable_proctoring: true,
        allow_copy_paste: false,
        require_fullscreen: true,
        max_tab_switches: Some(3),
        max_fullscreen_exits: Some(2),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendCall {
    SessionStatus,
    DeliverableTest,
    ProctoringSettings,
    SaveProgress { answers: Answers, time_remaining: u64 },
    SubmitAttempt { answers: Answers },
    LogEvent { event_type: ProctoringEventKind, event_data: Value },
}

/// In-memory assessment service that records every call.
pub(crate) struct FakeBackend {
    remote_state: StdMutex<RemoteSessionState>,
    test: DeliverableTest,
    proctoring: ProctoringSettings,
    calls: StdMutex<Vec<BackendCall>>,
    submit_gate: StdMutex<Option<Arc<Semaphore>>>,
    save_gate: StdMutex<Option<Arc<Semaphore>>>,
    log_gate: StdMutex<Option<Arc<Semaphore>>>,
    submit_failures: AtomicU32,
    fail_saves: AtomicBool,
    fail_logging: AtomicBool,
    fail_load: AtomicBool,
    flag_events: AtomicBool,
}

impl FakeBackend {
    pub(crate) fn with_state(remote_state: RemoteSessionState, time_limit_minutes: u32) -> Self {
        Self {
            remote_state: StdMutex::new(remote_state),
            test: sample_test(time_limit_minutes),
            proctoring: ProctoringSettings::default(),
            calls: StdMutex::new(Vec::new()),
            submit_gate: StdMutex::new(None),
            save_gate: StdMutex::new(None),
            log_gate: StdMutex::new(None),
            submit_failures: AtomicU32::new(0),
            fail_saves: AtomicBool::new(false),
            fail_logging: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
            flag_events: AtomicBool::new(false),
        }
    }

    pub(crate) fn fresh(time_limit_minutes: u32) -> Self {
        Self::with_state(
            RemoteSessionState {
                status: SessionStatus::NotStarted,
                saved_answers: None,
                time_remaining: None,
            },
            time_limit_minutes,
        )
    }

    pub(crate) fn resumed(saved_answers: Answers, time_remaining: i64) -> Self {
        Self::with_state(
            RemoteSessionState {
                status: SessionStatus::InProgress,
                saved_answers: Some(saved_answers),
                time_remaining: Some(time_remaining),
            },
            30,
        )
    }

    pub(crate) fn completed() -> Self {
        Self::with_state(
            RemoteSessionState {
                status: SessionStatus::Completed,
                saved_answers: None,
                time_remaining: None,
            },
            30,
        )
    }

    pub(crate) fn with_proctoring(mut self, settings: ProctoringSettings) -> Self {
        self.proctoring = settings;
        self
    }

    pub(crate) fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn submit_count(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, BackendCall::SubmitAttempt { .. })).count()
    }

    pub(crate) fn saves(&self) -> Vec<(Answers, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::SaveProgress { answers, time_remaining } => {
                    Some((answers, time_remaining))
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn logged_events(&self) -> Vec<ProctoringEventKind> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::LogEvent { event_type, .. } => Some(event_type),
                _ => None,
            })
            .collect()
    }

    /// Holds submit requests until the returned semaphore receives permits.
    pub(crate) fn hold_submits(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.submit_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn hold_saves(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.save_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn hold_logs(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.log_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn fail_next_submits(&self, count: u32) {
        self.submit_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_logging(&self, fail: bool) {
        self.fail_logging.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn flag_events(&self, flag: bool) {
        self.flag_events.store(flag, Ordering::SeqCst);
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn load_result(&self) -> Result<(), BackendError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn pass_gate(gate: &StdMutex<Option<Arc<Semaphore>>>) {
        let gate = gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }
    }
}

#[async_trait]
impl AssessmentBackend for FakeBackend {
    async fn session_status(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
    ) -> Result<RemoteSessionState, BackendError> {
        self.record(BackendCall::SessionStatus);
        self.load_result()?;
        Ok(self.remote_state.lock().unwrap().clone())
    }

    async fn deliverable_test(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
    ) -> Result<DeliverableTest, BackendError> {
        self.record(BackendCall::DeliverableTest);
        self.load_result()?;
        Ok(self.test.clone())
    }

    async fn proctoring_settings(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
    ) -> Result<ProctoringSettings, BackendError> {
        self.record(BackendCall::ProctoringSettings);
        self.load_result()?;
        Ok(self.proctoring.clone())
    }

    async fn save_progress(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
        answers: &Answers,
        time_remaining: u64,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::SaveProgress { answers: answers.clone(), time_remaining });
        Self::pass_gate(&self.save_gate).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(BackendError::Status { status: 503, message: "busy".to_string() });
        }
        let mut remote = self.remote_state.lock().unwrap();
        remote.status = SessionStatus::InProgress;
        remote.saved_answers = Some(answers.clone());
        remote.time_remaining = Some(time_remaining as i64);
        Ok(())
    }

    async fn submit_attempt(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
        answers: &Answers,
    ) -> Result<SubmitOutcome, BackendError> {
        self.record(BackendCall::SubmitAttempt { answers: answers.clone() });
        Self::pass_gate(&self.submit_gate).await;
        let failures = self.submit_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.submit_failures.store(failures - 1, Ordering::SeqCst);
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        self.remote_state.lock().unwrap().status = SessionStatus::Completed;
        Ok(SubmitOutcome { score: Some(66.7), remarks: Some("Good".to_string()) })
    }

    async fn log_event(
        &self,
        _credential: &CandidateCredential,
        _test_id: &str,
        event_type: ProctoringEventKind,
        event_data: &Value,
    ) -> Result<LogVerdict, BackendError> {
        self.record(BackendCall::LogEvent { event_type, event_data: event_data.clone() });
        Self::pass_gate(&self.log_gate).await;
        if self.fail_logging.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(LogVerdict { flagged: self.flag_events.load(Ordering::SeqCst) })
    }
}

/// Lets spawned driver tasks run; the clock is paused in timing-sensitive tests.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        builder.body(Body::from(body.to_string())).expect("request")
    } else {
        builder.body(Body::empty()).expect("request")
    }
}

pub(crate) async fn read_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&body).expect("json body")
}
