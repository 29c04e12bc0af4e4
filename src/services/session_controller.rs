//! One candidate's attempt at one test.
//!
//! The controller owns the canonical session state (status, answers, countdown and
//! proctoring counters). The countdown and autosave drivers are tokio tasks that hold
//! only a weak reference and feed results back through the controller's operations.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval_at, Instant};
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::shutdown::{stopped, StopSignal};
use crate::core::time::{format_clock, now_rfc3339};
use crate::schemas::delivery::{Answers, DeliverableTest, ProctoringSettings, SessionStatus};
use crate::schemas::session::{
    AnswerResponse, BlockReason, EnvironmentSignal, ProctoringView, SessionView, SignalResponse,
    SubmitReason, SubmitReceipt,
};
use crate::services::assessment_client::{AssessmentBackend, BackendError, CandidateCredential};
use crate::services::countdown::{Countdown, TickOutcome};
use crate::services::proctoring::{MonitorPhase, ProctoringEvent, ProctoringMonitor};
use crate::services::progress_sync::{
    run_autosave, ProgressSnapshot, ProgressSource, ProgressSynchronizer, SaveOutcome, SaveTrigger,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionTiming {
    pub(crate) tick_period: Duration,
    pub(crate) auto_save_period: Duration,
}

impl SessionTiming {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            tick_period: settings.delivery().tick_period(),
            auto_save_period: settings.delivery().auto_save_period(),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("failed to load the session: {0}")]
    LoadFailure(#[source] BackendError),
    #[error("failed to submit the attempt: {0}")]
    SubmitFailure(#[source] BackendError),
    #[error("the attempt is already completed")]
    Completed,
    #[error("the attempt has not started")]
    NotStarted,
    #[error("the session is blocked pending proctor review")]
    Blocked,
    #[error("the attempt is being submitted")]
    Submitting,
    #[error("time for this attempt has run out")]
    TimeExpired,
    #[error("question {0} is not part of this test")]
    UnknownQuestion(String),
    #[error("answer value must not be null")]
    InvalidAnswer,
    #[error("the session was closed")]
    Closed,
}

/// Result of a successful submit.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub(crate) receipt: SubmitReceipt,
    /// Fullscreen was requested for this attempt and should be released by the page.
    pub(crate) release_fullscreen: bool,
}

struct SessionState {
    status: SessionStatus,
    resumed: bool,
    answers: Answers,
    countdown: Countdown,
    monitor: ProctoringMonitor,
    blocked: bool,
    block_reason: Option<BlockReason>,
    submitting: bool,
    started: bool,
    disposed: bool,
    receipt: Option<SubmitReceipt>,
    completed_at: Option<Instant>,
    expired_at: Option<Instant>,
}

enum Seed {
    Fresh,
    Resume { answers: Answers, remaining: u64 },
}

pub(crate) struct SessionController {
    attempt_id: Uuid,
    test_id: String,
    test: Option<DeliverableTest>,
    backend: Arc<dyn AssessmentBackend>,
    credential: CandidateCredential,
    sync: Arc<ProgressSynchronizer>,
    timing: SessionTiming,
    submit_latch: Mutex<Option<Submission>>,
    /// Proctoring log sends hold a read guard; leaving `in_progress` takes the write guard.
    event_gate: RwLock<()>,
    state: StdMutex<SessionState>,
    stop: StopSignal,
}

impl SessionController {
    /// Loads status, test and proctoring settings and seeds the countdown exactly once.
    ///
    /// A completed attempt opens as a read-only view: nothing else is fetched and the
    /// countdown stays unseeded.
    pub(crate) async fn open(
        backend: Arc<dyn AssessmentBackend>,
        credential: CandidateCredential,
        test_id: &str,
        timing: SessionTiming,
    ) -> Result<Arc<Self>, SessionError> {
        let remote =
            backend.session_status(&credential, test_id).await.map_err(SessionError::LoadFailure)?;

        let seed = match remote.status {
            SessionStatus::Completed => {
                metrics::counter!("delivery_sessions_opened_total", "mode" => "completed")
                    .increment(1);
                tracing::info!(test_id, "Opened completed attempt read-only");
                let controller = Self::build(
                    backend,
                    credential,
                    test_id,
                    timing,
                    None,
                    SessionState::completed(),
                );
                return Ok(Arc::new(controller));
            }
            SessionStatus::InProgress => {
                let remaining = remote.time_remaining.ok_or_else(|| {
                    SessionError::LoadFailure(BackendError::Decode(
                        "in-progress session without time_remaining".to_string(),
                    ))
                })?;
                Seed::Resume {
                    answers: remote.saved_answers.unwrap_or_default(),
                    remaining: u64::try_from(remaining).unwrap_or(0),
                }
            }
            SessionStatus::NotStarted => Seed::Fresh,
        };

        let (test, settings) = tokio::try_join!(
            backend.deliverable_test(&credential, test_id),
            backend.proctoring_settings(&credential, test_id),
        )
        .map_err(SessionError::LoadFailure)?;

        let (answers, remaining, resumed) = match seed {
            Seed::Fresh => (Answers::new(), test.time_limit_seconds(), false),
            Seed::Resume { answers, remaining } => (answers, remaining, true),
        };

        let mut countdown = Countdown::default();
        countdown.seed(remaining);

        let mode = if resumed { "resumed" } else { "fresh" };
        metrics::counter!("delivery_sessions_opened_total", "mode" => mode).increment(1);
        tracing::info!(
            test_id,
            mode,
            time_remaining = remaining,
            answers = answers.len(),
            proctoring = settings.enable_proctoring,
            "Opened delivery session"
        );

        let state = SessionState {
            status: SessionStatus::NotStarted,
            resumed,
            answers,
            countdown,
            monitor: ProctoringMonitor::new(settings),
            blocked: false,
            block_reason: None,
            submitting: false,
            started: false,
            disposed: false,
            receipt: None,
            completed_at: None,
            expired_at: None,
        };

        Ok(Arc::new(Self::build(backend, credential, test_id, timing, Some(test), state)))
    }

    fn build(
        backend: Arc<dyn AssessmentBackend>,
        credential: CandidateCredential,
        test_id: &str,
        timing: SessionTiming,
        test: Option<DeliverableTest>,
        state: SessionState,
    ) -> Self {
        let sync =
            Arc::new(ProgressSynchronizer::new(backend.clone(), credential.clone(), test_id));
        Self {
            attempt_id: Uuid::new_v4(),
            test_id: test_id.to_string(),
            test,
            backend,
            credential,
            sync,
            timing,
            submit_latch: Mutex::new(None),
            event_gate: RwLock::new(()),
            state: StdMutex::new(state),
            stop: StopSignal::new(),
        }
    }

    /// Moves the attempt into `in_progress`, starts the countdown and arms the monitor.
    ///
    /// Idempotent. Returns `true` when the page should request fullscreen, which happens
    /// at most once per session.
    pub(crate) fn start(self: &Arc<Self>) -> bool {
        let (outcome, request_fullscreen) = {
            let mut state = self.lock_state();
            if state.started || state.disposed || state.status == SessionStatus::Completed {
                return false;
            }
            state.started = true;
            state.status = SessionStatus::InProgress;

            let outcome = state.countdown.start();
            let request_fullscreen = match outcome {
                TickOutcome::Expired => false,
                TickOutcome::Idle | TickOutcome::Ticked { .. } => state.monitor.arm(),
            };
            (outcome, request_fullscreen)
        };

        match outcome {
            TickOutcome::Expired => {
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.expire().await });
            }
            TickOutcome::Idle | TickOutcome::Ticked { .. } => {
                tokio::spawn(run_countdown(
                    Arc::downgrade(self),
                    self.timing.tick_period,
                    self.stop.subscribe(),
                ));
                let source = Arc::downgrade(self) as Weak<dyn ProgressSource>;
                tokio::spawn(run_autosave(
                    self.sync.clone(),
                    source,
                    self.timing.auto_save_period,
                    self.stop.subscribe(),
                ));
            }
        }

        request_fullscreen
    }

    fn on_tick(&self) -> TickOutcome {
        let mut state = self.lock_state();
        if state.status != SessionStatus::InProgress {
            return TickOutcome::Idle;
        }
        state.countdown.tick()
    }

    async fn expire(&self) {
        {
            let mut state = self.lock_state();
            if state.expired_at.is_none() {
                state.expired_at = Some(Instant::now());
            }
        }
        tracing::info!(test_id = %self.test_id, attempt_id = %self.attempt_id, "Attempt time expired");
        if let Err(err) = self.submit(SubmitReason::Timeout).await {
            tracing::warn!(
                test_id = %self.test_id,
                error = %err,
                "Automatic submit after expiry did not complete"
            );
        }
    }

    /// Finalizes the attempt. Exactly one submit request reaches the service per session;
    /// concurrent or repeated callers get the first successful result.
    pub(crate) async fn submit(&self, reason: SubmitReason) -> Result<Submission, SessionError> {
        let mut latch = self.submit_latch.lock().await;
        if let Some(done) = latch.as_ref() {
            return Ok(done.clone());
        }

        let answers = {
            let mut state = self.lock_state();
            match state.status {
                SessionStatus::Completed => return Err(SessionError::Completed),
                SessionStatus::NotStarted => return Err(SessionError::NotStarted),
                SessionStatus::InProgress => {}
            }
            if state.disposed {
                return Err(SessionError::Closed);
            }
            state.submitting = true;
            state.answers.clone()
        };

        let lane = self.sync.lane().await;
        let result = self.backend.submit_attempt(&self.credential, &self.test_id, &answers).await;

        match result {
            Ok(outcome) => {
                let receipt = SubmitReceipt { reason, outcome, submitted_at: now_rfc3339() };
                let gate = self.event_gate.write().await;
                let release_fullscreen = self.finish(receipt.clone());
                drop(gate);
                drop(lane);

                metrics::counter!(
                    "delivery_submits_total",
                    "reason" => reason.as_str(),
                    "outcome" => "success"
                )
                .increment(1);
                tracing::info!(
                    test_id = %self.test_id,
                    attempt_id = %self.attempt_id,
                    reason = reason.as_str(),
                    answers = answers.len(),
                    "Attempt submitted"
                );

                let submission = Submission { receipt, release_fullscreen };
                *latch = Some(submission.clone());
                Ok(submission)
            }
            Err(err) => {
                self.lock_state().submitting = false;
                drop(lane);

                metrics::counter!(
                    "delivery_submits_total",
                    "reason" => reason.as_str(),
                    "outcome" => "failure"
                )
                .increment(1);
                tracing::error!(
                    test_id = %self.test_id,
                    attempt_id = %self.attempt_id,
                    reason = reason.as_str(),
                    error = %err,
                    "Attempt submit failed"
                );
                Err(SessionError::SubmitFailure(err))
            }
        }
    }

    /// Transition into `completed`. Runs synchronously so no tick or signal can land
    /// between the success response and the timer and monitor shutting down.
    fn finish(&self, receipt: SubmitReceipt) -> bool {
        let release_fullscreen = {
            let mut state = self.lock_state();
            state.status = SessionStatus::Completed;
            state.submitting = false;
            state.countdown.cancel();
            state.monitor.detach();
            state.receipt = Some(receipt);
            state.completed_at = Some(Instant::now());
            state.monitor.fullscreen_requested()
        };
        self.stop.trigger();
        release_fullscreen
    }

    /// Freezes the attempt pending proctor review. Returns `true` only on the transition.
    pub(crate) fn block(&self, reason: BlockReason) -> bool {
        let mut state = self.lock_state();
        if state.blocked || state.status != SessionStatus::InProgress {
            return false;
        }
        state.blocked = true;
        state.block_reason = Some(reason);
        drop(state);

        metrics::counter!("delivery_sessions_blocked_total").increment(1);
        tracing::warn!(
            test_id = %self.test_id,
            attempt_id = %self.attempt_id,
            reason = reason.as_str(),
            "Session blocked"
        );
        true
    }

    pub(crate) fn record_answer(
        &self,
        question_id: &str,
        value: serde_json::Value,
    ) -> Result<AnswerResponse, SessionError> {
        let mut state = self.lock_state();
        match state.status {
            SessionStatus::Completed => return Err(SessionError::Completed),
            SessionStatus::NotStarted => return Err(SessionError::NotStarted),
            SessionStatus::InProgress => {}
        }
        if state.disposed {
            return Err(SessionError::Closed);
        }
        if state.blocked {
            return Err(SessionError::Blocked);
        }
        if state.submitting {
            return Err(SessionError::Submitting);
        }
        if state.countdown.has_fired() {
            return Err(SessionError::TimeExpired);
        }

        let known = self.test.as_ref().is_some_and(|test| test.question(question_id).is_some());
        if !known {
            return Err(SessionError::UnknownQuestion(question_id.to_string()));
        }
        if value.is_null() {
            return Err(SessionError::InvalidAnswer);
        }

        state.answers.insert(question_id.to_string(), value);
        Ok(AnswerResponse {
            question_id: question_id.to_string(),
            answered: state.answers.len(),
            time_remaining: state.countdown.remaining(),
        })
    }

    /// Feeds one environment signal through the monitor, applies a tripped limit and
    /// forwards the resulting event to the proctoring log.
    pub(crate) async fn handle_signal(&self, signal: EnvironmentSignal) -> SignalResponse {
        let observation = {
            let mut state = self.lock_state();
            if state.status != SessionStatus::InProgress || state.disposed {
                return SignalResponse::default();
            }
            state.monitor.observe(signal, now_rfc3339())
        };

        if let Some(reason) = observation.trip {
            self.block(reason);
        }

        let logged = match observation.event {
            Some(event) => self.log_event(event).await,
            None => false,
        };

        let state = self.lock_state();
        SignalResponse {
            observed: observation.observed,
            logged,
            suppress_default: observation.suppress_default,
            request_fullscreen: observation.request_fullscreen,
            fullscreen_warning: state.monitor.fullscreen_warning(),
            blocked: state.blocked,
            violation_count: state.monitor.violations(),
        }
    }

    async fn log_event(&self, event: ProctoringEvent) -> bool {
        let _gate = self.event_gate.read().await;
        {
            let state = self.lock_state();
            if state.status != SessionStatus::InProgress
                || state.disposed
                || state.monitor.phase() == MonitorPhase::Detached
            {
                return false;
            }
        }
        tracing::debug!(
            test_id = %self.test_id,
            event_type = event.kind.as_str(),
            timestamp = %event.timestamp,
            "Logging proctoring event"
        );

        metrics::counter!("proctoring_events_total", "event_type" => event.kind.as_str())
            .increment(1);
        let verdict =
            self.backend.log_event(&self.credential, &self.test_id, event.kind, &event.data).await;

        match verdict {
            Ok(verdict) => {
                if verdict.flagged {
                    tracing::warn!(
                        test_id = %self.test_id,
                        attempt_id = %self.attempt_id,
                        event_type = event.kind.as_str(),
                        "Assessment service flagged the attempt"
                    );
                    self.block(BlockReason::FlaggedByService);
                }
                true
            }
            Err(err) => {
                tracing::warn!(
                    test_id = %self.test_id,
                    event_type = event.kind.as_str(),
                    error = %err,
                    "Failed to log proctoring event"
                );
                false
            }
        }
    }

    pub(crate) fn snapshot(&self) -> SessionView {
        let state = self.lock_state();
        let remaining = state.countdown.remaining();
        let monitor = &state.monitor;

        SessionView {
            attempt_id: self.attempt_id.to_string(),
            test_id: self.test_id.clone(),
            status: state.status,
            resumed: state.resumed,
            time_remaining: remaining,
            clock: remaining.map(format_clock),
            timer_running: state.countdown.is_running(),
            answers: state.answers.clone(),
            blocked: state.blocked,
            block_reason: state.block_reason,
            submitting: state.submitting,
            can_submit: state.status == SessionStatus::InProgress
                && !state.submitting
                && !state.disposed,
            test: self.test.clone(),
            proctoring: ProctoringView {
                enabled: monitor.settings().enable_proctoring,
                armed: monitor.phase() == MonitorPhase::Armed,
                require_fullscreen: monitor.settings().require_fullscreen,
                suppressed_signals: monitor.suppressed_signals(),
                violation_count: monitor.violations(),
                tab_switches: monitor.tab_switches(),
                fullscreen_exits: monitor.fullscreen_exits(),
                fullscreen_warning: monitor.fullscreen_warning(),
            },
            result: state.receipt.clone(),
        }
    }

    /// Best-effort save when the page goes away. Waits for an in-flight save.
    pub(crate) async fn unload(&self) -> SaveOutcome {
        self.sync.save(self, SaveTrigger::Unload).await
    }

    /// Stops every driver, then makes a final save. The session is unusable afterwards.
    pub(crate) async fn teardown(&self) -> SaveOutcome {
        self.stop.trigger();
        {
            let _gate = self.event_gate.write().await;
            let mut state = self.lock_state();
            state.countdown.cancel();
            state.monitor.detach();
        }

        let outcome = self.sync.save(self, SaveTrigger::Teardown).await;
        self.lock_state().disposed = true;
        tracing::debug!(test_id = %self.test_id, outcome = outcome.as_str(), "Session torn down");
        outcome
    }

    /// How long the attempt has been finished: since completion, or since the countdown
    /// expired for an attempt whose timeout submit never went through.
    pub(crate) fn lapsed_for(&self, now: Instant) -> Option<Duration> {
        let state = self.lock_state();
        state.completed_at.or(state.expired_at).map(|at| now.saturating_duration_since(at))
    }

    pub(crate) fn test_id(&self) -> &str {
        &self.test_id
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionState {
    fn completed() -> Self {
        Self {
            status: SessionStatus::Completed,
            resumed: false,
            answers: Answers::new(),
            countdown: Countdown::default(),
            monitor: ProctoringMonitor::new(ProctoringSettings::default()),
            blocked: false,
            block_reason: None,
            submitting: false,
            started: false,
            disposed: false,
            receipt: None,
            completed_at: Some(Instant::now()),
            expired_at: None,
        }
    }
}

impl ProgressSource for SessionController {
    fn current_progress(&self) -> Option<ProgressSnapshot> {
        let state = self.lock_state();
        if state.status == SessionStatus::Completed
            || state.blocked
            || state.submitting
            || state.disposed
        {
            return None;
        }
        let time_remaining = state.countdown.remaining().filter(|remaining| *remaining > 0)?;
        Some(ProgressSnapshot { answers: state.answers.clone(), time_remaining })
    }
}

async fn run_countdown(
    controller: Weak<SessionController>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                match controller.on_tick() {
                    TickOutcome::Ticked { .. } => {}
                    TickOutcome::Expired => {
                        controller.expire().await;
                        break;
                    }
                    TickOutcome::Idle => break,
                }
            }
        }
    }
}
