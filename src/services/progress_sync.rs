//! Pushes `{answers, time_remaining}` snapshots to the assessment service.
//!
//! Every save runs inside a single lane, so two saves never overlap and the later one
//! always carries the later snapshot. The snapshot is read from a [`ProgressSource`]
//! only after the lane is held.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::shutdown::stopped;
use crate::schemas::delivery::Answers;
use crate::services::assessment_client::{AssessmentBackend, CandidateCredential};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressSnapshot {
    pub(crate) answers: Answers,
    pub(crate) time_remaining: u64,
}

/// Latest-value accessor for the state a save should carry.
///
/// Returns `None` when nothing may be saved: the attempt is finished, blocked, being
/// submitted, or its clock has run out.
pub(crate) trait ProgressSource: Send + Sync {
    fn current_progress(&self) -> Option<ProgressSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveTrigger {
    Autosave,
    Unload,
    Teardown,
}

impl SaveTrigger {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Autosave => "autosave",
            Self::Unload => "unload",
            Self::Teardown => "teardown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    NothingToSave,
    /// Another save held the lane; the next tick will carry fresher data anyway.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveOutcome {
    Saved,
    Skipped(SkipReason),
    Failed,
}

impl SaveOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Skipped(SkipReason::NothingToSave) => "nothing_to_save",
            Self::Skipped(SkipReason::Superseded) => "superseded",
            Self::Failed => "failed",
        }
    }
}

pub(crate) struct ProgressSynchronizer {
    backend: Arc<dyn AssessmentBackend>,
    credential: CandidateCredential,
    test_id: String,
    lane: Mutex<()>,
}

impl ProgressSynchronizer {
    pub(crate) fn new(
        backend: Arc<dyn AssessmentBackend>,
        credential: CandidateCredential,
        test_id: impl Into<String>,
    ) -> Self {
        Self { backend, credential, test_id: test_id.into(), lane: Mutex::new(()) }
    }

    /// Holds the save lane. Submit takes it so no save is in flight while finalizing.
    pub(crate) async fn lane(&self) -> MutexGuard<'_, ()> {
        self.lane.lock().await
    }

    pub(crate) async fn save(&self, source: &dyn ProgressSource, trigger: SaveTrigger) -> SaveOutcome {
        let _lane = match trigger {
            SaveTrigger::Autosave => match self.lane.try_lock() {
                Ok(guard) => guard,
                Err(_) => return self.finish(trigger, SaveOutcome::Skipped(SkipReason::Superseded)),
            },
            SaveTrigger::Unload | SaveTrigger::Teardown => self.lane.lock().await,
        };

        let Some(snapshot) = source.current_progress() else {
            return self.finish(trigger, SaveOutcome::Skipped(SkipReason::NothingToSave));
        };

        let result = self
            .backend
            .save_progress(&self.credential, &self.test_id, &snapshot.answers, snapshot.time_remaining)
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    test_id = %self.test_id,
                    trigger = trigger.as_str(),
                    answers = snapshot.answers.len(),
                    time_remaining = snapshot.time_remaining,
                    "Progress saved"
                );
                self.finish(trigger, SaveOutcome::Saved)
            }
            Err(err) => {
                tracing::warn!(
                    test_id = %self.test_id,
                    trigger = trigger.as_str(),
                    error = %err,
                    "Progress save failed"
                );
                self.finish(trigger, SaveOutcome::Failed)
            }
        }
    }

    fn finish(&self, trigger: SaveTrigger, outcome: SaveOutcome) -> SaveOutcome {
        metrics::counter!(
            "delivery_progress_saves_total",
            "trigger" => trigger.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }
}

/// Autosave driver. Exits when `stop` flips or the source is dropped.
pub(crate) async fn run_autosave(
    sync: Arc<ProgressSynchronizer>,
    source: Weak<dyn ProgressSource>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                let Some(source) = source.upgrade() else {
                    break;
                };
                sync.save(source.as_ref(), SaveTrigger::Autosave).await;
            }
        }
    }

    tracing::debug!(test_id = %sync.test_id, "Autosave stopped");
}
