use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::schemas::delivery::{Answers, DeliverableTest, SessionStatus, SubmitOutcome};

/// Raw browser observation forwarded by the delivery page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EnvironmentSignal {
    VisibilityHidden,
    VisibilityVisible,
    WindowBlur,
    Copy,
    Paste,
    ContextMenu,
    FullscreenExited,
    FullscreenEntered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SubmitReason {
    Manual,
    Timeout,
}

impl SubmitReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BlockReason {
    TabSwitchLimit,
    FullscreenExitLimit,
    FlaggedByService,
}

impl BlockReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::TabSwitchLimit => "tab_switch_limit",
            Self::FullscreenExitLimit => "fullscreen_exit_limit",
            Self::FlaggedByService => "flagged_by_service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SubmitReceipt {
    pub(crate) reason: SubmitReason,
    pub(crate) outcome: SubmitOutcome,
    pub(crate) submitted_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProctoringView {
    pub(crate) enabled: bool,
    pub(crate) armed: bool,
    pub(crate) require_fullscreen: bool,
    /// Signals whose default browser action the page must cancel locally.
    pub(crate) suppressed_signals: Vec<EnvironmentSignal>,
    pub(crate) violation_count: u32,
    pub(crate) tab_switches: u32,
    pub(crate) fullscreen_exits: u32,
    pub(crate) fullscreen_warning: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionView {
    pub(crate) attempt_id: String,
    pub(crate) test_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) resumed: bool,
    pub(crate) time_remaining: Option<u64>,
    pub(crate) clock: Option<String>,
    pub(crate) timer_running: bool,
    pub(crate) answers: Answers,
    pub(crate) blocked: bool,
    pub(crate) block_reason: Option<BlockReason>,
    pub(crate) submitting: bool,
    pub(crate) can_submit: bool,
    pub(crate) test: Option<DeliverableTest>,
    pub(crate) proctoring: ProctoringView,
    pub(crate) result: Option<SubmitReceipt>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenSessionResponse {
    pub(crate) session: SessionView,
    pub(crate) request_fullscreen: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerRequest {
    #[validate(custom(function = "validate_answer_value"))]
    pub(crate) value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) answered: usize,
    pub(crate) time_remaining: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalRequest {
    pub(crate) signal: EnvironmentSignal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct SignalResponse {
    /// `false` once the monitor is detached or was never armed.
    pub(crate) observed: bool,
    pub(crate) logged: bool,
    pub(crate) suppress_default: bool,
    pub(crate) request_fullscreen: bool,
    pub(crate) fullscreen_warning: bool,
    pub(crate) blocked: bool,
    pub(crate) violation_count: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) status: SessionStatus,
    pub(crate) receipt: SubmitReceipt,
    pub(crate) release_fullscreen: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveResponse {
    pub(crate) outcome: &'static str,
}

fn validate_answer_value(value: &serde_json::Value) -> Result<(), ValidationError> {
    match value {
        serde_json::Value::Null => Err(ValidationError::new("answer_null")
            .with_message("answer value must not be null".into())),
        serde_json::Value::String(text) if text.len() > 100_000 => {
            Err(ValidationError::new("answer_too_long")
                .with_message("answer value is too long".into()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signal_names_are_snake_case() {
        let signal: SignalRequest =
            serde_json::from_value(json!({ "signal": "fullscreen_exited" })).unwrap();
        assert_eq!(signal.signal, EnvironmentSignal::FullscreenExited);
    }

    #[test]
    fn null_answer_fails_validation() {
        let request = AnswerRequest { value: serde_json::Value::Null };
        assert!(request.validate().is_err());

        let request = AnswerRequest { value: json!({ "language": "rust", "code": "fn main() {}" }) };
        assert!(request.validate().is_ok());
    }
}
