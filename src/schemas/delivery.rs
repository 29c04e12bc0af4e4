//! Shapes exchanged with the remote assessment service.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Question id → submitted answer (option text, free text, or structured code payload).
pub(crate) type Answers = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemoteSessionState {
    pub(crate) status: SessionStatus,
    #[serde(default)]
    pub(crate) saved_answers: Option<Answers>,
    /// Seconds; the service may report negative values for attempts that lapsed offline.
    #[serde(default)]
    pub(crate) time_remaining: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Coding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Question {
    #[serde(deserialize_with = "string_or_number")]
    pub(crate) id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeliverableTest {
    pub(crate) title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) description: String,
    #[serde(rename = "time_limit", alias = "time_limit_minutes")]
    pub(crate) time_limit_minutes: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) questions: Vec<Question>,
}

impl DeliverableTest {
    pub(crate) fn time_limit_seconds(&self) -> u64 {
        u64::from(self.time_limit_minutes) * 60
    }

    pub(crate) fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProctoringSettings {
    #[serde(default)]
    pub(crate) enable_proctoring: bool,
    #[serde(default)]
    pub(crate) allow_copy_paste: bool,
    #[serde(default)]
    pub(crate) require_fullscreen: bool,
    #[serde(default)]
    pub(crate) max_tab_switches: Option<u32>,
    #[serde(default)]
    pub(crate) max_fullscreen_exits: Option<u32>,
}

impl ProctoringSettings {
    /// `None` when unset or zero; both mean "never block on this counter".
    pub(crate) fn tab_switch_limit(&self) -> Option<u32> {
        self.max_tab_switches.filter(|limit| *limit > 0)
    }

    pub(crate) fn fullscreen_exit_limit(&self) -> Option<u32> {
        self.max_fullscreen_exits.filter(|limit| *limit > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubmitOutcome {
    #[serde(default)]
    pub(crate) score: Option<f64>,
    #[serde(default)]
    pub(crate) remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct LogVerdict {
    #[serde(default)]
    pub(crate) flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ProctoringEventKind {
    TabSwitch,
    WindowBlur,
    CopyAttempt,
    PasteAttempt,
    RightClick,
    FullscreenExit,
}

impl ProctoringEventKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::TabSwitch => "tab_switch",
            Self::WindowBlur => "window_blur",
            Self::CopyAttempt => "copy_attempt",
            Self::PasteAttempt => "paste_attempt",
            Self::RightClick => "right_click",
            Self::FullscreenExit => "fullscreen_exit",
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveProgressRequest<'a> {
    pub(crate) answers: &'a Answers,
    pub(crate) time_remaining: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitAttemptRequest<'a> {
    pub(crate) answers: &'a Answers,
}

#[derive(Debug, Serialize)]
pub(crate) struct LogEventRequest<'a> {
    pub(crate) test_id: &'a str,
    pub(crate) event_type: ProctoringEventKind,
    pub(crate) event_data: &'a serde_json::Value,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(value) => value,
        RawId::Number(value) => value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deliverable_test_accepts_numeric_question_ids() {
        let test: DeliverableTest = serde_json::from_value(json!({
            "title": "Rust basics",
            "time_limit": 30,
            "questions": [
                { "id": 7, "question_text": "Pick one", "question_type": "multiple_choice",
                  "options": ["A", "B"] },
                { "id": "q2", "question_text": "Explain", "question_type": "short_answer" }
            ]
        }))
        .expect("test payload");

        assert_eq!(test.time_limit_seconds(), 1800);
        assert!(test.question("7").is_some());
        assert!(test.question("q2").is_some());
        assert!(test.question("q3").is_none());
    }

    #[test]
    fn deliverable_test_treats_null_optionals_as_empty() {
        let test: DeliverableTest = serde_json::from_value(json!({
            "title": "Rust basics",
            "description": null,
            "time_limit": 10,
            "questions": [
                { "id": "q1", "question_text": "Explain", "question_type": "short_answer",
                  "options": null },
                { "id": "q2", "question_text": "Write it", "question_type": "coding",
                  "options": null }
            ]
        }))
        .expect("test payload");

        assert_eq!(test.description, "");
        assert_eq!(test.questions.len(), 2);
        assert!(test.questions.iter().all(|question| question.options.is_empty()));

        let bare: DeliverableTest =
            serde_json::from_value(json!({ "title": "Empty", "time_limit": 5, "questions": null }))
                .expect("bare payload");
        assert!(bare.questions.is_empty());
    }

    #[test]
    fn proctoring_limits_treat_zero_as_unlimited() {
        let settings = ProctoringSettings {
            max_tab_switches: Some(0),
            max_fullscreen_exits: Some(2),
            ..ProctoringSettings::default()
        };
        assert_eq!(settings.tab_switch_limit(), None);
        assert_eq!(settings.fullscreen_exit_limit(), Some(2));
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let value = serde_json::to_value(ProctoringEventKind::FullscreenExit).unwrap();
        assert_eq!(value, json!("fullscreen_exit"));
        assert_eq!(ProctoringEventKind::TabSwitch.as_str(), "tab_switch");
    }
}
