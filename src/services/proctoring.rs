//! Proctoring monitor: classifies environment signals against the test's proctoring
//! settings and keeps the local violation counters.
//!
//! The policy is a table of rules built once when the monitor is armed, so it can be
//! exercised without any browser binding. Counters are a fast-path heuristic; the
//! assessment service may still flag the attempt on its own.

use serde_json::{json, Value};

use crate::schemas::delivery::{ProctoringEventKind, ProctoringSettings};
use crate::schemas::session::{BlockReason, EnvironmentSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorPhase {
    Idle,
    Armed,
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    TabSwitches,
    FullscreenExits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Count(Counter),
    RequestFullscreen(Counter),
    ClearFullscreenWarning,
}

#[derive(Clone, Copy)]
struct PolicyRule {
    signal: EnvironmentSignal,
    applies: fn(&ProctoringSettings) -> bool,
    event: Option<ProctoringEventKind>,
    suppress_default: bool,
    effect: Effect,
}

impl std::fmt::Debug for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRule")
            .field("signal", &self.signal)
            .field("event", &self.event)
            .field("suppress_default", &self.suppress_default)
            .field("effect", &self.effect)
            .finish()
    }
}

const POLICY: &[PolicyRule] = &[
    PolicyRule {
        signal: EnvironmentSignal::VisibilityHidden,
        applies: always,
        event: Some(ProctoringEventKind::TabSwitch),
        suppress_default: false,
        effect: Effect::Count(Counter::TabSwitches),
    },
    PolicyRule {
        signal: EnvironmentSignal::WindowBlur,
        applies: always,
        event: Some(ProctoringEventKind::WindowBlur),
        suppress_default: false,
        effect: Effect::None,
    },
    PolicyRule {
        signal: EnvironmentSignal::Copy,
        applies: clipboard_restricted,
        event: Some(ProctoringEventKind::CopyAttempt),
        suppress_default: true,
        effect: Effect::None,
    },
    PolicyRule {
        signal: EnvironmentSignal::Paste,
        applies: clipboard_restricted,
        event: Some(ProctoringEventKind::PasteAttempt),
        suppress_default: true,
        effect: Effect::None,
    },
    PolicyRule {
        signal: EnvironmentSignal::ContextMenu,
        applies: always,
        event: Some(ProctoringEventKind::RightClick),
        suppress_default: true,
        effect: Effect::None,
    },
    PolicyRule {
        signal: EnvironmentSignal::FullscreenExited,
        applies: fullscreen_required,
        event: Some(ProctoringEventKind::FullscreenExit),
        suppress_default: false,
        effect: Effect::RequestFullscreen(Counter::FullscreenExits),
    },
    PolicyRule {
        signal: EnvironmentSignal::FullscreenEntered,
        applies: fullscreen_required,
        event: None,
        suppress_default: false,
        effect: Effect::ClearFullscreenWarning,
    },
];

fn always(_: &ProctoringSettings) -> bool {
    true
}

fn clipboard_restricted(settings: &ProctoringSettings) -> bool {
    !settings.allow_copy_paste
}

fn fullscreen_required(settings: &ProctoringSettings) -> bool {
    settings.require_fullscreen
}

/// A violation ready to be sent to the proctoring log.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProctoringEvent {
    pub(crate) kind: ProctoringEventKind,
    pub(crate) timestamp: String,
    pub(crate) data: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Observation {
    pub(crate) observed: bool,
    pub(crate) event: Option<ProctoringEvent>,
    pub(crate) suppress_default: bool,
    pub(crate) request_fullscreen: bool,
    pub(crate) trip: Option<BlockReason>,
}

#[derive(Debug)]
pub(crate) struct ProctoringMonitor {
    settings: ProctoringSettings,
    phase: MonitorPhase,
    rules: Vec<PolicyRule>,
    fullscreen_requested: bool,
    fullscreen_warning: bool,
    violations: u32,
    tab_switches: u32,
    fullscreen_exits: u32,
}

impl ProctoringMonitor {
    pub(crate) fn new(settings: ProctoringSettings) -> Self {
        Self {
            settings,
            phase: MonitorPhase::Idle,
            rules: Vec::new(),
            fullscreen_requested: false,
            fullscreen_warning: false,
            violations: 0,
            tab_switches: 0,
            fullscreen_exits: 0,
        }
    }

    /// Arms the monitor when proctoring is enabled. Returns `true` when the page should
    /// request fullscreen; that happens at most once per monitor.
    pub(crate) fn arm(&mut self) -> bool {
        if self.phase != MonitorPhase::Idle || !self.settings.enable_proctoring {
            return false;
        }
        self.rules =
            POLICY.iter().filter(|rule| (rule.applies)(&self.settings)).copied().collect();
        self.phase = MonitorPhase::Armed;

        if self.settings.require_fullscreen && !self.fullscreen_requested {
            self.fullscreen_requested = true;
            return true;
        }
        false
    }

    /// Detaches every rule. A detached monitor never re-arms.
    pub(crate) fn detach(&mut self) {
        self.phase = MonitorPhase::Detached;
        self.rules.clear();
        self.fullscreen_warning = false;
    }

    pub(crate) fn observe(&mut self, signal: EnvironmentSignal, timestamp: String) -> Observation {
        if self.phase != MonitorPhase::Armed {
            return Observation::default();
        }
        let Some(rule) = self.rules.iter().find(|rule| rule.signal == signal).copied() else {
            return Observation { observed: true, ..Observation::default() };
        };

        let mut observation = Observation {
            observed: true,
            suppress_default: rule.suppress_default,
            ..Observation::default()
        };

        let count = match rule.effect {
            Effect::None => None,
            Effect::Count(counter) => Some(self.bump(counter)),
            Effect::RequestFullscreen(counter) => {
                self.fullscreen_warning = true;
                observation.request_fullscreen = true;
                Some(self.bump(counter))
            }
            Effect::ClearFullscreenWarning => {
                self.fullscreen_warning = false;
                None
            }
        };

        if let Some(kind) = rule.event {
            self.violations = self.violations.saturating_add(1);
            let data = match count {
                Some(count) => json!({ "count": count, "timestamp": timestamp }),
                None => json!({ "timestamp": timestamp }),
            };
            observation.event = Some(ProctoringEvent { kind, timestamp, data });
        }

        observation.trip = self.limit_reached(rule.effect);
        observation
    }

    fn bump(&mut self, counter: Counter) -> u32 {
        let slot = match counter {
            Counter::TabSwitches => &mut self.tab_switches,
            Counter::FullscreenExits => &mut self.fullscreen_exits,
        };
        *slot = slot.saturating_add(1);
        *slot
    }

    fn limit_reached(&self, effect: Effect) -> Option<BlockReason> {
        let counter = match effect {
            Effect::Count(counter) | Effect::RequestFullscreen(counter) => counter,
            Effect::None | Effect::ClearFullscreenWarning => return None,
        };
        match counter {
            Counter::TabSwitches => self
                .settings
                .tab_switch_limit()
                .filter(|limit| self.tab_switches >= *limit)
                .map(|_| BlockReason::TabSwitchLimit),
            Counter::FullscreenExits => self
                .settings
                .fullscreen_exit_limit()
                .filter(|limit| self.fullscreen_exits >= *limit)
                .map(|_| BlockReason::FullscreenExitLimit),
        }
    }

    pub(crate) fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub(crate) fn settings(&self) -> &ProctoringSettings {
        &self.settings
    }

    pub(crate) fn suppressed_signals(&self) -> Vec<EnvironmentSignal> {
        self.rules.iter().filter(|rule| rule.suppress_default).map(|rule| rule.signal).collect()
    }

    pub(crate) fn violations(&self) -> u32 {
        self.violations
    }

    pub(crate) fn tab_switches(&self) -> u32 {
        self.tab_switches
    }

    pub(crate) fn fullscreen_exits(&self) -> u32 {
        self.fullscreen_exits
    }

    pub(crate) fn fullscreen_warning(&self) -> bool {
        self.fullscreen_warning
    }

    pub(crate) fn fullscreen_requested(&self) -> bool {
        self.fullscreen_requested
    }
}
