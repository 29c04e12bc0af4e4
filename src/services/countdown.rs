//! Authoritative attempt clock.
//!
//! The countdown is a plain value owned by the session controller; the 1 Hz driver
//! only calls [`Countdown::tick`]. It is seeded once and reports expiry exactly once.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerState {
    pub(crate) remaining: u64,
    pub(crate) running: bool,
    pub(crate) has_fired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Not running: never started, cancelled, or already expired.
    Idle,
    Ticked { remaining: u64 },
    Expired,
}

#[derive(Debug, Default)]
pub(crate) struct Countdown {
    state: Option<TimerState>,
}

impl Countdown {
    /// Seeds the clock. Returns `false` and leaves the clock untouched if it was seeded before.
    pub(crate) fn seed(&mut self, seconds: u64) -> bool {
        if self.state.is_some() {
            return false;
        }
        self.state = Some(TimerState { remaining: seconds, running: false, has_fired: false });
        true
    }

    /// Starts ticking. A clock seeded with zero expires right here, without a tick.
    pub(crate) fn start(&mut self) -> TickOutcome {
        let Some(state) = self.state.as_mut() else {
            return TickOutcome::Idle;
        };
        if state.running || state.has_fired {
            return TickOutcome::Idle;
        }
        if state.remaining == 0 {
            state.has_fired = true;
            return TickOutcome::Expired;
        }
        state.running = true;
        TickOutcome::Ticked { remaining: state.remaining }
    }

    pub(crate) fn tick(&mut self) -> TickOutcome {
        let Some(state) = self.state.as_mut() else {
            return TickOutcome::Idle;
        };
        if !state.running {
            return TickOutcome::Idle;
        }

        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining > 0 {
            return TickOutcome::Ticked { remaining: state.remaining };
        }

        state.running = false;
        if state.has_fired {
            return TickOutcome::Idle;
        }
        state.has_fired = true;
        TickOutcome::Expired
    }

    /// Stops ticking without reporting expiry.
    pub(crate) fn cancel(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.running = false;
        }
    }

    pub(crate) fn remaining(&self) -> Option<u64> {
        self.state.map(|state| state.remaining)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.is_some_and(|state| state.running)
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.state.is_some_and(|state| state.has_fired)
    }
}
