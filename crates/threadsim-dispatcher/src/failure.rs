//! Per-node failure control: scripted radio outages with a configured
//! duration and interval.
//!
//! While a node has a non-zero fail time assigned, the dispatcher rolls a
//! failure onset on every time advance such that the node spends on average
//! `duration / interval` of the time in the failed state. A failed node's
//! radio traffic is suppressed in both directions until recovery.

use threadsim_common::{Prng, SimTime};

/// Failure timing descriptor. `NON_FAIL` disables scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailTime {
    /// Length of one failure period, in µs.
    pub fail_duration: u64,
    /// Mean interval between failure onsets, in µs.
    pub fail_interval: u64,
}

impl FailTime {
    pub const NON_FAIL: FailTime = FailTime {
        fail_duration: 0,
        fail_interval: 0,
    };

    /// Default scripted failure: 10 s down, roughly once a minute.
    pub const DEFAULT: FailTime = FailTime {
        fail_duration: 10_000_000,
        fail_interval: 60_000_000,
    };

    pub fn can_fail(&self) -> bool {
        self.fail_duration > 0 && self.fail_interval > 0
    }
}

/// Outcome of a failure-control advance, applied by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    None,
    Failed,
    Recovered,
}

/// Failure state machine of one node.
#[derive(Debug, Clone)]
pub struct FailureCtrl {
    fail_time: FailTime,
    /// Virtual time at which the current failure period ends.
    recover_at: SimTime,
}

impl FailureCtrl {
    pub fn new(fail_time: FailTime) -> Self {
        FailureCtrl {
            fail_time,
            recover_at: 0,
        }
    }

    pub fn fail_time(&self) -> FailTime {
        self.fail_time
    }

    pub fn set_fail_time(&mut self, fail_time: FailTime) {
        self.fail_time = fail_time;
        self.recover_at = 0;
    }

    /// Advances the failure state from `old_time` to `new_time`. `is_failed`
    /// is the node's current state; the returned transition tells the
    /// dispatcher what to apply.
    pub fn on_time_advanced(
        &mut self,
        old_time: SimTime,
        new_time: SimTime,
        is_failed: bool,
        prng: &mut Prng,
    ) -> FailureTransition {
        if !self.fail_time.can_fail() {
            return FailureTransition::None;
        }
        if is_failed {
            // A manually failed node has no recovery deadline and stays down.
            if self.recover_at > 0 && new_time >= self.recover_at {
                self.recover_at = 0;
                return FailureTransition::Recovered;
            }
            return FailureTransition::None;
        }

        let dt = new_time.saturating_sub(old_time);
        if dt == 0 {
            return FailureTransition::None;
        }
        // Probability of an onset within dt keeps the long-run failed
        // fraction at duration/interval.
        let p = dt as f64 / self.fail_time.fail_interval as f64;
        if prng.next_prob() < p {
            self.recover_at = new_time + self.fail_time.fail_duration;
            return FailureTransition::Failed;
        }
        FailureTransition::None
    }
}
