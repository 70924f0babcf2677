//! # Adaptive Quality State Machine (locked)
//!
//! Time-hysteretic FSM producing quality recommendations from bonded-transport
//! readings. This is a locked production contract: the rule tables, timer
//! constants, and ordering below must not drift from spec.
//!
//! The two `evaluate_*` methods are pure inspectors of `self.context` plus
//! the sampled inputs — they never apply a transition themselves. They DO
//! mutate the outstanding condition tracked in [`StateContext`] for their own
//! direction, since that bookkeeping is how the observation-window timers
//! work; downgrade and upgrade each own an independent timer slot so one
//! evaluator never clears the other's in-progress window. Callers must
//! invoke [`AdaptiveStateMachine::apply_transition`] separately whenever a
//! recommendation is returned.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::types::{QualityPreset, QualityState};

/// Timer constants — locked.
pub mod timers {
    use std::time::Duration;

    pub const MIN_STATE_DWELL: Duration = Duration::from_secs(45);
    pub const RECOVERY_DWELL: Duration = Duration::from_secs(60);
    pub const DOWNGRADE_OBSERVATION_LOSS: Duration = Duration::from_secs(5);
    pub const DOWNGRADE_OBSERVATION_BANDWIDTH: Duration = Duration::from_secs(10);
    pub const UPGRADE_OBSERVATION: Duration = Duration::from_secs(60);
    pub const VERY_LOW_TO_ERROR_OBSERVATION: Duration = Duration::from_secs(20);
    pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(1);
}

/// A named condition being timed toward its observation window.
#[derive(Debug, Clone)]
struct Condition {
    name: &'static str,
    first_seen_at: Duration,
}

/// Which direction a timed condition belongs to. `evaluate_downgrade` and
/// `evaluate_upgrade` both run every tick against the same reading
/// (`RetryWrapper::tick` calls them back to back), so each needs its own
/// timer slot — sharing one meant whichever evaluator's trigger didn't hold
/// this tick would clear the other's in-progress observation window out
/// from under it before its window could ever elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Downgrade,
    Upgrade,
}

/// The state machine's only mutable data.
#[derive(Debug, Clone)]
pub struct StateContext {
    current_state: QualityState,
    previous_state: Option<QualityState>,
    entered_at: Duration,
    downgrade_condition: Option<Condition>,
    upgrade_condition: Option<Condition>,
}

impl StateContext {
    fn new(initial: QualityState, now: Duration) -> Self {
        StateContext {
            current_state: initial,
            previous_state: None,
            entered_at: now,
            downgrade_condition: None,
            upgrade_condition: None,
        }
    }

    fn time_in_state(&self, now: Duration) -> Duration {
        now.saturating_sub(self.entered_at)
    }

    fn slot(&self, direction: Direction) -> &Option<Condition> {
        match direction {
            Direction::Downgrade => &self.downgrade_condition,
            Direction::Upgrade => &self.upgrade_condition,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<Condition> {
        match direction {
            Direction::Downgrade => &mut self.downgrade_condition,
            Direction::Upgrade => &mut self.upgrade_condition,
        }
    }

    fn condition_duration(&self, direction: Direction, now: Duration) -> Duration {
        match self.slot(direction) {
            Some(c) => now.saturating_sub(c.first_seen_at),
            None => Duration::ZERO,
        }
    }

    fn condition_name(&self, direction: Direction) -> Option<&'static str> {
        self.slot(direction).as_ref().map(|c| c.name)
    }

    /// Starts or continues timing `name` in `direction`'s slot. Only resets
    /// the timer when the condition name actually changes (invariant 4).
    fn set_condition(&mut self, direction: Direction, name: &'static str, now: Duration) {
        let already = self.slot(direction).as_ref().is_some_and(|c| c.name == name);
        if !already {
            *self.slot_mut(direction) = Some(Condition {
                name,
                first_seen_at: now,
            });
        }
    }

    fn clear_condition(&mut self, direction: Direction) {
        *self.slot_mut(direction) = None;
    }

    fn transition_to(&mut self, new_state: QualityState, now: Duration) {
        if new_state == QualityState::Recovery {
            self.previous_state = Some(self.current_state);
        } else {
            self.previous_state = None;
        }
        self.current_state = new_state;
        self.entered_at = now;
        self.downgrade_condition = None;
        self.upgrade_condition = None;
    }
}

/// Inputs the downgrade/upgrade evaluators consume each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkReading {
    pub total_bandwidth_bps: f64,
    pub packet_loss_percent: f64,
    /// Used by downgrade evaluation.
    pub max_rtt_ms: f64,
    /// Used by upgrade evaluation.
    pub min_rtt_ms: f64,
    pub active_subflows: u32,
}

/// A pending quality recommendation: `(target, human-readable reason)`.
pub type Recommendation = (QualityState, String);

/// The locked adaptive quality state machine.
pub struct AdaptiveStateMachine {
    clock: Arc<dyn Clock>,
    context: StateContext,
}

impl AdaptiveStateMachine {
    /// Creates the machine with the default initial state (`MEDIUM`).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_initial_state(clock, QualityState::Medium)
    }

    pub fn with_initial_state(clock: Arc<dyn Clock>, initial: QualityState) -> Self {
        let now = clock.now();
        let context = StateContext::new(initial, now);
        tracing::info!(state = %initial, "state machine initialized");
        AdaptiveStateMachine { clock, context }
    }

    pub fn current_state(&self) -> QualityState {
        self.context.current_state
    }

    pub fn current_preset(&self) -> QualityPreset {
        self.context.current_state.preset()
    }

    pub fn previous_state(&self) -> Option<QualityState> {
        self.context.previous_state
    }

    pub fn time_in_state(&self) -> Duration {
        self.context.time_in_state(self.clock.now())
    }

    /// Read-only snapshot for external status reporting — one atomic read.
    pub fn snapshot(&self) -> crate::types::StatusSnapshot {
        crate::types::StatusSnapshot {
            current_state: self.context.current_state,
            previous_state: self.context.previous_state,
            preset: self.context.current_state.preset(),
            time_in_state_secs: self.time_in_state().as_secs_f64(),
        }
    }

    /// Evaluate downgrade conditions. Pure inspector besides condition
    /// bookkeeping; does not mutate `current_state`.
    pub fn evaluate_downgrade(&mut self, reading: LinkReading) -> Option<Recommendation> {
        let now = self.clock.now();

        // Zero-subflow bypass: the one override to the dwell pre-gate.
        if reading.active_subflows == 0 {
            return Some((QualityState::Error, "Both uplinks failed".to_string()));
        }

        if self.context.time_in_state(now) < timers::MIN_STATE_DWELL {
            return None;
        }

        match self.context.current_state {
            QualityState::High => {
                if reading.packet_loss_percent > 2.0 {
                    self.context.set_condition(Direction::Downgrade, "high_packet_loss", now);
                    if self.context.condition_duration(Direction::Downgrade, now) >= timers::DOWNGRADE_OBSERVATION_LOSS
                    {
                        return Some((
                            QualityState::Medium,
                            format!(
                                "Packet loss {:.1}% >2% for 5s",
                                reading.packet_loss_percent
                            ),
                        ));
                    }
                } else if reading.total_bandwidth_bps < 5_000_000.0 {
                    self.context.set_condition(Direction::Downgrade, "high_low_bandwidth", now);
                    if self.context.condition_duration(Direction::Downgrade, now)
                        >= timers::DOWNGRADE_OBSERVATION_BANDWIDTH
                    {
                        return Some((
                            QualityState::Medium,
                            format!(
                                "Bandwidth {:.2} Mbps <5 Mbps for 10s",
                                reading.total_bandwidth_bps / 1e6
                            ),
                        ));
                    }
                } else {
                    self.context.clear_condition(Direction::Downgrade);
                }
            }
            QualityState::Medium => {
                if reading.packet_loss_percent > 3.0 {
                    self.context.set_condition(Direction::Downgrade, "medium_packet_loss", now);
                    if self.context.condition_duration(Direction::Downgrade, now) >= timers::DOWNGRADE_OBSERVATION_LOSS
                    {
                        return Some((
                            QualityState::Low,
                            format!(
                                "Packet loss {:.1}% >3% for 5s",
                                reading.packet_loss_percent
                            ),
                        ));
                    }
                } else if reading.total_bandwidth_bps < 3_000_000.0 {
                    self.context.set_condition(Direction::Downgrade, "medium_low_bandwidth", now);
                    if self.context.condition_duration(Direction::Downgrade, now)
                        >= timers::DOWNGRADE_OBSERVATION_BANDWIDTH
                    {
                        return Some((
                            QualityState::Low,
                            format!(
                                "Bandwidth {:.2} Mbps <3 Mbps for 10s",
                                reading.total_bandwidth_bps / 1e6
                            ),
                        ));
                    }
                } else {
                    self.context.clear_condition(Direction::Downgrade);
                }
            }
            QualityState::Low => {
                if reading.packet_loss_percent > 5.0 {
                    self.context.set_condition(Direction::Downgrade, "low_packet_loss", now);
                    if self.context.condition_duration(Direction::Downgrade, now) >= timers::DOWNGRADE_OBSERVATION_LOSS
                    {
                        return Some((
                            QualityState::VeryLow,
                            format!(
                                "Packet loss {:.1}% >5% for 5s",
                                reading.packet_loss_percent
                            ),
                        ));
                    }
                } else if reading.total_bandwidth_bps < 1_500_000.0 {
                    self.context.set_condition(Direction::Downgrade, "low_low_bandwidth", now);
                    if self.context.condition_duration(Direction::Downgrade, now)
                        >= timers::DOWNGRADE_OBSERVATION_BANDWIDTH
                    {
                        return Some((
                            QualityState::VeryLow,
                            format!(
                                "Bandwidth {:.2} Mbps <1.5 Mbps for 10s",
                                reading.total_bandwidth_bps / 1e6
                            ),
                        ));
                    }
                } else {
                    self.context.clear_condition(Direction::Downgrade);
                }
            }
            QualityState::VeryLow => {
                if reading.total_bandwidth_bps < 500_000.0 {
                    self.context.set_condition(Direction::Downgrade, "very_low_critical", now);
                    if self.context.condition_duration(Direction::Downgrade, now)
                        >= timers::VERY_LOW_TO_ERROR_OBSERVATION
                    {
                        return Some((
                            QualityState::Error,
                            format!(
                                "Bandwidth {:.2} Mbps <0.5 Mbps for 20s",
                                reading.total_bandwidth_bps / 1e6
                            ),
                        ));
                    }
                } else {
                    self.context.clear_condition(Direction::Downgrade);
                }
            }
            QualityState::Recovery | QualityState::Error => {
                // No downgrade rule defined for these states.
            }
        }

        None
    }

    /// Evaluate upgrade conditions. `ERROR` is terminal for upgrade.
    pub fn evaluate_upgrade(&mut self, reading: LinkReading) -> Option<Recommendation> {
        let now = self.clock.now();
        let current = self.context.current_state;

        if current == QualityState::Error {
            return None;
        }

        if self.context.time_in_state(now) < timers::MIN_STATE_DWELL {
            return None;
        }

        match current {
            QualityState::Recovery => {
                if self.context.time_in_state(now) >= timers::RECOVERY_DWELL {
                    let target = match self.context.previous_state {
                        Some(QualityState::VeryLow) => QualityState::Low,
                        Some(QualityState::Low) => QualityState::Medium,
                        Some(QualityState::Medium) => QualityState::High,
                        _ => return None,
                    };
                    let prev = self.context.previous_state.unwrap();
                    return Some((
                        target,
                        format!("Recovery complete, upgrading from {prev}"),
                    ));
                }
                None
            }
            QualityState::VeryLow => self.evaluate_upgrade_condition(
                reading,
                "very_low_upgrade",
                2_500_000.0,
                1.0,
                100.0,
            ),
            QualityState::Low => {
                self.evaluate_upgrade_condition(reading, "low_upgrade", 4_500_000.0, 0.5, 80.0)
            }
            QualityState::Medium => {
                self.evaluate_upgrade_condition(reading, "medium_upgrade", 7_000_000.0, 0.5, 100.0)
            }
            QualityState::High | QualityState::Error => None,
        }
    }

    fn evaluate_upgrade_condition(
        &mut self,
        reading: LinkReading,
        condition_name: &'static str,
        bandwidth_floor_bps: f64,
        loss_ceiling_percent: f64,
        min_rtt_ceiling_ms: f64,
    ) -> Option<Recommendation> {
        let now = self.clock.now();
        let holds = reading.total_bandwidth_bps > bandwidth_floor_bps
            && reading.packet_loss_percent < loss_ceiling_percent
            && reading.min_rtt_ms < min_rtt_ceiling_ms;

        if holds {
            self.context.set_condition(Direction::Upgrade, condition_name, now);
            if self.context.condition_duration(Direction::Upgrade, now) >= timers::UPGRADE_OBSERVATION {
                return Some((QualityState::Recovery, "Network stable for 60s".to_string()));
            }
        } else {
            self.context.clear_condition(Direction::Upgrade);
        }
        None
    }

    /// Applies a transition: resets dwell time and clears any outstanding
    /// condition. Applying the current state again is a no-op on
    /// `current_state`/`previous_state` but still resets `time_in_state`,
    /// matching `transition_to`'s unconditional `entered_at` reset.
    pub fn apply_transition(&mut self, target: QualityState, reason: &str) {
        let now = self.clock.now();
        let from = self.context.current_state;
        tracing::info!(%from, to = %target, reason, "TRANSITION");
        self.context.transition_to(target, now);
    }

    /// Exposed for tests; not part of the locked evaluate/apply contract.
    #[cfg(test)]
    fn downgrade_condition_name(&self) -> Option<&'static str> {
        self.context.condition_name(Direction::Downgrade)
    }

    #[cfg(test)]
    fn upgrade_condition_name(&self) -> Option<&'static str> {
        self.context.condition_name(Direction::Upgrade)
    }
}
