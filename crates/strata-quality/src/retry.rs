//! # Retry / Debounce Layer
//!
//! A pure decorator over the state machine's evaluate/apply contract: turns
//! single-sample recommendations into N-of-N confirmations, with an
//! asymmetric "instant recovery" policy for upgrades. Deliberately not
//! merged into the FSM — the FSM stays individually testable with
//! immediate-apply semantics; this wrapper is what the control loop drives
//! in production.

use std::collections::HashMap;

use crate::state_machine::{AdaptiveStateMachine, LinkReading, Recommendation};
use crate::types::QualityState;

/// Retry wrapper configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Consecutive same-target recommendations required before a downgrade
    /// (or, with `instant_recovery` off, an upgrade) is applied.
    pub retry_attempts: u32,
    /// Skip the retry count entirely on upgrade — apply the first
    /// recommendation immediately.
    pub instant_recovery: bool,
    /// Master enable — when `false`, whichever recommendation is non-empty
    /// is applied immediately (downgrade takes priority).
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            retry_attempts: 5,
            instant_recovery: true,
            enabled: true,
        }
    }
}

/// Wraps an [`AdaptiveStateMachine`] with the retry/debounce policy.
pub struct RetryWrapper {
    config: RetryConfig,
    downgrade_counters: HashMap<QualityState, u32>,
    upgrade_counters: HashMap<QualityState, u32>,
}

impl RetryWrapper {
    pub fn new(config: RetryConfig) -> Self {
        RetryWrapper {
            config,
            downgrade_counters: HashMap::new(),
            upgrade_counters: HashMap::new(),
        }
    }

    /// Runs one tick of the wrapper: evaluates both directions on the inner
    /// machine, applies debounce/instant-recovery policy, and applies the
    /// transition on the inner machine when due. Returns the transition
    /// actually applied this tick, if any.
    pub fn tick(
        &mut self,
        fsm: &mut AdaptiveStateMachine,
        reading: LinkReading,
    ) -> Option<Recommendation> {
        let downgrade = fsm.evaluate_downgrade(reading);
        let upgrade = fsm.evaluate_upgrade(reading);

        if !self.config.enabled {
            let chosen = downgrade.or(upgrade)?;
            fsm.apply_transition(chosen.0, &chosen.1);
            return Some(chosen);
        }

        if let Some((target, reason)) = downgrade {
            self.upgrade_counters.clear();
            let count = self.downgrade_counters.entry(target).or_insert(0);
            *count += 1;
            if *count >= self.config.retry_attempts {
                self.downgrade_counters.clear();
                fsm.apply_transition(target, &reason);
                return Some((target, reason));
            }
            return None;
        }

        if let Some((target, reason)) = upgrade {
            self.downgrade_counters.clear();
            if self.config.instant_recovery {
                self.upgrade_counters.clear();
                fsm.apply_transition(target, &reason);
                return Some((target, reason));
            }
            let count = self.upgrade_counters.entry(target).or_insert(0);
            *count += 1;
            if *count >= self.config.retry_attempts {
                self.upgrade_counters.clear();
                fsm.apply_transition(target, &reason);
                return Some((target, reason));
            }
            return None;
        }

        self.downgrade_counters.clear();
        self.upgrade_counters.clear();
        None
    }

    /// Clears all retry counters without touching the inner state machine.
    /// Backs the external "reset retry counters" command.
    pub fn reset_counters(&mut self) {
        self.downgrade_counters.clear();
        self.upgrade_counters.clear();
    }

    /// Snapshot of current counters, keyed by target state — for the
    /// external retry-status endpoint.
    pub fn counters_snapshot(&self) -> (HashMap<QualityState, u32>, HashMap<QualityState, u32>) {
        (self.downgrade_counters.clone(), self.upgrade_counters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn reading(bw_mbps: f64, loss: f64, rtt: f64, subflows: u32) -> LinkReading {
        LinkReading {
            total_bandwidth_bps: bw_mbps * 1_000_000.0,
            packet_loss_percent: loss,
            max_rtt_ms: rtt,
            min_rtt_ms: rtt,
            active_subflows: subflows,
        }
    }

    // ─── Scenario 5: retry debounce ─────────────────────────────────────

    #[test]
    fn scenario_retry_debounce() {
        let clock = Arc::new(VirtualClock::new());
        let mut fsm =
            AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::Medium);
        clock.advance(Duration::from_secs(45));
        let mut wrapper = RetryWrapper::new(RetryConfig {
            retry_attempts: 5,
            instant_recovery: false,
            enabled: true,
        });

        let bad = reading(1.0, 4.0, 10.0, 2);

        // The FSM's own 5s loss-observation window must elapse before it
        // ever recommends a downgrade; only once it starts recommending
        // does the wrapper's 5-confirmation counter start climbing. Drive
        // enough ticks to cover both stacked debounces, asserting no
        // transition applies until the very last one.
        let mut result = None;
        for _ in 0..20 {
            clock.advance(Duration::from_secs(1));
            result = wrapper.tick(&mut fsm, bad);
            if result.is_some() {
                break;
            }
            assert_eq!(fsm.current_state(), QualityState::Medium);
        }
        let (target, _) = result.expect("downgrade should eventually apply");
        assert_eq!(target, QualityState::Low);
        assert_eq!(fsm.current_state(), QualityState::Low);

        // Good conditions: counters reset, no upgrade without further dwell.
        clock.advance(Duration::from_secs(1));
        let good = reading(100.0, 0.0, 10.0, 4);
        let result = wrapper.tick(&mut fsm, good);
        assert!(result.is_none());
        let (down, up) = wrapper.counters_snapshot();
        assert!(down.is_empty());
        assert!(up.is_empty());
    }

    #[test]
    fn instant_recovery_applies_upgrade_immediately() {
        let clock = Arc::new(VirtualClock::new());
        let mut fsm = AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::Low);
        clock.advance(Duration::from_secs(45));
        let mut wrapper = RetryWrapper::new(RetryConfig {
            retry_attempts: 5,
            instant_recovery: true,
            enabled: true,
        });

        let good = reading(10.0, 0.1, 10.0, 4);
        let mut applied = None;
        for _ in 0..120 {
            clock.advance(Duration::from_secs(1));
            applied = wrapper.tick(&mut fsm, good);
            if applied.is_some() {
                break;
            }
        }
        let (target, _) = applied.expect("upgrade should apply on first confirmation");
        assert_eq!(target, QualityState::Recovery);
    }

    #[test]
    fn downgrade_takes_priority_when_both_fire() {
        // Mirrors the open question: downgrade wins when both evaluators
        // return a recommendation on the same tick.
        let clock = Arc::new(VirtualClock::new());
        let mut fsm = AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::High);
        clock.advance(Duration::from_secs(45));
        let mut wrapper = RetryWrapper::new(RetryConfig {
            retry_attempts: 1,
            instant_recovery: true,
            enabled: true,
        });

        // HIGH has no upgrade rule, so to exercise "both fire" we disable
        // retries and rely on downgrade's priority over upgrade at the
        // wrapper level directly. The FSM's own 5s loss-observation window
        // still has to elapse before it recommends anything.
        let bad = reading(1.0, 10.0, 10.0, 2);
        let mut result = None;
        for _ in 0..10 {
            clock.advance(Duration::from_secs(1));
            result = wrapper.tick(&mut fsm, bad);
            if result.is_some() {
                break;
            }
        }
        let (target, _) = result.expect("downgrade should apply once loss has held for 5s");
        assert_eq!(target, QualityState::Medium);
    }
}
