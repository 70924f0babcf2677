//! Wires the state machine, retry/debounce layer, dual-source aggregator,
//! and ingest poller together into the 1Hz evaluation loop the rest of the
//! crate exists to drive.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, watch};

use crate::aggregator::{AggregatorThresholds, MetricsAggregator};
use crate::clock::Clock;
use crate::ingest::IngestPoller;
use crate::retry::{RetryConfig, RetryWrapper};
use crate::state_machine::{AdaptiveStateMachine, LinkReading};
use crate::subscriber::{BroadcastToolClient, TransitionSink};
use crate::types::{StatusSnapshot, TransitionEvent};

/// Feeds the loop its transport-side reading each tick. Implemented by
/// whatever actually reads the bonded transport — a kernel MPTCP stats
/// socket, a bonded-SRT aggregator, or (in tests) a fixed or scripted
/// sequence.
pub trait TransportSampler: Send + Sync {
    fn sample(&self) -> LinkReading;
}

/// Cheaply cloneable external handle to a running [`ControlLoop`]. Obtained
/// via [`ControlLoop::handle`] before the loop is moved into its driving
/// task, so a status endpoint (or a reset-retry-counters command) stays
/// reachable for the loop's whole lifetime instead of being severed the
/// moment `run` takes ownership.
#[derive(Clone)]
pub struct ControlLoopHandle {
    status: Arc<ArcSwap<StatusSnapshot>>,
    transitions_tx: broadcast::Sender<TransitionEvent>,
    reset_tx: mpsc::UnboundedSender<()>,
}

impl ControlLoopHandle {
    /// Current state machine status, assembled under one atomic read.
    pub fn snapshot(&self) -> StatusSnapshot {
        **self.status.load()
    }

    /// Subscribe to applied transitions without going through a
    /// [`TransitionSink`] — useful for an external status API that wants a
    /// push feed.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.transitions_tx.subscribe()
    }

    /// Requests the retry/debounce counters be cleared on the next tick.
    /// Silently dropped if the loop has already shut down.
    pub fn reset_retry_counters(&self) {
        let _ = self.reset_tx.send(());
    }
}

/// Everything the control loop needs, already constructed. Kept as a single
/// struct so `run` takes one argument instead of a long parameter list.
pub struct ControlLoop {
    clock: Arc<dyn Clock>,
    fsm: AdaptiveStateMachine,
    retry: RetryWrapper,
    aggregator: MetricsAggregator,
    transport: Arc<dyn TransportSampler>,
    ingest: Option<Arc<IngestPoller>>,
    sinks: Vec<Arc<dyn TransitionSink>>,
    broadcast_tool: Arc<dyn BroadcastToolClient>,
    transitions_tx: broadcast::Sender<TransitionEvent>,
    status: Arc<ArcSwap<StatusSnapshot>>,
    reset_tx: mpsc::UnboundedSender<()>,
    reset_rx: mpsc::UnboundedReceiver<()>,
}

impl ControlLoop {
    pub fn new(
        clock: Arc<dyn Clock>,
        fsm: AdaptiveStateMachine,
        retry_config: RetryConfig,
        aggregator_thresholds: AggregatorThresholds,
        transport: Arc<dyn TransportSampler>,
        ingest: Option<Arc<IngestPoller>>,
        sinks: Vec<Arc<dyn TransitionSink>>,
        broadcast_tool: Arc<dyn BroadcastToolClient>,
    ) -> Self {
        let (transitions_tx, _) = broadcast::channel(32);
        let (reset_tx, reset_rx) = mpsc::unbounded_channel();
        let status = Arc::new(ArcSwap::from_pointee(fsm.snapshot()));
        ControlLoop {
            clock,
            fsm,
            retry: RetryWrapper::new(retry_config),
            aggregator: MetricsAggregator::new(aggregator_thresholds),
            transport,
            ingest,
            sinks,
            broadcast_tool,
            transitions_tx,
            status,
            reset_tx,
            reset_rx,
        }
    }

    /// A cloneable handle that outlives `run` taking this loop by value,
    /// unlike reaching for `&self` after the loop has been moved onto its
    /// own task.
    pub fn handle(&self) -> ControlLoopHandle {
        ControlLoopHandle {
            status: self.status.clone(),
            transitions_tx: self.transitions_tx.clone(),
            reset_tx: self.reset_tx.clone(),
        }
    }

    /// Subscribe to applied transitions without going through a
    /// [`TransitionSink`] — useful for an external status API that wants a
    /// push feed.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.transitions_tx.subscribe()
    }

    /// Current state machine status, for a synchronous status endpoint.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.fsm.snapshot()
    }

    /// Runs one evaluation tick: reads the transport sample, feeds it
    /// (alongside the cached ingest sample, if any) to the aggregator for
    /// fused health accounting, then drives the retry-wrapped state machine
    /// and fans out any applied transition. Exposed separately from `run`
    /// so tests can drive ticks directly against a virtual clock instead of
    /// waiting on a real timer.
    pub fn tick(&mut self) {
        let transport_reading = self.transport.sample();
        let ingest_sample = self.ingest.as_ref().and_then(|p| p.latest());

        let transport_sample = crate::types::TransportSample {
            total_bandwidth_bps: Some(transport_reading.total_bandwidth_bps),
            packet_loss_percent: Some(transport_reading.packet_loss_percent),
            min_rtt_ms: Some(transport_reading.min_rtt_ms),
            max_rtt_ms: Some(transport_reading.max_rtt_ms),
            active_subflows: Some(transport_reading.active_subflows),
            timestamp: Some(self.clock.now()),
        };
        self.aggregator.aggregate(transport_sample, ingest_sample);

        let before = self.fsm.current_state();
        if let Some((target, reason)) = self.retry.tick(&mut self.fsm, transport_reading) {
            let event = TransitionEvent {
                from: before,
                to: target,
                reason,
            };
            for sink in &self.sinks {
                sink.on_transition(&event);
            }
            if let Err(err) = self.broadcast_tool.on_quality_change(target, &target.preset()) {
                tracing::warn!(error = %err, "broadcast tool notification failed");
            }
            let _ = self.transitions_tx.send(event);
        }

        self.status.store(Arc::new(self.fsm.snapshot()));
    }

    /// Runs the 1Hz evaluation loop until `shutdown` fires. Takes `&mut
    /// self` rather than consuming the loop so a [`ControlLoopHandle`]
    /// obtained beforehand stays valid for the loop's whole lifetime — the
    /// caller keeps the `ControlLoop` alive (typically by moving it into the
    /// spawned task's `async move` block) while still holding a handle.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(crate::state_machine::timers::EVALUATION_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                Some(()) = self.reset_rx.recv() => {
                    self.retry.reset_counters();
                    tracing::debug!("retry counters reset via external command");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("control loop shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// A transport sampler that always returns the same reading — useful for
/// smoke tests and as documentation of the trait's contract.
pub struct FixedTransportSampler(pub LinkReading);

impl TransportSampler for FixedTransportSampler {
    fn sample(&self) -> LinkReading {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::subscriber::{NullBroadcastToolClient, NullSink};
    use crate::types::QualityState;

    fn good_reading() -> LinkReading {
        LinkReading {
            total_bandwidth_bps: 8_000_000.0,
            packet_loss_percent: 0.1,
            max_rtt_ms: 20.0,
            min_rtt_ms: 20.0,
            active_subflows: 2,
        }
    }

    #[test]
    fn tick_with_healthy_reading_produces_no_transition() {
        let clock = Arc::new(VirtualClock::new());
        let fsm = AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::High);
        let mut loop_ = ControlLoop::new(
            clock.clone(),
            fsm,
            RetryConfig::default(),
            AggregatorThresholds::default(),
            Arc::new(FixedTransportSampler(good_reading())),
            None,
            vec![Arc::new(NullSink::new())],
            Arc::new(NullBroadcastToolClient::new()),
        );

        let mut rx = loop_.subscribe();
        loop_.tick();
        assert_eq!(loop_.snapshot().current_state, QualityState::High);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sustained_zero_subflow_reading_eventually_applies_downgrade() {
        let clock = Arc::new(VirtualClock::new());
        let fsm = AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::High);
        let mut loop_ = ControlLoop::new(
            clock.clone(),
            fsm,
            RetryConfig {
                retry_attempts: 1,
                instant_recovery: true,
                enabled: true,
            },
            AggregatorThresholds::default(),
            Arc::new(FixedTransportSampler(LinkReading {
                total_bandwidth_bps: 0.0,
                packet_loss_percent: 100.0,
                max_rtt_ms: 999.0,
                min_rtt_ms: 999.0,
                active_subflows: 0,
            })),
            None,
            vec![],
            Arc::new(NullBroadcastToolClient::new()),
        );

        clock.advance(Duration::from_secs(1));
        loop_.tick();
        assert_eq!(loop_.snapshot().current_state, QualityState::Error);
    }

    #[test]
    fn handle_reflects_latest_published_status() {
        let clock = Arc::new(VirtualClock::new());
        let fsm = AdaptiveStateMachine::with_initial_state(clock.clone(), QualityState::High);
        let mut loop_ = ControlLoop::new(
            clock.clone(),
            fsm,
            RetryConfig::default(),
            AggregatorThresholds::default(),
            Arc::new(FixedTransportSampler(good_reading())),
            None,
            vec![],
            Arc::new(NullBroadcastToolClient::new()),
        );

        let handle = loop_.handle();
        assert_eq!(handle.snapshot().current_state, QualityState::High);
        loop_.tick();
        assert_eq!(handle.snapshot().current_state, QualityState::High);
    }
}
