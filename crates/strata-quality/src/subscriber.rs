//! Transition fan-out seams: anything downstream of a quality transition
//! (an encoder control surface, a broadcast-scene switcher, a dashboard)
//! implements [`TransitionSink`] or [`BroadcastToolClient`] rather than
//! being wired into the control loop directly.

use crate::types::{QualityPreset, QualityState, TransitionEvent};

/// Notified once per applied transition. Implementations must not block the
/// control loop — do I/O on a spawned task if it can be slow.
pub trait TransitionSink: Send + Sync {
    fn on_transition(&self, event: &TransitionEvent);
}

/// Drops every event. Default when no downstream integration is configured.
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        tracing::info!("transition sink: none configured (state changes are log-only)");
        NullSink
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionSink for NullSink {
    fn on_transition(&self, _event: &TransitionEvent) {}
}

/// Logs every transition at info level. Useful standalone or layered
/// alongside a real sink during bring-up.
pub struct LoggingSink;

impl LoggingSink {
    pub fn new() -> Self {
        LoggingSink
    }
}

impl Default for LoggingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionSink for LoggingSink {
    fn on_transition(&self, event: &TransitionEvent) {
        tracing::info!(
            from = %event.from,
            to = %event.to,
            reason = %event.reason,
            "subscriber observed transition"
        );
    }
}

/// A scene-switching broadcast tool (e.g. an OBS WebSocket bridge) driven by
/// quality transitions. The control plane talks to one through this trait so
/// the specific tool's wire protocol never leaks into `control_loop`. Returns
/// a `Result` so reconnect/backoff can be layered externally without the
/// control loop itself needing to know about it.
pub trait BroadcastToolClient: Send + Sync {
    fn on_quality_change(&self, state: QualityState, preset: &QualityPreset) -> anyhow::Result<()>;
}

/// No broadcast tool configured — quality changes are logged, not sent.
pub struct NullBroadcastToolClient;

impl NullBroadcastToolClient {
    pub fn new() -> Self {
        tracing::info!("broadcast tool: none configured (scene switches are log-only)");
        NullBroadcastToolClient
    }
}

impl Default for NullBroadcastToolClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastToolClient for NullBroadcastToolClient {
    fn on_quality_change(&self, state: QualityState, preset: &QualityPreset) -> anyhow::Result<()> {
        tracing::debug!(
            %state,
            resolution = %preset.resolution,
            "scene switch suppressed: no broadcast tool configured"
        );
        Ok(())
    }
}
