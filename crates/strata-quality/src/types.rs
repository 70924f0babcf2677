//! Value objects shared across the control plane: quality states and
//! presets (locked contract), and the transport/ingest/aggregated sample
//! shapes the state machine and aggregator consume.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The six quality tiers the encoder can be driven into. Closed enumeration —
/// locked production contract, see the preset table in [`QualityState::preset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityState {
    High,
    Medium,
    Low,
    VeryLow,
    Recovery,
    Error,
}

impl QualityState {
    /// All states, in preset-table order.
    pub const ALL: [QualityState; 6] = [
        QualityState::High,
        QualityState::Medium,
        QualityState::Low,
        QualityState::VeryLow,
        QualityState::Recovery,
        QualityState::Error,
    ];

    /// The preset this state maps to. Presets are immutable constants, not
    /// configuration — callers receive an owned copy, never a mutable alias.
    pub const fn preset(self) -> QualityPreset {
        match self {
            QualityState::High => QualityPreset {
                resolution: "1920x1080",
                framerate: 30,
                bitrate_kbps: 4500,
                encoder_preset: "veryfast",
            },
            QualityState::Medium => QualityPreset {
                resolution: "1280x720",
                framerate: 30,
                bitrate_kbps: 2500,
                encoder_preset: "veryfast",
            },
            QualityState::Low => QualityPreset {
                resolution: "854x480",
                framerate: 24,
                bitrate_kbps: 1200,
                encoder_preset: "fast",
            },
            QualityState::VeryLow => QualityPreset {
                resolution: "640x360",
                framerate: 24,
                bitrate_kbps: 600,
                encoder_preset: "fast",
            },
            QualityState::Recovery => QualityPreset {
                resolution: "1280x720",
                framerate: 30,
                bitrate_kbps: 2500,
                encoder_preset: "veryfast",
            },
            QualityState::Error => QualityPreset {
                resolution: "640x360",
                framerate: 15,
                bitrate_kbps: 300,
                encoder_preset: "ultrafast",
            },
        }
    }
}

impl std::fmt::Display for QualityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityState::High => "HIGH",
            QualityState::Medium => "MEDIUM",
            QualityState::Low => "LOW",
            QualityState::VeryLow => "VERY_LOW",
            QualityState::Recovery => "RECOVERY",
            QualityState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Static encoder configuration for a [`QualityState`]. Contract, not
/// configuration — never mutated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub resolution: &'static str,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub encoder_preset: &'static str,
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}fps {}kbps",
            self.resolution, self.framerate, self.bitrate_kbps
        )
    }
}

/// A bonded-transport sample, normalised from either a multipath-TCP feed
/// or a bonded-SRT aggregator. Missing fields are `None`, never zero — a
/// link reporting zero loss and an unknown link reporting no loss figure
/// must stay distinguishable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransportSample {
    pub total_bandwidth_bps: Option<f64>,
    pub packet_loss_percent: Option<f64>,
    pub min_rtt_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub active_subflows: Option<u32>,
    #[serde(skip)]
    pub timestamp: Option<Duration>,
}

/// A sample from the ingest poller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestSample {
    pub bitrate_kbps: f64,
    pub connection_active: bool,
    pub rtt_ms: Option<f64>,
    #[serde(skip)]
    pub timestamp: Option<Duration>,
}

/// Which upstream source(s) backed an [`AggregatedSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricSource {
    Transport,
    Ingest,
    Both,
    Neither,
}

/// Overall health assessment of the current delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
    Unknown,
}

/// The fused view the dual-source aggregator produces each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggregatedSample {
    pub transport: TransportSample,
    pub ingest: Option<IngestSample>,
    pub health_status: HealthStatus,
    pub health_score: u8,
    pub primary_source: MetricSource,
    pub divergence_detected: bool,
}

/// Read-only view of the state machine, assembled under a single atomic
/// read so an external status endpoint never observes a torn combination
/// of state/preset/dwell time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub current_state: QualityState,
    pub previous_state: Option<QualityState>,
    pub preset: QualityPreset,
    pub time_in_state_secs: f64,
}

/// Emitted whenever [`crate::state_machine::AdaptiveStateMachine::apply_transition`]
/// fires; this is what the control loop fans out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub from: QualityState,
    pub to: QualityState,
    pub reason: String,
}
