//! Adaptive quality control plane for a bonded-uplink IRL streaming rig.
//!
//! Four pieces compose into the loop [`control_loop::ControlLoop`] drives:
//! the locked [`state_machine::AdaptiveStateMachine`], the
//! [`retry::RetryWrapper`] debounce layer around it, the
//! [`aggregator::MetricsAggregator`] fusing transport and ingest samples,
//! and the [`ingest::IngestPoller`] that produces the ingest side of that
//! fusion.

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod ingest;
pub mod retry;
pub mod state_machine;
pub mod subscriber;
pub mod types;

pub use aggregator::{AggregatorThresholds, MetricsAggregator};
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::Config;
pub use control_loop::{ControlLoop, ControlLoopHandle, TransportSampler};
pub use error::{ConfigError, PollError};
pub use ingest::{IngestPoller, IngestPollerConfig, ServerType};
pub use retry::{RetryConfig, RetryWrapper};
pub use state_machine::{AdaptiveStateMachine, LinkReading, Recommendation};
pub use types::{
    AggregatedSample, HealthStatus, IngestSample, MetricSource, QualityPreset, QualityState,
    StatusSnapshot, TransitionEvent, TransportSample,
};
