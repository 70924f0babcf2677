//! # Ingest Poller
//!
//! Polls the streaming server's own stats endpoint on a timer to get ground
//! truth about the bitrate actually received at the ingest point, as a check
//! against the bonded-transport sample which only sees the network layer.
//! Supports the three ingest server flavors in common IRL use: nginx-rtmp
//! (XML), a generic SRT relay (JSON), and node-media-server (JSON).

mod node_media;
mod nginx;
mod srt;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::error::PollError;
use crate::types::IngestSample;

/// Which ingest server flavor to poll, and how to interpret its stats
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Nginx,
    Srt,
    NodeMediaServer,
}

impl ServerType {
    pub fn parse(raw: &str) -> Result<Self, PollError> {
        match raw.to_ascii_lowercase().as_str() {
            "nginx" => Ok(ServerType::Nginx),
            "srt" => Ok(ServerType::Srt),
            "node-media-server" => Ok(ServerType::NodeMediaServer),
            other => Err(PollError::UnsupportedServerType(other.to_string())),
        }
    }
}

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct IngestPollerConfig {
    pub stats_url: String,
    pub stream_key: String,
    pub poll_interval: Duration,
    pub server_type: ServerType,
}

/// Polls an ingest server's stats endpoint and caches the latest sample.
/// `get_latest` is lock-free — the control loop reads a snapshot every tick
/// without contending with the poll task writing a new one.
pub struct IngestPoller {
    config: IngestPollerConfig,
    client: reqwest::Client,
    latest: ArcSwapOption<IngestSample>,
    total_polls: std::sync::atomic::AtomicU64,
    poll_failures: std::sync::atomic::AtomicU64,
}

impl IngestPoller {
    pub fn new(config: IngestPollerConfig) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(IngestPoller {
            config,
            client,
            latest: ArcSwapOption::empty(),
            total_polls: std::sync::atomic::AtomicU64::new(0),
            poll_failures: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Most recently cached sample, if at least one poll has succeeded.
    pub fn latest(&self) -> Option<IngestSample> {
        self.latest.load_full().map(|arc| *arc)
    }

    pub fn total_polls(&self) -> u64 {
        self.total_polls.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn poll_failures(&self) -> u64 {
        self.poll_failures.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// `(total - failures) / total * 100`, or `100.0` before the first poll.
    pub fn success_rate_percent(&self) -> f64 {
        let total = self.total_polls();
        if total == 0 {
            return 100.0;
        }
        let failures = self.poll_failures();
        (total - failures) as f64 / total as f64 * 100.0
    }

    /// Runs the polling loop until `shutdown` fires. Failures are counted
    /// and logged, never propagated — a flaky stats endpoint must not take
    /// down the control plane.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Polls the configured endpoint exactly once and updates the cache.
    pub async fn poll_once(&self) {
        self.total_polls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let result = match self.config.server_type {
            ServerType::Nginx => nginx::poll(&self.client, &self.config).await,
            ServerType::Srt => srt::poll(&self.client, &self.config).await,
            ServerType::NodeMediaServer => node_media::poll(&self.client, &self.config).await,
        };

        match result {
            Ok(sample) => {
                tracing::debug!(
                    bitrate_kbps = sample.bitrate_kbps,
                    active = sample.connection_active,
                    "ingest poll succeeded"
                );
                self.latest.store(Some(Arc::new(sample)));
            }
            Err(err) => {
                self.poll_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!(error = %err, "ingest poll failed");
            }
        }
    }
}
