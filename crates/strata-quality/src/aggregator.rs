//! # Dual-Source Metrics Aggregator
//!
//! Fuses the bonded-transport sample (proactive, network layer) with the
//! ingest poller's sample (reactive, application layer verification) into a
//! single [`AggregatedSample`] per tick. Transport metrics answer "is the
//! link healthy"; ingest metrics answer "is the encoder actually landing
//! bytes at the server" — the two can diverge when the link looks fine but
//! the local encoder has stalled or the wrong bitrate is configured.

use tracing::warn;

use crate::types::{AggregatedSample, HealthStatus, IngestSample, MetricSource, TransportSample};

/// Thresholds the aggregator scores against. Mirrors the bitrate ladder the
/// state machine itself uses so a HIGH-health reading and a HIGH-preset
/// bitrate agree on what "good" means.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorThresholds {
    pub low_bitrate_kbps: f64,
    pub offline_bitrate_kbps: f64,
    pub rtt_threshold_ms: f64,
}

impl Default for AggregatorThresholds {
    fn default() -> Self {
        AggregatorThresholds {
            low_bitrate_kbps: 500.0,
            offline_bitrate_kbps: 450.0,
            rtt_threshold_ms: 1000.0,
        }
    }
}

/// Combines the two upstream samples into a fused view and tracks advisory
/// state (`should_downgrade`) for callers that want a second opinion
/// alongside the locked state machine's own evaluation.
pub struct MetricsAggregator {
    thresholds: AggregatorThresholds,
    last: Option<AggregatedSample>,
}

impl MetricsAggregator {
    pub fn new(thresholds: AggregatorThresholds) -> Self {
        MetricsAggregator {
            thresholds,
            last: None,
        }
    }

    /// Fuses one tick's samples. `ingest` is `None` when the poller is
    /// disabled or hasn't produced a sample yet — transport-only operation
    /// degrades gracefully to [`MetricSource::Transport`].
    pub fn aggregate(
        &mut self,
        transport: TransportSample,
        ingest: Option<IngestSample>,
    ) -> AggregatedSample {
        let primary_source = self.determine_primary_source(transport, ingest);
        let health_status = self.assess_health(transport, ingest, primary_source);
        let health_score = self.calculate_health_score(transport, ingest);
        let divergence_detected = self.detect_divergence(transport, ingest, primary_source);

        let sample = AggregatedSample {
            transport,
            ingest,
            health_status,
            health_score,
            primary_source,
            divergence_detected,
        };

        if sample.divergence_detected {
            warn!(
                transport_bps = ?transport.total_bandwidth_bps,
                ingest_kbps = ?ingest.map(|i| i.bitrate_kbps),
                "metric divergence between transport and ingest sources"
            );
        }

        self.last = Some(sample);
        sample
    }

    /// Most recent fused sample, if `aggregate` has run at least once.
    pub fn latest(&self) -> Option<AggregatedSample> {
        self.last
    }

    /// A second opinion on whether quality should drop, independent of the
    /// state machine's own locked thresholds — callers may use this to flag
    /// a discrepancy rather than to drive a transition directly.
    pub fn should_downgrade(&self) -> (bool, MetricSource) {
        let Some(sample) = self.last else {
            return (false, MetricSource::Neither);
        };

        if let Some(ingest) = sample.ingest {
            if ingest.bitrate_kbps < self.thresholds.low_bitrate_kbps {
                return (true, MetricSource::Ingest);
            }
        }

        if let Some(bw) = sample.transport.total_bandwidth_bps {
            if bw < 500_000.0 {
                return (true, MetricSource::Transport);
            }
        }

        if matches!(
            sample.health_status,
            HealthStatus::Critical | HealthStatus::Offline
        ) {
            return (true, sample.primary_source);
        }

        (false, MetricSource::Neither)
    }

    fn determine_primary_source(
        &self,
        transport: TransportSample,
        ingest: Option<IngestSample>,
    ) -> MetricSource {
        let has_transport = transport.total_bandwidth_bps.is_some();
        let has_ingest = ingest.is_some();

        match (has_transport, has_ingest) {
            (true, true) => MetricSource::Both,
            (true, false) => MetricSource::Transport,
            (false, true) => MetricSource::Ingest,
            (false, false) => MetricSource::Neither,
        }
    }

    fn assess_health(
        &self,
        transport: TransportSample,
        ingest: Option<IngestSample>,
        _primary: MetricSource,
    ) -> HealthStatus {
        if let Some(ingest) = ingest {
            if !ingest.connection_active {
                return HealthStatus::Offline;
            }
        }

        let bitrate_kbps = effective_bitrate_kbps(transport, ingest);
        let Some(bitrate_kbps) = bitrate_kbps else {
            return HealthStatus::Unknown;
        };

        if bitrate_kbps < self.thresholds.offline_bitrate_kbps {
            HealthStatus::Offline
        } else if bitrate_kbps < self.thresholds.low_bitrate_kbps {
            HealthStatus::Critical
        } else if self.has_degraded_metrics(transport, ingest) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    fn has_degraded_metrics(&self, transport: TransportSample, ingest: Option<IngestSample>) -> bool {
        if let Some(loss) = transport.packet_loss_percent {
            if loss > 2.0 {
                return true;
            }
        }

        let rtt = transport.max_rtt_ms.or(ingest.and_then(|i| i.rtt_ms));
        if let Some(rtt) = rtt {
            if rtt > self.thresholds.rtt_threshold_ms {
                return true;
            }
        }

        if transport.active_subflows == Some(1) {
            return true;
        }

        false
    }

    fn calculate_health_score(&self, transport: TransportSample, ingest: Option<IngestSample>) -> u8 {
        let mut score: i32 = 0;

        if let Some(bitrate_kbps) = effective_bitrate_kbps(transport, ingest) {
            score += if bitrate_kbps >= 2500.0 {
                40
            } else if bitrate_kbps >= self.thresholds.low_bitrate_kbps {
                (40.0 * (bitrate_kbps - self.thresholds.low_bitrate_kbps) / 2000.0) as i32
            } else {
                (40.0 * (bitrate_kbps / self.thresholds.low_bitrate_kbps)) as i32
            };
        }

        if let Some(loss) = transport.packet_loss_percent {
            score += if loss == 0.0 {
                30
            } else if loss < 1.0 {
                25
            } else if loss < 2.0 {
                20
            } else if loss < 5.0 {
                10
            } else {
                0
            };
        }

        let rtt = transport.max_rtt_ms.or(ingest.and_then(|i| i.rtt_ms));
        if let Some(rtt) = rtt {
            score += if rtt < 50.0 {
                20
            } else if rtt < 100.0 {
                15
            } else if rtt < 200.0 {
                10
            } else if rtt < self.thresholds.rtt_threshold_ms {
                5
            } else {
                0
            };
        }

        if let Some(subflows) = transport.active_subflows {
            score += if subflows >= 2 {
                10
            } else if subflows == 1 {
                5
            } else {
                0
            };
        }

        score.clamp(0, 100) as u8
    }

    fn detect_divergence(
        &self,
        transport: TransportSample,
        ingest: Option<IngestSample>,
        primary: MetricSource,
    ) -> bool {
        if primary != MetricSource::Both {
            return false;
        }

        let transport_kbps = transport.total_bandwidth_bps.unwrap_or(0.0) / 1000.0;
        let ingest_kbps = ingest.map(|i| i.bitrate_kbps).unwrap_or(0.0);

        if transport_kbps > 0.0 && ingest_kbps > 0.0 {
            let ratio = transport_kbps.min(ingest_kbps) / transport_kbps.max(ingest_kbps);
            ratio < 0.7
        } else {
            false
        }
    }
}

/// Ingest bitrate is ground truth when present; transport bandwidth is an
/// approximation assuming 80% protocol/encoder efficiency.
fn effective_bitrate_kbps(transport: TransportSample, ingest: Option<IngestSample>) -> Option<f64> {
    if let Some(ingest) = ingest {
        return Some(ingest.bitrate_kbps);
    }
    transport.total_bandwidth_bps.map(|bps| bps / 1000.0 * 0.8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(bw_bps: f64, loss: f64, rtt: f64, subflows: u32) -> TransportSample {
        TransportSample {
            total_bandwidth_bps: Some(bw_bps),
            packet_loss_percent: Some(loss),
            min_rtt_ms: Some(rtt),
            max_rtt_ms: Some(rtt),
            active_subflows: Some(subflows),
            timestamp: None,
        }
    }

    fn ingest(bitrate_kbps: f64, active: bool) -> IngestSample {
        IngestSample {
            bitrate_kbps,
            connection_active: active,
            rtt_ms: None,
            timestamp: None,
        }
    }

    #[test]
    fn both_sources_present_yields_both() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), Some(ingest(4500.0, true)));
        assert_eq!(sample.primary_source, MetricSource::Both);
    }

    #[test]
    fn transport_only_yields_transport() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), None);
        assert_eq!(sample.primary_source, MetricSource::Transport);
    }

    #[test]
    fn neither_source_yields_unknown_health() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(TransportSample::default(), None);
        assert_eq!(sample.primary_source, MetricSource::Neither);
        assert_eq!(sample.health_status, HealthStatus::Unknown);
    }

    #[test]
    fn inactive_ingest_connection_forces_offline() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), Some(ingest(0.0, false)));
        assert_eq!(sample.health_status, HealthStatus::Offline);
    }

    #[test]
    fn low_ingest_bitrate_is_critical() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), Some(ingest(480.0, true)));
        assert_eq!(sample.health_status, HealthStatus::Critical);
    }

    #[test]
    fn single_subflow_is_degraded() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 1), Some(ingest(4000.0, true)));
        assert_eq!(sample.health_status, HealthStatus::Degraded);
    }

    #[test]
    fn high_bitrate_zero_loss_low_rtt_two_subflows_is_healthy_and_scores_100() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(6_000_000.0, 0.0, 20.0, 2), Some(ingest(5000.0, true)));
        assert_eq!(sample.health_status, HealthStatus::Healthy);
        assert_eq!(sample.health_score, 100);
    }

    #[test]
    fn all_metrics_absent_scores_zero() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(TransportSample::default(), None);
        assert_eq!(sample.health_score, 0);
    }

    #[test]
    fn divergence_detected_when_sources_disagree_by_more_than_30_percent() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        // Transport reports 5 Mbps (5000 kbps); ingest reports 2000 kbps — ratio 0.4.
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), Some(ingest(2000.0, true)));
        assert!(sample.divergence_detected);
    }

    #[test]
    fn no_divergence_when_only_one_source_present() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        let sample = agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), None);
        assert!(!sample.divergence_detected);
    }

    #[test]
    fn should_downgrade_false_before_first_aggregate() {
        let agg = MetricsAggregator::new(AggregatorThresholds::default());
        let (should, source) = agg.should_downgrade();
        assert!(!should);
        assert_eq!(source, MetricSource::Neither);
    }

    #[test]
    fn should_downgrade_true_on_low_ingest_bitrate() {
        let mut agg = MetricsAggregator::new(AggregatorThresholds::default());
        agg.aggregate(transport(5_000_000.0, 0.0, 20.0, 2), Some(ingest(300.0, true)));
        let (should, source) = agg.should_downgrade();
        assert!(should);
        assert_eq!(source, MetricSource::Ingest);
    }
}
