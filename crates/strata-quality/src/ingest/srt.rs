//! Generic SRT relay stats parser. Format varies by implementation; this
//! reads the common `{bitrate, rtt, connected}` JSON shape.

use serde::Deserialize;

use super::IngestPollerConfig;
use crate::error::PollError;
use crate::types::IngestSample;

#[derive(Debug, Deserialize)]
struct SrtStats {
    #[serde(default)]
    bitrate: f64,
    #[serde(default)]
    rtt: f64,
    #[serde(default)]
    connected: bool,
}

pub async fn poll(
    client: &reqwest::Client,
    config: &IngestPollerConfig,
) -> Result<IngestSample, PollError> {
    let stats: SrtStats = client
        .get(&config.stats_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(IngestSample {
        bitrate_kbps: stats.bitrate / 1000.0,
        connection_active: stats.connected,
        rtt_ms: Some(stats.rtt),
        timestamp: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_bps_bitrate_to_kbps() {
        let stats: SrtStats =
            serde_json::from_str(r#"{"bitrate": 4500000, "rtt": 38.5, "connected": true}"#)
                .unwrap();
        assert_eq!(stats.bitrate, 4_500_000.0);
        assert_eq!(stats.rtt, 38.5);
        assert!(stats.connected);
    }

    #[test]
    fn missing_fields_default_to_zero_and_disconnected() {
        let stats: SrtStats = serde_json::from_str("{}").unwrap();
        assert_eq!(stats.bitrate, 0.0);
        assert!(!stats.connected);
    }
}
