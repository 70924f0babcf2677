//! node-media-server `/api/streams` parser. Bitrate is reported per-track
//! (video/audio); total ingest bitrate sums both.

use serde::Deserialize;

use super::IngestPollerConfig;
use crate::error::PollError;
use crate::types::IngestSample;

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    app: String,
    #[serde(default)]
    video: Option<TrackStats>,
    #[serde(default)]
    audio: Option<TrackStats>,
}

#[derive(Debug, Deserialize)]
struct TrackStats {
    #[serde(default)]
    bitrate: f64,
}

pub async fn poll(
    client: &reqwest::Client,
    config: &IngestPollerConfig,
) -> Result<IngestSample, PollError> {
    let url = format!("{}/api/streams", config.stats_url.trim_end_matches('/'));
    let body: StreamsResponse = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let app = config
        .stream_key
        .split('/')
        .next()
        .unwrap_or(&config.stream_key);

    Ok(find_sample(&body, app))
}

fn find_sample(body: &StreamsResponse, app: &str) -> IngestSample {
    for entry in &body.streams {
        if entry.app == app {
            let video_kbps = entry.video.as_ref().map(|t| t.bitrate / 1000.0).unwrap_or(0.0);
            let audio_kbps = entry.audio.as_ref().map(|t| t.bitrate / 1000.0).unwrap_or(0.0);
            return IngestSample {
                bitrate_kbps: video_kbps + audio_kbps,
                connection_active: true,
                rtt_ms: None,
                timestamp: None,
            };
        }
    }

    IngestSample {
        bitrate_kbps: 0.0,
        connection_active: false,
        rtt_ms: None,
        timestamp: None,
    }
}
