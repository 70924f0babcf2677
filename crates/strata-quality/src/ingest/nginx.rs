//! nginx-rtmp `stats` module parser.
//!
//! Response shape:
//! ```xml
//! <rtmp>
//!   <server>
//!     <application>
//!       <live>
//!         <stream>
//!           <name>stream_key</name>
//!           <bw_in>bytes/s</bw_in>
//!         </stream>
//!       </live>
//!     </application>
//!   </server>
//! </rtmp>
//! ```

use quick_xml::events::Event;
use quick_xml::Reader;

use super::IngestPollerConfig;
use crate::error::PollError;
use crate::types::IngestSample;

pub async fn poll(
    client: &reqwest::Client,
    config: &IngestPollerConfig,
) -> Result<IngestSample, PollError> {
    let body = client
        .get(&config.stats_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    parse(&body, &config.stream_key)
}

/// Walks the `<stream>` elements looking for one whose `<name>` matches the
/// configured stream key, and reads its `<bw_in>` (bytes/s) if found.
/// A well-formed response with no matching stream means the encoder isn't
/// connected — that's a `connection_active: false` sample, not an error.
fn parse(xml: &str, stream_key: &str) -> Result<IngestSample, PollError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut in_stream = false;
    let mut in_name = false;
    let mut in_bw_in = false;
    let mut current_name: Option<String> = None;
    let mut current_bw_in: Option<f64> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"stream" => {
                    in_stream = true;
                    current_name = None;
                    current_bw_in = None;
                }
                b"name" if in_stream => in_name = true,
                b"bw_in" if in_stream => in_bw_in = true,
                _ => {}
            },
            Event::Text(ref e) => {
                let text = e.unescape()?.to_string();
                if in_name {
                    current_name = Some(text);
                } else if in_bw_in {
                    current_bw_in = text.parse::<f64>().ok();
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"name" => in_name = false,
                b"bw_in" => in_bw_in = false,
                b"stream" => {
                    in_stream = false;
                    if current_name.as_deref() == Some(stream_key) {
                        if let Some(bytes_per_sec) = current_bw_in {
                            return Ok(IngestSample {
                                bitrate_kbps: bytes_per_sec * 8.0 / 1000.0,
                                connection_active: true,
                                rtt_ms: None,
                                timestamp: None,
                            });
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(IngestSample {
        bitrate_kbps: 0.0,
        connection_active: false,
        rtt_ms: None,
        timestamp: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<rtmp>
      <server>
        <application>
          <name>live</name>
          <live>
            <stream>
              <name>other/stream</name>
              <bw_in>12500</bw_in>
            </stream>
            <stream>
              <name>live/stream</name>
              <bw_in>562500</bw_in>
              <bw_out>0</bw_out>
            </stream>
          </live>
        </application>
      </server>
    </rtmp>"#;

    #[test]
    fn finds_matching_stream_and_converts_bytes_to_kbps() {
        let sample = parse(SAMPLE, "live/stream").unwrap();
        assert!(sample.connection_active);
        // 562500 bytes/s * 8 / 1000 = 4500 kbps
        assert!((sample.bitrate_kbps - 4500.0).abs() < 0.01);
    }

    #[test]
    fn missing_stream_reports_inactive() {
        let sample = parse(SAMPLE, "live/nonexistent").unwrap();
        assert!(!sample.connection_active);
        assert_eq!(sample.bitrate_kbps, 0.0);
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse("<rtmp><server>", "live/stream").is_err());
    }
}
