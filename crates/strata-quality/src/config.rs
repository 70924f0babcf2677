//! Process configuration, loaded from the environment. Mirrors the original
//! control plane's settings surface: server/security basics, the ingest
//! poller, the retry/debounce layer, and the NOALBS-style bitrate
//! thresholds the dual-source aggregator scores against.

use std::time::Duration;

use crate::error::ConfigError;
use crate::ingest::ServerType;

/// Full process configuration. Construct via [`Config::from_env`]; never
/// mutated once the control loop starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address/port for the (external) status API this crate's
    /// types are serialized for — unused by the control loop itself.
    pub host: String,
    pub port: u16,

    pub debug: bool,
    pub secret_key: String,
    pub api_token: String,

    pub feature_ingest_monitoring: bool,
    pub feature_dual_metrics: bool,
    pub feature_retry_logic: bool,

    pub ingest_stats_url: String,
    pub ingest_stream_key: String,
    pub ingest_stats_poll_interval: Duration,
    pub ingest_server_type: ServerType,

    pub bitrate_threshold_low_kbps: f64,
    pub bitrate_threshold_offline_kbps: f64,
    pub bitrate_threshold_rtt_ms: f64,

    pub state_change_retry_attempts: u32,
    pub instant_recovery_enabled: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("could not parse {raw:?}"),
        }),
    }
}

impl Config {
    /// Reads configuration from the process environment, falling back to
    /// the same defaults as the original control plane.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ingest_server_type_raw = env_or("INGEST_SERVER_TYPE", "nginx");
        let ingest_server_type = ServerType::parse(&ingest_server_type_raw).map_err(|_| {
            ConfigError::InvalidValue {
                key: "INGEST_SERVER_TYPE".to_string(),
                reason: format!("unsupported server type {ingest_server_type_raw:?}"),
            }
        })?;

        Ok(Config {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000)?,

            debug: env_bool("DEBUG", false),
            secret_key: env_or("SECRET_KEY", "change-this-in-production"),
            api_token: env_or("API_TOKEN", "change-this-in-production"),

            feature_ingest_monitoring: env_bool("FEATURE_INGEST_MONITORING", false),
            feature_dual_metrics: env_bool("FEATURE_DUAL_METRICS", false),
            feature_retry_logic: env_bool("FEATURE_RETRY_LOGIC", false),

            ingest_stats_url: env_or("INGEST_STATS_URL", "http://localhost/stats"),
            ingest_stream_key: env_or("INGEST_STREAM_KEY", "live/stream"),
            ingest_stats_poll_interval: Duration::from_secs(env_parse(
                "INGEST_STATS_POLL_INTERVAL",
                2,
            )?),
            ingest_server_type,

            bitrate_threshold_low_kbps: env_parse("BITRATE_THRESHOLD_LOW_KBPS", 500.0)?,
            bitrate_threshold_offline_kbps: env_parse("BITRATE_THRESHOLD_OFFLINE_KBPS", 450.0)?,
            bitrate_threshold_rtt_ms: env_parse("BITRATE_THRESHOLD_RTT_MS", 1000.0)?,

            state_change_retry_attempts: env_parse("STATE_CHANGE_RETRY_ATTEMPTS", 5)?,
            instant_recovery_enabled: env_bool("INSTANT_RECOVERY_ENABLED", true),
        })
    }

    /// Fails fast outside debug mode if any secret is still at its
    /// placeholder value, or if the ingest poller is pointed at a
    /// non-localhost target without an explicitly configured stream key —
    /// this is the only config path that halts the process; everything else
    /// degrades or logs.
    pub fn validate_security(&self) -> Result<(), ConfigError> {
        let mut insecure = Vec::new();
        if self.secret_key == "change-this-in-production" {
            insecure.push("SECRET_KEY".to_string());
        }
        if self.api_token == "change-this-in-production" {
            insecure.push("API_TOKEN".to_string());
        }

        if self.feature_ingest_monitoring && !self.is_ingest_target_localhost() {
            const DEFAULT_STREAM_KEY: &str = "live/stream";
            if self.ingest_stream_key == DEFAULT_STREAM_KEY {
                insecure.push(
                    "INGEST_STREAM_KEY (must be set explicitly when INGEST_STATS_URL targets a non-localhost host)"
                        .to_string(),
                );
            }
        }

        if insecure.is_empty() || self.debug {
            return Ok(());
        }

        Err(ConfigError::InsecureDefaults(insecure.join(", ")))
    }

    fn is_ingest_target_localhost(&self) -> bool {
        self.ingest_stats_url.contains("localhost") || self.ingest_stats_url.contains("127.0.0.1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_defaults() -> Config {
        Config {
            host: "0.0.0.0".into(),
            port: 8000,
            debug: false,
            secret_key: "change-this-in-production".into(),
            api_token: "change-this-in-production".into(),
            feature_ingest_monitoring: false,
            feature_dual_metrics: false,
            feature_retry_logic: false,
            ingest_stats_url: "http://localhost/stats".into(),
            ingest_stream_key: "live/stream".into(),
            ingest_stats_poll_interval: Duration::from_secs(2),
            ingest_server_type: ServerType::Nginx,
            bitrate_threshold_low_kbps: 500.0,
            bitrate_threshold_offline_kbps: 450.0,
            bitrate_threshold_rtt_ms: 1000.0,
            state_change_retry_attempts: 5,
            instant_recovery_enabled: true,
        }
    }

    #[test]
    fn insecure_defaults_fail_outside_debug_mode() {
        let config = config_with_defaults();
        let err = config.validate_security().unwrap_err();
        match err {
            ConfigError::InsecureDefaults(fields) => {
                assert!(fields.contains("SECRET_KEY"));
                assert!(fields.contains("API_TOKEN"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn insecure_defaults_allowed_in_debug_mode() {
        let mut config = config_with_defaults();
        config.debug = true;
        assert!(config.validate_security().is_ok());
    }

    #[test]
    fn changed_secrets_pass_validation() {
        let mut config = config_with_defaults();
        config.secret_key = "a-real-secret".into();
        config.api_token = "a-real-token".into();
        assert!(config.validate_security().is_ok());
    }

    fn secure_config() -> Config {
        let mut config = config_with_defaults();
        config.secret_key = "a-real-secret".into();
        config.api_token = "a-real-token".into();
        config
    }

    #[test]
    fn non_localhost_ingest_target_with_default_stream_key_fails() {
        let mut config = secure_config();
        config.feature_ingest_monitoring = true;
        config.ingest_stats_url = "http://streamserver.example.com/stats".into();
        let err = config.validate_security().unwrap_err();
        match err {
            ConfigError::InsecureDefaults(fields) => {
                assert!(fields.contains("INGEST_STREAM_KEY"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_localhost_ingest_target_with_explicit_stream_key_passes() {
        let mut config = secure_config();
        config.feature_ingest_monitoring = true;
        config.ingest_stats_url = "http://streamserver.example.com/stats".into();
        config.ingest_stream_key = "channel/my-stream".into();
        assert!(config.validate_security().is_ok());
    }

    #[test]
    fn localhost_ingest_target_never_requires_explicit_stream_key() {
        let mut config = secure_config();
        config.feature_ingest_monitoring = true;
        config.ingest_stats_url = "http://127.0.0.1:8080/stats".into();
        assert!(config.validate_security().is_ok());
    }

    #[test]
    fn non_localhost_ingest_target_allowed_in_debug_mode() {
        let mut config = secure_config();
        config.debug = true;
        config.feature_ingest_monitoring = true;
        config.ingest_stats_url = "http://streamserver.example.com/stats".into();
        assert!(config.validate_security().is_ok());
    }
}
