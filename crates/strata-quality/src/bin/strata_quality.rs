//! # strata-quality
//!
//! Standalone control-plane daemon: evaluates the adaptive quality state
//! machine once a second against a transport sampler and (optionally) an
//! ingest poller, logging every applied transition.
//!
//! ```bash
//! strata-quality
//! FEATURE_INGEST_MONITORING=true INGEST_SERVER_TYPE=nginx strata-quality
//! ```

use std::sync::Arc;
use std::time::Duration;

use strata_quality::clock::SystemClock;
use strata_quality::control_loop::{ControlLoop, FixedTransportSampler};
use strata_quality::ingest::{IngestPoller, IngestPollerConfig};
use strata_quality::retry::RetryConfig;
use strata_quality::state_machine::{AdaptiveStateMachine, LinkReading};
use strata_quality::subscriber::{LoggingSink, NullBroadcastToolClient, TransitionSink};
use strata_quality::{AggregatorThresholds, Config};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = config.validate_security() {
        tracing::error!("{}", "=".repeat(70));
        tracing::error!(error = %err, "insecure production defaults detected");
        tracing::error!("set SECRET_KEY and API_TOKEN, or run with DEBUG=true");
        tracing::error!("{}", "=".repeat(70));
        std::process::exit(1);
    }

    tracing::info!(
        feature_ingest_monitoring = config.feature_ingest_monitoring,
        feature_dual_metrics = config.feature_dual_metrics,
        feature_retry_logic = config.feature_retry_logic,
        "strata-quality starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock::new());
    let fsm = AdaptiveStateMachine::new(clock.clone());

    let retry_config = if config.feature_retry_logic {
        RetryConfig {
            retry_attempts: config.state_change_retry_attempts,
            instant_recovery: config.instant_recovery_enabled,
            enabled: true,
        }
    } else {
        RetryConfig {
            retry_attempts: 1,
            instant_recovery: true,
            enabled: false,
        }
    };

    let aggregator_thresholds = AggregatorThresholds {
        low_bitrate_kbps: config.bitrate_threshold_low_kbps,
        offline_bitrate_kbps: config.bitrate_threshold_offline_kbps,
        rtt_threshold_ms: config.bitrate_threshold_rtt_ms,
    };

    let ingest_poller = if config.feature_ingest_monitoring {
        let poller = Arc::new(IngestPoller::new(IngestPollerConfig {
            stats_url: config.ingest_stats_url.clone(),
            stream_key: config.ingest_stream_key.clone(),
            poll_interval: config.ingest_stats_poll_interval,
            server_type: config.ingest_server_type,
        })?);
        Some(poller)
    } else {
        tracing::debug!("ingest monitoring disabled");
        None
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ingest_task = ingest_poller.clone().map(|poller| {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { poller.run(shutdown_rx).await })
    });

    let sinks: Vec<Arc<dyn TransitionSink>> = vec![Arc::new(LoggingSink::new())];

    // Transport sampling is out of this crate's scope — production wiring
    // plugs in the real MPTCP/bonded-SRT sampler here. The fixed sampler
    // keeps the daemon runnable standalone for smoke-testing the loop.
    let transport = Arc::new(FixedTransportSampler(LinkReading {
        total_bandwidth_bps: 8_000_000.0,
        packet_loss_percent: 0.1,
        max_rtt_ms: 20.0,
        min_rtt_ms: 20.0,
        active_subflows: 2,
    }));

    // No broadcast-tool bridge is wired up standalone — production
    // deployments plug a real OBS WebSocket (or similar) client in here.
    let broadcast_tool = Arc::new(NullBroadcastToolClient::new());

    let mut control_loop = ControlLoop::new(
        clock,
        fsm,
        retry_config,
        aggregator_thresholds,
        transport,
        ingest_poller,
        sinks,
        broadcast_tool,
    );

    // Taken before the loop moves onto its own task, so status/subscribe/
    // reset-retry-counters stay reachable for as long as the loop runs.
    let control_handle = control_loop.handle();

    let shutdown_rx_for_loop = shutdown_rx.clone();
    let loop_task = tokio::spawn(async move { control_loop.run(shutdown_rx_for_loop).await });

    // Demonstrates the handle staying reachable after the loop above moved
    // onto its own task — an external status API would poll `snapshot()`
    // (or drain `subscribe()`) the same way instead of logging on a timer.
    let status_shutdown_rx = shutdown_rx.clone();
    let status_task = tokio::spawn(async move {
        let mut shutdown = status_shutdown_rx;
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = control_handle.snapshot();
                    tracing::debug!(
                        state = %status.current_state,
                        time_in_state_secs = status.time_in_state_secs,
                        "status snapshot"
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    let (ctrlc_tx, mut ctrlc_rx) = tokio::sync::mpsc::channel(1);
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.blocking_send(());
    })?;
    ctrlc_rx.recv().await;

    tracing::info!("shutdown signal received");
    shutdown_tx.send(true)?;

    loop_task.await?;
    status_task.await?;
    if let Some(task) = ingest_task {
        task.await?;
    }

    Ok(())
}
