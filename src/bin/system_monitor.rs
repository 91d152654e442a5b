use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use marketplace_sync::config;
use marketplace_sync::gateway::rest::RestGateway;
use marketplace_sync::monitoring::{self, Alert, LiveSystemMetrics, SystemMetrics};

#[derive(Debug, Parser)]
#[command(author, version, about = "Follow live system metrics and report breached alerts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Metrics source id to follow
    #[arg(long, default_value = "primary")]
    source: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config)).context("failed to load config")?;
    let gateway = Arc::new(RestGateway::from_config(&cfg).context("failed to build backend client")?);

    let alerts = monitoring::fetch_alerts(gateway.as_ref(), &cfg.tables.alerts, false)
        .await
        .context("failed to fetch alerts")?;
    info!(open = alerts.len(), "alerts loaded");

    let mut live = LiveSystemMetrics::mount(gateway, &cfg.tables.system_metrics, &args.source).await;
    if let Some(err) = live.error() {
        error!(%err, "initial metrics fetch failed; waiting for updates");
    }
    if let Some(metrics) = live.metrics() {
        report(metrics, &alerts);
    }

    loop {
        tokio::select! {
            more = live.next_update() => {
                if !more {
                    warn!("metrics feed ended");
                    break;
                }
                if let Some(metrics) = live.metrics() {
                    report(metrics, &alerts);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    live.close();
    Ok(())
}

fn report(metrics: &SystemMetrics, alerts: &[Alert]) {
    info!(
        cpu = metrics.cpu,
        memory = metrics.memory,
        disk = metrics.disk,
        response_time = metrics.response_time,
        error_rate = metrics.error_rate,
        active_users = metrics.active_users,
        "metrics"
    );
    for alert in alerts.iter().filter(|a| a.is_breached_by(metrics)) {
        warn!(
            id = alert.id,
            metric = %alert.metric,
            threshold = alert.threshold,
            severity = ?alert.severity,
            "alert threshold breached"
        );
    }
}
