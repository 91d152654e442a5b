use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use marketplace_sync::config;
use marketplace_sync::gateway::rest::RestGateway;
use marketplace_sync::metrics::{self, TimeRange};

#[derive(Debug, Parser)]
#[command(author, version, about = "Print admin dashboard metrics and listing analytics as JSON")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured time range (24h, 7d, 30d, 90d)
    #[arg(long)]
    time_range: Option<String>,

    /// Skip the analytics report
    #[arg(long)]
    no_analytics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config)).context("failed to load config")?;
    let gateway = RestGateway::from_config(&cfg).context("failed to build backend client")?;
    let time_range = args
        .time_range
        .unwrap_or_else(|| cfg.app.metrics_time_range.clone());

    let dashboard = metrics::fetch_admin_metrics(&gateway, &time_range)
        .await
        .context("failed to fetch admin metrics")?;

    let analytics = if args.no_analytics {
        None
    } else {
        let range = TimeRange::parse_lenient(&time_range);
        Some(
            metrics::fetch_analytics(&gateway, &cfg.tables.analytics, range, Utc::now())
                .await
                .context("failed to fetch analytics")?,
        )
    };

    let out = json!({
        "timeRange": time_range,
        "dashboard": dashboard,
        "analytics": analytics,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
