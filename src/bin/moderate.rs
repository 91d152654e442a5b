use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use marketplace_sync::config;
use marketplace_sync::gateway::rest::RestGateway;
use marketplace_sync::moderation::{Decision, ModerationQueue, NoticeLevel};

#[derive(Debug, Parser)]
#[command(author, version, about = "Review listings awaiting moderation")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pending listings, newest first
    List,
    /// Approve a pending listing
    Approve { product_id: String },
    /// Reject a pending listing
    Reject { product_id: String },
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
    let mut queue = ModerationQueue::new(gateway, cfg.tables.clone());

    queue
        .load_pending()
        .await
        .context("failed to fetch pending products")?;

    let decision = match args.command {
        Command::List => None,
        Command::Approve { product_id } => Some(queue.decide(&product_id, true).await),
        Command::Reject { product_id } => Some(queue.decide(&product_id, false).await),
    };

    for notice in queue.take_notices() {
        match notice.level {
            NoticeLevel::Success => info!(title = %notice.title, "{}", notice.description),
            NoticeLevel::Error => error!(title = %notice.title, "{}", notice.description),
        }
    }

    if queue.working_set().is_empty() {
        println!("No pending products to approve");
    }
    for product in queue.working_set() {
        println!(
            "{}  {}  {}  qty {}  {}{}",
            product.id,
            product.title,
            product.display_price(),
            product.quantity,
            product.created_at,
            if product.seller_whatsapp.is_empty() {
                String::new()
            } else {
                format!("  WhatsApp: {}", product.seller_whatsapp)
            }
        );
    }

    match decision {
        Some(Decision::MutationFailed) => bail!("status update failed"),
        Some(Decision::NotificationFailed(status)) => {
            warn!(%status, "status updated but seller was not notified");
        }
        _ => {}
    }
    Ok(())
}
