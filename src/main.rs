use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use marketplace_sync::config;
use marketplace_sync::gateway::rest::RestGateway;
use marketplace_sync::live::{LiveProductView, ViewState};
use marketplace_sync::model::Product;

#[derive(Debug, Parser)]
#[command(author, version, about = "Follow one product live and log every change")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Product id to follow
    #[arg(long)]
    product_id: String,
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

    let mut view = LiveProductView::mount(gateway, cfg.tables.clone(), &args.product_id).await;
    match view.state() {
        ViewState::Ready(product) => log_product(product),
        ViewState::NotFound => {
            warn!(product_id = %args.product_id, "Product not found");
            return Ok(());
        }
        ViewState::Failed(reason) => {
            error!(product_id = %args.product_id, %reason, "Failed to load product");
            return Ok(());
        }
        ViewState::Loading => {}
    }

    loop {
        tokio::select! {
            more = view.next_change() => {
                if !more {
                    warn!("change feed ended");
                    break;
                }
                if let Some(product) = view.product() {
                    log_product(product);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    view.close();
    Ok(())
}

fn log_product(product: &Product) {
    info!(
        id = %product.id,
        title = %product.title,
        price = %product.display_price(),
        availability = %product.availability(),
        status = %product.status,
        images = product.images.len(),
        "product"
    );
}
