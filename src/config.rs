//! Configuration loader and validator for the marketplace sync client.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Foreign key used to join a product to its seller's contact record.
const SELLER_FKEY: &str = "products_seller_id_fkey";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    #[serde(default)]
    pub tables: Tables,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Change-feed poll interval.
    pub poll_interval_ms: u64,
    #[serde(default = "default_time_range")]
    pub metrics_time_range: String,
}

fn default_time_range() -> String {
    "7d".to_string()
}

/// Hosted backend connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub url: String,
    pub api_key: String,
}

/// Backend table names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tables {
    pub products: String,
    pub product_images: String,
    pub sellers: String,
    pub notifications: String,
    pub analytics: String,
    pub system_metrics: String,
    pub alerts: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            products: "products".into(),
            product_images: "product_images".into(),
            sellers: "users".into(),
            notifications: "notifications".into(),
            analytics: "analytics".into(),
            system_metrics: "system_metrics".into(),
            alerts: "alerts".into(),
        }
    }
}

impl Tables {
    /// Image and seller-contact embeds, aliased to the keys the mapper reads
    /// regardless of the configured table names.
    pub fn joined_select(&self) -> String {
        format!(
            "product_images:{}(id,url,alt,order_number),users:{}!{}(whatsapp_number,full_name)",
            self.product_images, self.sellers, SELLER_FKEY
        )
    }

    /// Base product columns plus [`Tables::joined_select`].
    pub fn full_select(&self) -> String {
        format!("*,{}", self.joined_select())
    }
}

impl Config {
    /// Apply environment overrides (`BACKEND_URL`, `BACKEND_API_KEY`).
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.url = url;
            }
        }
        if let Ok(key) = std::env::var("BACKEND_API_KEY") {
            if !key.trim().is_empty() {
                self.backend.api_key = key;
            }
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.metrics_time_range.trim().is_empty() {
        return Err(ConfigError::Invalid("app.metrics_time_range must be non-empty"));
    }

    let url = cfg.backend.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid("backend.url must be non-empty"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid("backend.url must be an http(s) URL"));
    }
    if cfg.backend.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.api_key must be non-empty"));
    }

    let t = &cfg.tables;
    if t.products.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.products must be non-empty"));
    }
    if t.product_images.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.product_images must be non-empty"));
    }
    if t.sellers.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.sellers must be non-empty"));
    }
    if t.notifications.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.notifications must be non-empty"));
    }
    if t.analytics.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.analytics must be non-empty"));
    }
    if t.system_metrics.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.system_metrics must be non-empty"));
    }
    if t.alerts.trim().is_empty() {
        return Err(ConfigError::Invalid("tables.alerts must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  poll_interval_ms: 1000
  metrics_time_range: "7d"

backend:
  url: "https://YOUR_PROJECT.supabase.co"
  api_key: "YOUR_BACKEND_API_KEY"

tables:
  products: "products"
  product_images: "product_images"
  sellers: "users"
  notifications: "notifications"
  analytics: "analytics"
  system_metrics: "system_metrics"
  alerts: "alerts"
"#
}
