//! Live system health metrics and threshold alerts.
//!
//! [`LiveSystemMetrics`] follows one metrics source the same way the product
//! view follows a product: feed first, then the initial read, then pushed
//! updates merged over the last known snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::gateway::{ChangeEvent, ChangeFeed, Filter, GatewayError, Order, RemoteGateway};
use crate::lenient;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub active_users: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    ResponseTime,
    ErrorRate,
    ActiveUsers,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::ResponseTime => "response_time",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::ActiveUsers => "active_users",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SystemMetrics {
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
            MetricKind::ResponseTime => self.response_time,
            MetricKind::ErrorRate => self.error_rate,
            MetricKind::ActiveUsers => self.active_users as f64,
        }
    }
}

/// Pushed or fetched metrics record. Every column is optional; present ones
/// replace the known values.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MetricsUpdate {
    #[serde(default, deserialize_with = "lenient::float")]
    pub cpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub memory: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub disk: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub response_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub error_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub active_users: Option<i64>,
}

impl MetricsUpdate {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if !value.is_object() {
            return Err(serde::de::Error::custom("metrics record is not an object"));
        }
        serde_json::from_value(value)
    }

    pub fn overlay(&self, base: &SystemMetrics) -> SystemMetrics {
        SystemMetrics {
            cpu: self.cpu.unwrap_or(base.cpu),
            memory: self.memory.unwrap_or(base.memory),
            disk: self.disk.unwrap_or(base.disk),
            response_time: self.response_time.unwrap_or(base.response_time),
            error_rate: self.error_rate.unwrap_or(base.error_rate),
            active_users: self.active_users.unwrap_or(base.active_users),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub created_at: String,
}

impl Alert {
    /// Whether `metrics` is at or above this alert's threshold.
    pub fn is_breached_by(&self, metrics: &SystemMetrics) -> bool {
        metrics.value(self.metric) >= self.threshold
    }
}

/// Alerts newest first, most severe first within the same instant.
/// Acknowledged alerts are left out unless asked for; rows that do not decode
/// are skipped.
#[instrument(skip_all, fields(table = %table))]
pub async fn fetch_alerts<G: RemoteGateway + ?Sized>(
    gateway: &G,
    table: &str,
    include_acknowledged: bool,
) -> Result<Vec<Alert>, GatewayError> {
    let filters = if include_acknowledged {
        Vec::new()
    } else {
        vec![Filter::eq("acknowledged", false)]
    };
    let rows = gateway
        .query(table, "*", &filters, Some(&Order::desc("created_at")))
        .await?;
    let mut alerts: Vec<Alert> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<Alert>(row) {
            Ok(alert) => Some(alert),
            Err(err) => {
                warn!(?err, "skipping undecodable alert");
                None
            }
        })
        .collect();
    alerts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.severity.cmp(&a.severity))
    });
    Ok(alerts)
}

pub struct LiveSystemMetrics<G: RemoteGateway + ?Sized> {
    gateway: Arc<G>,
    table: String,
    source: String,
    metrics: Option<SystemMetrics>,
    error: Option<String>,
    loading: bool,
    feed: Option<ChangeFeed>,
    closed: bool,
}

impl<G: RemoteGateway + ?Sized> LiveSystemMetrics<G> {
    /// Open the feed for `source`, then read its current snapshot. A failed
    /// read is kept as the error; pushed updates still apply afterwards.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn mount(gateway: Arc<G>, table: &str, source: &str) -> Self {
        let feed = match gateway.subscribe(table, Filter::eq("id", source)).await {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(?err, "could not open metrics feed; snapshot will not update");
                None
            }
        };

        let mut live = Self {
            gateway,
            table: table.to_string(),
            source: source.to_string(),
            metrics: None,
            error: None,
            loading: true,
            feed,
            closed: false,
        };
        match live
            .gateway
            .query_one(&live.table, "*", &[Filter::eq("id", source)])
            .await
        {
            Ok(row) => match MetricsUpdate::from_value(row) {
                Ok(update) => live.metrics = Some(update.overlay(&SystemMetrics::default())),
                Err(err) => live.error = Some(err.to_string()),
            },
            Err(GatewayError::NotFound) => {
                info!("no metrics recorded yet");
            }
            Err(err) => {
                error!(?err, "failed to fetch metrics");
                live.error = Some(err.to_string());
            }
        }
        live.loading = false;
        live
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metrics(&self) -> Option<&SystemMetrics> {
        self.metrics.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Merge a pushed record over the last snapshot (or zeros when there is
    /// none). The initial error, if any, is left as is.
    pub fn apply_update(&mut self, event: ChangeEvent) {
        if self.closed {
            return;
        }
        let update = match MetricsUpdate::from_value(event.new) {
            Ok(update) => update,
            Err(err) => {
                warn!(?err, source = %self.source, "undecodable metrics update");
                return;
            }
        };
        let base = self.metrics.clone().unwrap_or_default();
        let next = update.overlay(&base);
        debug!(source = %self.source, cpu = next.cpu, memory = next.memory, "metrics updated");
        self.metrics = Some(next);
    }

    /// Wait for the next pushed update and apply it. Returns `false` once the
    /// feed has ended or the view is closed.
    pub async fn next_update(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let event = match self.feed.as_mut() {
            Some(feed) => feed.recv().await,
            None => None,
        };
        match event {
            Some(event) => {
                self.apply_update(event);
                true
            }
            None => false,
        }
    }

    pub async fn run(&mut self) {
        while self.next_update().await {}
    }

    pub fn close(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.close();
        }
        self.closed = true;
        info!(source = %self.source, "metrics feed closed");
    }
}
