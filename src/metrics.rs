//! Admin dashboard metrics and listing analytics.
//!
//! Aggregation for the dashboard happens server-side in a remote procedure;
//! this module only checks the result's shape. The analytics report is
//! computed here from raw analytics rows.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::gateway::{Filter, GatewayError, Order, RemoteGateway};

pub const ADMIN_METRICS_PROCEDURE: &str = "get_admin_dashboard_metrics";

const REQUIRED_KEYS: [&str; 3] = ["overview", "userMetrics", "productMetrics"];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("invalid metrics data structure: {0}")]
    Malformed(String),
}

/// Result of the dashboard procedure, accepted only when all three sections
/// are present. Section contents are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboardMetrics {
    pub overview: Value,
    pub user_metrics: Value,
    pub product_metrics: Value,
    /// Any further top-level keys the procedure returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdminDashboardMetrics {
    pub fn from_value(value: Value) -> Result<Self, MetricsError> {
        let Value::Object(mut obj) = value else {
            return Err(MetricsError::Malformed("result is not an object".into()));
        };
        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !obj.contains_key(**k)) {
            return Err(MetricsError::Malformed(format!("missing key '{}'", missing)));
        }
        let overview = obj.remove("overview").unwrap_or(Value::Null);
        let user_metrics = obj.remove("userMetrics").unwrap_or(Value::Null);
        let product_metrics = obj.remove("productMetrics").unwrap_or(Value::Null);
        Ok(Self {
            overview,
            user_metrics,
            product_metrics,
            extra: obj,
        })
    }
}

#[instrument(skip_all, fields(time_range = %time_range))]
pub async fn fetch_admin_metrics<G: RemoteGateway + ?Sized>(
    gateway: &G,
    time_range: &str,
) -> Result<AdminDashboardMetrics, MetricsError> {
    let raw = gateway
        .invoke_procedure(ADMIN_METRICS_PROCEDURE, json!({ "time_range": time_range }))
        .await?;
    AdminDashboardMetrics::from_value(raw).map_err(|err| {
        warn!(%err, "rejecting admin metrics result");
        err
    })
}

/// Analytics look-back window. Unknown values fall back to seven days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeRange {
    Day,
    #[default]
    Week,
    Month,
    Quarter,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::Day => Duration::hours(24),
            TimeRange::Week => Duration::days(7),
            TimeRange::Month => Duration::days(30),
            TimeRange::Quarter => Duration::days(90),
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            other => Err(format!("unsupported time range: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub views_trend: f64,
    pub clicks_trend: f64,
    pub conversion_trend: f64,
    pub revenue_trend: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: String,
    pub views: i64,
    pub clicks: i64,
    pub inquiries: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub views: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub revenue: f64,
    pub trends: Trends,
    pub data: Vec<DailyPoint>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    views: i64,
    clicks: i64,
    conversions: i64,
    revenue: f64,
}

impl Totals {
    fn of(rows: &[Value]) -> Self {
        rows.iter().fold(Totals::default(), |acc, row| Totals {
            views: acc.views.saturating_add(int_field(row, "views")),
            clicks: acc.clicks.saturating_add(int_field(row, "clicks")),
            conversions: acc.conversions.saturating_add(int_field(row, "conversions")),
            revenue: acc.revenue + row.get("revenue").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }
}

impl AnalyticsReport {
    /// Build a report from rows ordered oldest first. Trends compare the
    /// newer half of the series to the older half, in percent.
    pub fn from_rows(rows: &[Value]) -> Self {
        let total = Totals::of(rows);
        let (previous, current) = rows.split_at(rows.len() / 2);
        let previous = Totals::of(previous);
        let current = Totals::of(current);

        Self {
            views: total.views,
            clicks: total.clicks,
            conversions: total.conversions,
            revenue: total.revenue,
            trends: Trends {
                views_trend: trend(current.views as f64, previous.views as f64),
                clicks_trend: trend(current.clicks as f64, previous.clicks as f64),
                conversion_trend: trend(current.conversions as f64, previous.conversions as f64),
                revenue_trend: trend(current.revenue, previous.revenue),
            },
            data: rows
                .iter()
                .map(|row| DailyPoint {
                    date: day_of(row.get("created_at").and_then(Value::as_str).unwrap_or_default()),
                    views: int_field(row, "views"),
                    clicks: int_field(row, "clicks"),
                    inquiries: int_field(row, "inquiries"),
                })
                .collect(),
        }
    }
}

#[instrument(skip_all, fields(table = %table, range = range.as_str()))]
pub async fn fetch_analytics<G: RemoteGateway + ?Sized>(
    gateway: &G,
    table: &str,
    range: TimeRange,
    now: DateTime<Utc>,
) -> Result<AnalyticsReport, MetricsError> {
    let since = (now - range.duration()).to_rfc3339_opts(SecondsFormat::Secs, true);
    let rows = gateway
        .query(
            table,
            "*",
            &[Filter::gte("created_at", since)],
            Some(&Order::asc("created_at")),
        )
        .await?;
    info!(rows = rows.len(), "analytics rows fetched");
    Ok(AnalyticsReport::from_rows(&rows))
}

fn trend(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

fn int_field(row: &Value, key: &str) -> i64 {
    match row.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        None => 0,
    }
}

fn day_of(timestamp: &str) -> String {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(ts) => ts.with_timezone(&Utc).date_naive().to_string(),
        Err(_) => timestamp.chars().take(10).collect(),
    }
}
