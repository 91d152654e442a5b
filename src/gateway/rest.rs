//! [`RemoteGateway`] over the backend's PostgREST-style HTTP API.
//!
//! Row change subscriptions are served by polling: a background task re-reads
//! the subscribed rows and publishes a [`ChangeEvent`] whenever one differs
//! from the last observed copy.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{single_row, ChangeEvent, ChangeFeed, FeedSender, Filter, GatewayError, Order, RemoteGateway};
use crate::config::Config;

const REST_PREFIX: &str = "rest/v1/";
const RPC_PREFIX: &str = "rest/v1/rpc/";

#[derive(Clone)]
pub struct RestGateway {
    http: Client,
    base_url: Url,
    api_key: String,
    poll_interval: Duration,
}

impl fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    pub fn new(base_url: &str, api_key: String, poll_interval: Duration) -> Result<Self, GatewayError> {
        // Url::join drops the last path segment unless it ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| GatewayError::InvalidUrl(format!("{normalized}: {e}")))?;
        let http = Client::builder()
            .user_agent("marketplace-sync/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            poll_interval,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, GatewayError> {
        Self::new(
            &cfg.backend.url,
            cfg.backend.api_key.clone(),
            Duration::from_millis(cfg.app.poll_interval_ms),
        )
    }

    fn endpoint(&self, prefix: &str, name: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(&format!("{prefix}{name}"))
            .map_err(|e| GatewayError::InvalidUrl(e.to_string()))
    }

    fn authorized(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    pub fn build_query_request(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<reqwest::Request, GatewayError> {
        let mut url = self.endpoint(REST_PREFIX, table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", select);
            for filter in filters {
                pairs.append_pair(filter.column(), &encode_filter(filter));
            }
            if let Some(order) = order {
                let dir = if order.ascending { "asc" } else { "desc" };
                pairs.append_pair("order", &format!("{}.{}", order.column, dir));
            }
        }
        Ok(self
            .authorized(Method::GET, url)
            .header("Accept", "application/json")
            .build()?)
    }

    pub fn build_mutate_request(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<reqwest::Request, GatewayError> {
        let mut url = self.endpoint(REST_PREFIX, table)?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                pairs.append_pair(filter.column(), &encode_filter(filter));
            }
        }
        Ok(self
            .authorized(Method::PATCH, url)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(patch)
            .build()?)
    }

    pub fn build_insert_request(&self, table: &str, record: &Value) -> Result<reqwest::Request, GatewayError> {
        let url = self.endpoint(REST_PREFIX, table)?;
        Ok(self
            .authorized(Method::POST, url)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(record)
            .build()?)
    }

    pub fn build_rpc_request(&self, name: &str, params: &Value) -> Result<reqwest::Request, GatewayError> {
        let url = self.endpoint(RPC_PREFIX, name)?;
        Ok(self
            .authorized(Method::POST, url)
            .header("Content-Type", "application/json")
            .json(params)
            .build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<String, GatewayError> {
        debug!(method = %request.method(), url = %request.url(), "sending backend request");
        let res = self.http.execute(request).await?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by backend: {}", body);
            return Err(GatewayError::RateLimited(body));
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            warn!(status, %body, "backend error");
            return Err(GatewayError::Status { status, body });
        }
        Ok(res.text().await?)
    }

    async fn fetch_rows(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, GatewayError> {
        let request = self.build_query_request(table, select, filters, order)?;
        let body = self.execute(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn poll_changes(self, table: String, filter: Filter, sender: FeedSender, mut seen: HashMap<String, Value>) {
        let filters = [filter];
        loop {
            tokio::select! {
                _ = sender.closed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            let rows = match self.fetch_rows(&table, "*", &filters, None).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(?err, feed = %sender.id(), table = %table, "change poll failed");
                    continue;
                }
            };
            for row in rows {
                let key = row_key(&row);
                if seen.get(&key) == Some(&row) {
                    continue;
                }
                seen.insert(key, row.clone());
                if sender.send(ChangeEvent { new: row }).is_err() {
                    debug!(feed = %sender.id(), "change feed dropped by consumer");
                    return;
                }
            }
        }
        debug!(feed = %sender.id(), table = %table, "change poller stopped");
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    #[instrument(skip_all, fields(table = %table))]
    async fn query(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, GatewayError> {
        self.fetch_rows(table, select, filters, order).await
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn query_one(&self, table: &str, select: &str, filters: &[Filter]) -> Result<Value, GatewayError> {
        single_row(self.fetch_rows(table, select, filters, None).await?)
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn mutate(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), GatewayError> {
        let request = self.build_mutate_request(table, filters, &patch)?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert(&self, table: &str, record: Value) -> Result<(), GatewayError> {
        let request = self.build_insert_request(table, &record)?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn subscribe(&self, table: &str, filter: Filter) -> Result<ChangeFeed, GatewayError> {
        let (feed, sender) = ChangeFeed::channel();
        // Baseline so the first poll only reports real changes.
        let seen = match self.fetch_rows(table, "*", std::slice::from_ref(&filter), None).await {
            Ok(rows) => rows.into_iter().map(|row| (row_key(&row), row)).collect(),
            Err(err) => {
                warn!(?err, table, "change feed baseline failed; first poll will report current rows");
                HashMap::new()
            }
        };
        info!(feed = %feed.id(), table, column = filter.column(), "change feed opened");
        tokio::spawn(self.clone().poll_changes(table.to_string(), filter, sender, seen));
        Ok(feed)
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn invoke_procedure(&self, name: &str, params: Value) -> Result<Value, GatewayError> {
        let request = self.build_rpc_request(name, &params)?;
        let body = self.execute(request).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn encode_filter(filter: &Filter) -> String {
    match filter {
        Filter::Eq { value: Value::Null, .. } => "is.null".to_string(),
        Filter::Eq { value, .. } => format!("eq.{}", encode_value(value)),
        Filter::Gte { value, .. } => format!("gte.{}", encode_value(value)),
    }
}

fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_key(row: &Value) -> String {
    match row.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> RestGateway {
        RestGateway::new("https://project.example.co", "anon-key".into(), Duration::from_millis(50)).unwrap()
    }

    fn header<'a>(req: &'a reqwest::Request, name: &str) -> &'a str {
        req.headers().get(name).and_then(|h| h.to_str().ok()).unwrap()
    }

    #[test]
    fn query_request_encodes_select_filters_and_order() {
        let req = gateway()
            .build_query_request(
                "products",
                "*,product_images(*)",
                &[Filter::eq("status", "pending")],
                Some(&Order::desc("created_at")),
            )
            .unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.url().path(), "/rest/v1/products");
        let pairs: Vec<(String, String)> = req.url().query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "*,product_images(*)".to_string()),
                ("status".to_string(), "eq.pending".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
        assert_eq!(header(&req, "apikey"), "anon-key");
        assert_eq!(header(&req, "Authorization"), "Bearer anon-key");
    }

    #[test]
    fn mutate_request_is_patch_with_minimal_return() {
        let req = gateway()
            .build_mutate_request("products", &[Filter::eq("id", "p-2")], &json!({ "status": "active" }))
            .unwrap();
        assert_eq!(req.method(), Method::PATCH);
        assert_eq!(req.url().query(), Some("id=eq.p-2"));
        assert_eq!(header(&req, "Prefer"), "return=minimal");
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let body: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(body, json!({ "status": "active" }));
    }

    #[test]
    fn insert_and_rpc_paths() {
        let gw = gateway();
        let req = gw.build_insert_request("notifications", &json!({ "user_id": "s" })).unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.url().path(), "/rest/v1/notifications");

        let req = gw
            .build_rpc_request("get_admin_dashboard_metrics", &json!({ "time_range": "7d" }))
            .unwrap();
        assert_eq!(req.url().path(), "/rest/v1/rpc/get_admin_dashboard_metrics");
        assert_eq!(header(&req, "Content-Type"), "application/json");
    }

    #[test]
    fn base_url_with_path_prefix_is_kept() {
        let gw = RestGateway::new("http://localhost:54321/proxy", "k".into(), Duration::from_secs(1)).unwrap();
        let req = gw.build_insert_request("products", &json!({})).unwrap();
        assert_eq!(req.url().path(), "/proxy/rest/v1/products");
    }

    #[test]
    fn filter_encoding() {
        assert_eq!(encode_filter(&Filter::eq("id", 7)), "eq.7");
        assert_eq!(encode_filter(&Filter::eq("seller_id", Value::Null)), "is.null");
        assert_eq!(
            encode_filter(&Filter::gte("created_at", "2024-01-01T00:00:00Z")),
            "gte.2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = RestGateway::new("not a url", "k".into(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUrl(_)));
    }
}
