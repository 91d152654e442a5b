#![allow(dead_code)]

use async_trait::async_trait;
use marketplace_sync::gateway::{
    single_row, ChangeEvent, ChangeFeed, FeedSender, Filter, GatewayError, Order, RemoteGateway,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keys holding embedded (joined) data on stored product rows.
const JOIN_KEYS: [&str; 2] = ["product_images", "users"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Query,
    QueryOne,
    Mutate,
    Insert,
    Subscribe,
    Invoke,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query { table: String, select: String, filters: Vec<Filter>, order: Option<Order> },
    QueryOne { table: String, select: String },
    Mutate { table: String, filters: Vec<Filter>, patch: Value },
    Insert { table: String, record: Value },
    Subscribe { table: String, filter: Filter },
    Invoke { name: String, params: Value },
}

struct Subscriber {
    table: String,
    filter: Filter,
    sender: FeedSender,
}

/// In-memory backend that records every call. Failures can be scripted per
/// operation; each scripted failure is consumed by the next matching call.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failures: Arc<Mutex<HashMap<Op, VecDeque<GatewayError>>>>,
    procedures: Arc<Mutex<VecDeque<Result<Value, GatewayError>>>>,
    query_results: Arc<Mutex<VecDeque<Vec<Value>>>>,
    emit_on_fetch: Arc<Mutex<Option<(String, Value)>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().await.get(table).cloned().unwrap_or_default()
    }

    pub async fn fail_next(&self, op: Op, err: GatewayError) {
        self.failures.lock().await.entry(op).or_default().push_back(err);
    }

    pub async fn push_procedure_result(&self, result: Result<Value, GatewayError>) {
        self.procedures.lock().await.push_back(result);
    }

    /// Answer the next `query` with `rows` verbatim, bypassing stored tables.
    pub async fn respond_next_query(&self, rows: Vec<Value>) {
        self.query_results.lock().await.push_back(rows);
    }

    /// Publish `payload` to `table` subscribers while the next `query_one` is
    /// in flight: after the rows are read, before they are returned.
    pub async fn emit_during_next_fetch(&self, table: &str, payload: Value) {
        *self.emit_on_fetch.lock().await = Some((table.to_string(), payload));
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, op: Op) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| call_op(c) == op)
            .count()
    }

    pub async fn open_feeds(&self) -> usize {
        self.subscribers
            .lock()
            .await
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }

    /// Publish a change event to every subscriber of `table` whose filter
    /// matches `row_for_filter`, carrying `payload` as `new`.
    pub async fn emit(&self, table: &str, row_for_filter: &Value, payload: Value) {
        for sub in self.subscribers.lock().await.iter() {
            if sub.table == table && sub.filter.matches(row_for_filter) {
                let _ = sub.sender.send(ChangeEvent { new: payload.clone() });
            }
        }
    }

    /// Drop every producer so open feeds end once their buffer is drained.
    pub async fn end_feeds(&self) {
        self.subscribers.lock().await.clear();
    }

    async fn take_failure(&self, op: Op) -> Option<GatewayError> {
        self.failures.lock().await.get_mut(&op).and_then(|q| q.pop_front())
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    async fn select_rows(&self, table: &str, select: &str, filters: &[Filter]) -> Vec<Value> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .map(|row| project(row, select))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn call_op(call: &Call) -> Op {
    match call {
        Call::Query { .. } => Op::Query,
        Call::QueryOne { .. } => Op::QueryOne,
        Call::Mutate { .. } => Op::Mutate,
        Call::Insert { .. } => Op::Insert,
        Call::Subscribe { .. } => Op::Subscribe,
        Call::Invoke { .. } => Op::Invoke,
    }
}

/// `*` selects return the whole stored row; any other select returns only the
/// embedded join keys.
fn project(row: &Value, select: &str) -> Value {
    if select.starts_with('*') {
        return row.clone();
    }
    let mut out = Map::new();
    for key in JOIN_KEYS {
        if let Some(v) = row.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

/// Change payloads carry base columns only.
fn strip_joins(row: &Value) -> Value {
    let mut row = row.clone();
    if let Value::Object(obj) = &mut row {
        for key in JOIN_KEYS {
            obj.remove(key);
        }
    }
    row
}

fn sort_key(row: &Value, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl RemoteGateway for RecordingGateway {
    async fn query(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, GatewayError> {
        self.record(Call::Query {
            table: table.into(),
            select: select.into(),
            filters: filters.to_vec(),
            order: order.cloned(),
        })
        .await;
        if let Some(err) = self.take_failure(Op::Query).await {
            return Err(err);
        }
        if let Some(rows) = self.query_results.lock().await.pop_front() {
            return Ok(rows);
        }
        let mut rows = self.select_rows(table, select, filters).await;
        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ord = sort_key(a, &order.column).cmp(&sort_key(b, &order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn query_one(&self, table: &str, select: &str, filters: &[Filter]) -> Result<Value, GatewayError> {
        self.record(Call::QueryOne {
            table: table.into(),
            select: select.into(),
        })
        .await;
        if let Some(err) = self.take_failure(Op::QueryOne).await {
            return Err(err);
        }
        let rows = self.select_rows(table, select, filters).await;
        let pending = self.emit_on_fetch.lock().await.take();
        if let Some((feed_table, payload)) = pending {
            if let Some(row) = rows.first() {
                self.emit(&feed_table, row, payload).await;
            }
        }
        single_row(rows)
    }

    async fn mutate(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), GatewayError> {
        self.record(Call::Mutate {
            table: table.into(),
            filters: filters.to_vec(),
            patch: patch.clone(),
        })
        .await;
        if let Some(err) = self.take_failure(Op::Mutate).await {
            return Err(err);
        }
        let mut changed = Vec::new();
        {
            let mut tables = self.tables.lock().await;
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
                    if let (Value::Object(obj), Value::Object(p)) = (&mut *row, &patch) {
                        for (k, v) in p {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                    changed.push(row.clone());
                }
            }
        }
        for row in changed {
            self.emit(table, &row, strip_joins(&row)).await;
        }
        Ok(())
    }

    async fn insert(&self, table: &str, record: Value) -> Result<(), GatewayError> {
        self.record(Call::Insert {
            table: table.into(),
            record: record.clone(),
        })
        .await;
        if let Some(err) = self.take_failure(Op::Insert).await {
            return Err(err);
        }
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn subscribe(&self, table: &str, filter: Filter) -> Result<ChangeFeed, GatewayError> {
        self.record(Call::Subscribe {
            table: table.into(),
            filter: filter.clone(),
        })
        .await;
        if let Some(err) = self.take_failure(Op::Subscribe).await {
            return Err(err);
        }
        let (feed, sender) = ChangeFeed::channel();
        self.subscribers.lock().await.push(Subscriber {
            table: table.into(),
            filter,
            sender,
        });
        Ok(feed)
    }

    async fn invoke_procedure(&self, name: &str, params: Value) -> Result<Value, GatewayError> {
        self.record(Call::Invoke {
            name: name.into(),
            params,
        })
        .await;
        if let Some(err) = self.take_failure(Op::Invoke).await {
            return Err(err);
        }
        self.procedures
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }
}

pub fn backend_down() -> GatewayError {
    GatewayError::Status {
        status: 503,
        body: "service unavailable".into(),
    }
}
