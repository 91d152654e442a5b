//! Live view of a single product kept current from the backend change feed.
//!
//! The feed is opened before the initial fetch, and events are only consumed
//! after that fetch has resolved. An event raised while the fetch is in flight
//! is therefore applied on top of the fetched row, never overwritten by it.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Tables;
use crate::gateway::{ChangeEvent, ChangeFeed, Filter, GatewayError, RemoteGateway};
use crate::mapper::{map_product, JoinedParts, RawProductRow};
use crate::model::Product;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    Ready(Product),
    NotFound,
    /// The initial fetch failed; carries the reported error.
    Failed(String),
}

pub struct LiveProductView<G: RemoteGateway + ?Sized> {
    gateway: Arc<G>,
    tables: Tables,
    product_id: String,
    state: ViewState,
    feed: Option<ChangeFeed>,
    closed: bool,
}

impl<G: RemoteGateway + ?Sized> LiveProductView<G> {
    /// Open the change feed for `product_id`, then fetch the product with its
    /// images and seller contact.
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn mount(gateway: Arc<G>, tables: Tables, product_id: &str) -> Self {
        let feed = match gateway
            .subscribe(&tables.products, Filter::eq("id", product_id))
            .await
        {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(?err, "could not open change feed; view will not update live");
                None
            }
        };

        let mut view = Self {
            gateway,
            tables,
            product_id: product_id.to_string(),
            state: ViewState::Loading,
            feed,
            closed: false,
        };
        view.state = match view.fetch_full().await {
            Ok(Some(product)) => ViewState::Ready(product),
            Ok(None) => ViewState::NotFound,
            Err(err) => {
                error!(?err, "initial product fetch failed");
                ViewState::Failed(err.to_string())
            }
        };
        info!(state = state_name(&view.state), "live product mounted");
        view
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn product(&self) -> Option<&Product> {
        match &self.state {
            ViewState::Ready(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Re-run the full fetch. On failure a ready view keeps its last known
    /// product.
    pub async fn refresh(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Ok(());
        }
        match self.fetch_full().await {
            Ok(Some(product)) => {
                self.state = ViewState::Ready(product);
                Ok(())
            }
            Ok(None) => {
                self.state = ViewState::NotFound;
                Ok(())
            }
            Err(err) => {
                warn!(?err, product_id = %self.product_id, "product refresh failed");
                if !matches!(self.state, ViewState::Ready(_)) {
                    self.state = ViewState::Failed(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Merge one change-feed event into the view model.
    ///
    /// Columns present in the payload replace the known ones, absent columns
    /// are kept. Images and seller contact are re-read because the feed never
    /// carries them; if that read fails the previous ones are kept. A view
    /// with no product yet re-reads the full row and overlays the payload on
    /// it. The result replaces the stored view model, last event wins.
    pub async fn apply_change(&mut self, event: ChangeEvent) {
        if self.closed {
            debug!(product_id = %self.product_id, "change after close ignored");
            return;
        }
        let partial = match RawProductRow::from_value(event.new) {
            Ok(row) => row,
            Err(err) => {
                warn!(?err, product_id = %self.product_id, "undecodable change payload");
                return;
            }
        };
        let next = match &self.state {
            ViewState::Ready(known) => {
                let mut next = partial.overlay(known);
                match self.fetch_joined().await {
                    Ok(Some(parts)) => parts.apply_to(&mut next),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(?err, product_id = %self.product_id, "joined data refetch failed; keeping previous");
                    }
                }
                next
            }
            // Nothing known yet: read the whole row so a partial payload does
            // not produce a blank product.
            _ => match self.fetch_full().await {
                Ok(Some(fetched)) => partial.overlay(&fetched),
                Ok(None) => map_product(&partial),
                Err(err) => {
                    warn!(?err, product_id = %self.product_id, "full refetch after change failed");
                    map_product(&partial)
                }
            },
        };
        debug!(product_id = %self.product_id, status = %next.status, "product updated from feed");
        self.state = ViewState::Ready(next);
    }

    /// Wait for the next feed event and apply it. Returns `false` once the
    /// feed has ended or the view is closed.
    pub async fn next_change(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let event = match self.feed.as_mut() {
            Some(feed) => feed.recv().await,
            None => None,
        };
        match event {
            Some(event) => {
                self.apply_change(event).await;
                true
            }
            None => false,
        }
    }

    /// Apply feed events one at a time until the feed ends.
    pub async fn run(&mut self) {
        while self.next_change().await {}
    }

    /// Cancel the feed. No state changes after this.
    pub fn close(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.close();
        }
        self.closed = true;
        info!(product_id = %self.product_id, "live product closed");
    }

    fn id_filter(&self) -> [Filter; 1] {
        [Filter::eq("id", self.product_id.as_str())]
    }

    async fn fetch_full(&self) -> Result<Option<Product>, GatewayError> {
        let row = match self
            .gateway
            .query_one(&self.tables.products, &self.tables.full_select(), &self.id_filter())
            .await
        {
            Ok(row) => row,
            Err(GatewayError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(Some(map_product(&RawProductRow::from_value(row)?)))
    }

    async fn fetch_joined(&self) -> Result<Option<JoinedParts>, GatewayError> {
        let row: Value = match self
            .gateway
            .query_one(&self.tables.products, &self.tables.joined_select(), &self.id_filter())
            .await
        {
            Ok(row) => row,
            Err(GatewayError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(Some(JoinedParts::from_row(&RawProductRow::from_value(row)?)))
    }
}

fn state_name(state: &ViewState) -> &'static str {
    match state {
        ViewState::Loading => "loading",
        ViewState::Ready(_) => "ready",
        ViewState::NotFound => "not_found",
        ViewState::Failed(_) => "failed",
    }
}
