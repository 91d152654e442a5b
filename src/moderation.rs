//! Admin moderation queue: the working set of listings awaiting review and
//! the approve/reject decision applied to one listing at a time.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Tables;
use crate::gateway::{Filter, GatewayError, Order, RemoteGateway};
use crate::mapper::{map_product, RawProductRow};
use crate::model::{ListingStatus, NewNotification, Product};

/// Backend status value of listings awaiting moderation.
pub const PENDING_STATUS: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-facing message produced by a queue operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

impl Notice {
    fn success(description: String) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: "Success".into(),
            description,
        }
    }

    fn error(description: &str) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error".into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Status written and, when the seller is known, notified.
    Applied(ListingStatus),
    /// Status written but the seller notification could not be created.
    /// The status change stands.
    NotificationFailed(ListingStatus),
    /// Status write failed; nothing changed.
    MutationFailed,
}

pub struct ModerationQueue<G: RemoteGateway + ?Sized> {
    gateway: Arc<G>,
    tables: Tables,
    working_set: Vec<Product>,
    loading: bool,
    notices: Vec<Notice>,
}

impl<G: RemoteGateway + ?Sized> ModerationQueue<G> {
    pub fn new(gateway: Arc<G>, tables: Tables) -> Self {
        Self {
            gateway,
            tables,
            working_set: Vec::new(),
            loading: false,
            notices: Vec::new(),
        }
    }

    /// Listings awaiting moderation, newest first, as of the last successful
    /// load.
    pub fn working_set(&self) -> &[Product] {
        &self.working_set
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Replace the working set with every pending listing. On failure the
    /// previous working set is kept and an error notice is recorded.
    #[instrument(skip_all)]
    pub async fn load_pending(&mut self) -> Result<usize, GatewayError> {
        self.loading = true;
        let result = self
            .gateway
            .query(
                &self.tables.products,
                &self.tables.full_select(),
                &[Filter::eq("status", PENDING_STATUS)],
                Some(&Order::desc("created_at")),
            )
            .await;
        self.loading = false;

        let rows = match result {
            Ok(rows) => rows,
            Err(err) => {
                error!(?err, "failed to fetch pending products");
                self.notices.push(Notice::error("Failed to fetch pending products"));
                return Err(err);
            }
        };

        let mut products = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            match RawProductRow::from_value(row) {
                Ok(raw) => products.push(map_product(&raw)),
                Err(err) => {
                    warn!(?err, "skipping undecodable pending row");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            self.notices.push(Notice::error(&format!(
                "{} pending product(s) could not be read",
                skipped
            )));
        }
        info!(count = products.len(), skipped, "pending products loaded");
        self.working_set = products;
        Ok(self.working_set.len())
    }

    /// Approve or reject one listing.
    ///
    /// Steps run strictly in sequence: status write, seller notification
    /// (best effort, seller looked up in the working set), working-set
    /// reload. A failed status write aborts before any other step.
    #[instrument(skip_all, fields(product_id = %product_id, approve = approve))]
    pub async fn decide(&mut self, product_id: &str, approve: bool) -> Decision {
        self.loading = true;
        let status = ListingStatus::decided(approve);

        if let Err(err) = self
            .gateway
            .mutate(
                &self.tables.products,
                &[Filter::eq("id", product_id)],
                json!({ "status": status.as_str() }),
            )
            .await
        {
            error!(?err, "failed to update product status");
            self.notices.push(Notice::error("Failed to update product status"));
            self.loading = false;
            return Decision::MutationFailed;
        }

        let seller_id = self
            .working_set
            .iter()
            .find(|p| p.id == product_id)
            .map(|p| p.seller_id.clone())
            .filter(|id| !id.is_empty());

        let notified = match seller_id {
            Some(seller_id) => self.notify_seller(&seller_id, approve).await,
            None => {
                warn!("seller unknown for decided product; no notification sent");
                true
            }
        };

        let decision = if notified {
            let verb = if approve { "approved" } else { "rejected" };
            self.notices
                .push(Notice::success(format!("Product {} successfully", verb)));
            Decision::Applied(status)
        } else {
            self.notices.push(Notice::error("Failed to notify seller"));
            Decision::NotificationFailed(status)
        };

        // Reflect the decision; the decided listing no longer matches the
        // pending predicate.
        if let Err(err) = self.load_pending().await {
            debug!(?err, "reload after decision failed; notice already recorded");
        }
        self.loading = false;
        info!(?decision, "moderation decision applied");
        decision
    }

    async fn notify_seller(&self, seller_id: &str, approved: bool) -> bool {
        let notification = NewNotification::product_status(seller_id, approved);
        let record = match serde_json::to_value(&notification) {
            Ok(record) => record,
            Err(err) => {
                error!(?err, "failed to encode notification");
                return false;
            }
        };
        match self.gateway.insert(&self.tables.notifications, record).await {
            Ok(()) => true,
            Err(err) => {
                error!(?err, seller_id, "failed to create seller notification");
                false
            }
        }
    }
}
