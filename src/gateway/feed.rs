use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::GatewayError;

/// One mutation observed on a subscribed row. `new` carries the changed
/// columns only; joined sub-resources are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub new: Value,
}

/// Cancellable live feed of [`ChangeEvent`]s for one subscription.
///
/// Delivery contract:
/// - one consumer; events arrive one at a time, FIFO per feed;
/// - no back-pressure, the buffer is unbounded;
/// - no ordering guarantee against the client's own writes: a local
///   `mutate` may be echoed before or after its response resolves;
/// - after [`ChangeFeed::close`] nothing is delivered, buffered events
///   included, and the producer observes the closure.
#[derive(Debug)]
pub struct ChangeFeed {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    closed: bool,
}

/// Producer half of a [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct FeedSender {
    id: Uuid,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn channel() -> (ChangeFeed, FeedSender) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChangeFeed {
                id,
                rx,
                closed: false,
            },
            FeedSender { id, tx },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next event, or `None` once the feed is closed or the producer is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Drive the feed, invoking `handler` once per event. The next event is
    /// not taken until the previous handler future has completed.
    pub async fn on_event<F, Fut>(&mut self, mut handler: F)
    where
        F: FnMut(ChangeEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        while let Some(event) = self.recv().await {
            handler(event).await;
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        debug!(feed = %self.id, dropped, "change feed closed");
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.close();
    }
}

impl Stream for ChangeFeed {
    type Item = ChangeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl FeedSender {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn send(&self, event: ChangeEvent) -> Result<(), GatewayError> {
        self.tx.send(event).map_err(|_| GatewayError::FeedClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer closes or drops the feed.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
