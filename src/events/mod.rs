//! Domain events emitted by the services layer.
//!
//! Events mirror the state-changing operations and fan out over a bounded
//! mpsc channel to a background processor. Emission is best-effort: a full
//! or closed channel logs a warning and never fails the operation that
//! produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events that can occur in the storefront backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentIntentCreated {
        order_id: Uuid,
        payment_intent_id: String,
        amount_minor: i64,
    },
    OrderPaid {
        order_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    DownloadLinksIssued {
        order_id: Uuid,
        link_count: usize,
    },
    FileDownloaded {
        order_id: Uuid,
        product_id: Uuid,
        remaining_downloads: i32,
    },
    ConfirmationEmailSent {
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Enqueue an event without blocking the caller; drops with a warning
    /// if the processor cannot keep up.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Background consumer: structured-log sink for every event.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PaymentIntentCreated {
                order_id,
                payment_intent_id,
                amount_minor,
            } => {
                info!(%order_id, %payment_intent_id, amount_minor, "payment intent created");
            }
            Event::OrderPaid { order_id } => {
                info!(%order_id, "order paid");
            }
            Event::PaymentFailed { order_id } => {
                warn!(%order_id, "payment failed");
            }
            Event::DownloadLinksIssued {
                order_id,
                link_count,
            } => {
                info!(%order_id, link_count, "download links issued");
            }
            Event::FileDownloaded {
                order_id,
                product_id,
                remaining_downloads,
            } => {
                info!(%order_id, %product_id, remaining_downloads, "file downloaded");
            }
            Event::ConfirmationEmailSent { order_id } => {
                info!(%order_id, "confirmation email sent");
            }
        }
    }
}
