use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget variant; a closed channel must never fail the request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events published after a state change has been committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),

    CartCleared {
        user_id: Uuid,
    },

    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
        online: bool,
    },
    OrderCancelled {
        order_id: Uuid,
        restocked_lines: usize,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderAssigned {
        order_id: Uuid,
        deliveryman_id: Uuid,
    },
    DeliveryDecisionRecorded {
        order_id: Uuid,
        deliveryman_id: Uuid,
        decision: String,
    },
    OrderDelivered {
        order_id: Uuid,
        deliveryman_id: Option<Uuid>,
    },

    PaymentInitiated {
        tran_id: String,
        amount: Decimal,
    },
    PaymentSucceeded {
        tran_id: String,
        order_id: Uuid,
    },
    PaymentFailed {
        tran_id: String,
        reason: String,
    },
    PaymentCancelled {
        tran_id: String,
    },
}

/// Drains the channel, logging every event. Runs until all senders drop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total,
                online,
            } => {
                info!(%order_id, %user_id, %total, online, "order created");
            }
            Event::OrderCancelled {
                order_id,
                restocked_lines,
            } => {
                info!(%order_id, restocked_lines, "order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::PaymentFailed { tran_id, reason } => {
                warn!(%tran_id, %reason, "payment failed");
            }
            other => {
                info!(event = ?other, "domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
