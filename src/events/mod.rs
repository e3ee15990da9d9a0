use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, TransitionTrigger};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes without waiting. The operation that produced the event has
    /// already committed, so a full or closed channel drops the event with a
    /// warning instead of holding up the caller.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                counter!("orderdesk.events.dropped", 1);
                warn!(event = ?event, "event channel full; domain event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                counter!("orderdesk.events.dropped", 1);
                warn!(event = ?event, "event channel closed; domain event dropped");
            }
        }
    }
}

/// Domain events published after a committed change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        session_key: String,
        service_id: String,
        quantity: i32,
    },
    CartItemUpdated {
        session_key: String,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        session_key: String,
        item_id: Uuid,
    },
    CartCleared {
        session_key: String,
    },
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        session_key: String,
        grand_total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        trigger: TransitionTrigger,
    },
}

/// Drains the event channel. Delivery to customers (mail, SMS) is not done
/// here; events are only logged.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                grand_total,
                ..
            } => {
                info!(%order_id, %order_number, %grand_total, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                trigger,
            } => {
                info!(%order_id, %old_status, %new_status, %trigger, "order status changed");
            }
            other => {
                info!(event = ?other, "cart event");
            }
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
