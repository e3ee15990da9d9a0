use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveValue::Set, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::{order_transition, OrderStatus, TransitionTrigger},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, RetryConfig, TransientPolicy},
    repositories::OrderRepository,
    services::orders::OrderDetails,
};

/// Outcome reported by the payment gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Confirmed,
    Failed,
}

/// External payment confirmation. Signatures are checked upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSignal {
    pub outcome: PaymentOutcome,
    /// Gateway transaction reference recorded on the order
    pub reference: Option<String>,
}

impl PaymentSignal {
    fn route(&self) -> (OrderStatus, TransitionTrigger) {
        match self.outcome {
            PaymentOutcome::Confirmed => (OrderStatus::Processing, TransitionTrigger::PaymentConfirmed),
            PaymentOutcome::Failed => (OrderStatus::Cancelled, TransitionTrigger::PaymentFailed),
        }
    }
}

/// Whether `trigger` may move an order from `from` to `to`.
///
/// Admins may drive any edge of the lifecycle. Payment signals only settle a
/// pending order. Terminal states accept nothing and same-state moves are
/// rejected.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus, trigger: TransitionTrigger) -> bool {
    use OrderStatus::*;
    use TransitionTrigger::*;

    match (from, to, trigger) {
        (Pending, Processing, Admin | PaymentConfirmed) => true,
        (Pending, Cancelled, Admin | PaymentFailed) => true,
        (Processing, Completed, Admin) => true,
        (Processing, Cancelled, Admin) => true,
        _ => false,
    }
}

/// Applies status changes to orders under optimistic concurrency and keeps
/// the append-only transition log.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    orders: OrderRepository,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            orders: OrderRepository::new(db.clone()),
            db,
            event_sender,
            config,
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::once(self.config.transient_retry_delay())
    }

    /// Moves an order to `target`.
    ///
    /// # Returns
    ///
    /// * `Ok(OrderDetails)` - The order after the change
    /// * `Err(ServiceError::NotFound)` - No such order
    /// * `Err(ServiceError::InvalidTransition)` - Edge not allowed for this trigger
    /// * `Err(ServiceError::Conflict)` - Another writer changed the order first
    #[instrument(skip(self, note), fields(order_id = %order_id, target = %target, trigger = %trigger))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        trigger: TransitionTrigger,
        note: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        self.apply(order_id, target, trigger, note, None).await
    }

    /// Feeds a gateway outcome through the same transition table, recording
    /// the gateway reference on the order.
    #[instrument(skip(self, signal), fields(order_id = %order_id, outcome = ?signal.outcome))]
    pub async fn apply_payment_signal(
        &self,
        order_id: Uuid,
        signal: PaymentSignal,
    ) -> Result<OrderDetails, ServiceError> {
        let (target, trigger) = signal.route();
        let note = signal
            .reference
            .as_ref()
            .map(|reference| format!("gateway reference {}", reference));
        self.apply(order_id, target, trigger, note, signal.reference.as_deref())
            .await
    }

    /// Transition log of an order, oldest first
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_transition::Model>, ServiceError> {
        self.load(order_id).await?;
        let orders = &self.orders;
        with_retry(&self.retry(), TransientPolicy, move || {
            orders.transitions(orders.db(), order_id)
        })
        .await
    }

    async fn load(&self, order_id: Uuid) -> Result<crate::entities::order::Model, ServiceError> {
        let orders = &self.orders;
        with_retry(&self.retry(), TransientPolicy, move || {
            orders.find_by_id(orders.db(), order_id)
        })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", order_id)))
    }

    async fn apply(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        trigger: TransitionTrigger,
        note: Option<String>,
        payment_reference: Option<&str>,
    ) -> Result<OrderDetails, ServiceError> {
        let current = self.load(order_id).await?;
        let from = current.status;

        if !is_valid_transition(from, target, trigger) {
            warn!(%from, "rejected order transition");
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: target.to_string(),
                trigger: trigger.to_string(),
            });
        }

        let db = self.db.as_ref();
        let orders = &self.orders;
        let expected_version = current.version;
        let note = note.as_deref();
        let applied = with_retry(&self.retry(), TransientPolicy, move || async move {
            let now = Utc::now();
            let txn = db.begin().await?;
            let swapped = orders
                .compare_and_set_status(
                    &txn,
                    order_id,
                    from,
                    expected_version,
                    target,
                    payment_reference,
                    now,
                )
                .await?;
            if !swapped {
                txn.rollback().await?;
                return Ok::<_, ServiceError>(false);
            }
            orders
                .append_transition(
                    &txn,
                    order_transition::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        from_status: Set(from),
                        to_status: Set(target),
                        trigger: Set(trigger),
                        note: Set(note.map(str::to_string)),
                        created_at: Set(now),
                    },
                )
                .await?;
            txn.commit().await?;
            Ok(true)
        })
        .await?;

        if !applied {
            warn!(%from, "order changed concurrently; transition not applied");
            return Err(ServiceError::Conflict(format!(
                "order {} was modified concurrently; re-read its status",
                order_id
            )));
        }

        counter!("orderdesk.orders.transitions", 1);
        info!(%from, to = %target, "order status changed");

        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status: from,
            new_status: target,
            trigger,
        });

        let updated = self.load(order_id).await?;
        let items = with_retry(&self.retry(), TransientPolicy, move || {
            orders.items(orders.db(), order_id)
        })
        .await?;
        Ok(OrderDetails {
            order: updated,
            items,
        })
    }
}
