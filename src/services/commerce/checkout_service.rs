use crate::{
    config::AppConfig,
    entities::{order, order_item, OrderStatus},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, RetryConfig, TransientPolicy},
    repositories::{CartRepository, OrderRepository},
    services::{
        commerce::{
            cart_service::validate_session_key,
            catalog::{resolve_quote, ServiceCatalog, ServiceQuote},
            pricing_service::{PricedLine, PricingEngine},
        },
        orders::OrderDetails,
    },
};
use chrono::Utc;
use futures::future::try_join_all;
use metrics::counter;
use sea_orm::{ActiveValue::Set, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Contact details captured with the order
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerContact {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
}

/// Checkout request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutInput {
    #[validate(length(min = 1, max = 128))]
    pub session_key: String,
    /// Client-chosen token; retries with the same key return the same order
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    /// Opaque identity from the session provider when the shopper is signed in
    #[validate(length(min = 1, max = 128))]
    pub customer_id: Option<String>,
    #[validate]
    pub customer: CustomerContact,
}

/// Result of a checkout call
#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// A new order was assembled and the cart emptied
    Created(OrderDetails),
    /// The idempotency key matched an existing order; nothing changed
    Replayed(OrderDetails),
}

impl CheckoutOutcome {
    pub fn order(&self) -> &OrderDetails {
        match self {
            Self::Created(order) | Self::Replayed(order) => order,
        }
    }

    pub fn into_order(self) -> OrderDetails {
        match self {
            Self::Created(order) | Self::Replayed(order) => order,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

enum Claim {
    Won(OrderDetails),
    Lost,
}

/// Turns a session cart into an immutable priced order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    carts: CartRepository,
    orders: OrderRepository,
    catalog: Arc<dyn ServiceCatalog>,
    pricing: PricingEngine,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn ServiceCatalog>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            carts: CartRepository::new(db.clone()),
            orders: OrderRepository::new(db.clone()),
            pricing: PricingEngine::new(config.tax_rate),
            db,
            catalog,
            event_sender,
            config,
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::once(self.config.transient_retry_delay())
    }

    /// Assembles an order from the session's cart.
    ///
    /// Every line is re-priced from the catalog at this moment; those prices
    /// are frozen into the order items. Writing the order and emptying the
    /// cart happen in one transaction guarded by the cart version, so at most
    /// one order is produced per cart generation.
    ///
    /// # Returns
    ///
    /// * `Ok(CheckoutOutcome::Created)` - New order in `pending`
    /// * `Ok(CheckoutOutcome::Replayed)` - Order already created with this idempotency key
    /// * `Err(ServiceError::EmptyCart)` - No cart or no items
    /// * `Err(ServiceError::ServiceUnavailable)` - A line's service no longer resolves
    /// * `Err(ServiceError::ConcurrentCheckout)` - The cart changed while checking out
    #[instrument(skip(self, input), fields(session_key = %input.session_key))]
    pub async fn checkout(&self, input: CheckoutInput) -> Result<CheckoutOutcome, ServiceError> {
        input.validate()?;
        validate_session_key(&input.session_key)?;

        if let Some(existing) = self.find_replay(&input).await? {
            info!(order_id = %existing.order.id, "checkout replayed by idempotency key");
            return Ok(CheckoutOutcome::Replayed(existing));
        }

        let db = self.db.as_ref();
        let carts = &self.carts;
        let session_key = input.session_key.as_str();

        let cart = with_retry(&self.retry(), TransientPolicy, move || {
            carts.find_by_session(db, session_key)
        })
        .await?
        .ok_or_else(|| ServiceError::EmptyCart(input.session_key.clone()))?;

        let cart_id = cart.id;
        let items = with_retry(&self.retry(), TransientPolicy, move || {
            carts.items(db, cart_id)
        })
        .await?;

        if items.is_empty() {
            warn!("checkout attempted on empty cart");
            return Err(ServiceError::EmptyCart(input.session_key.clone()));
        }

        // Authoritative prices, resolved before any transaction is opened
        let retry = self.retry();
        let quotes = try_join_all(
            items
                .iter()
                .map(|item| resolve_quote(self.catalog.as_ref(), &retry, &item.service_id)),
        )
        .await?;

        let mut resolved: Vec<(i32, ServiceQuote)> = Vec::with_capacity(items.len());
        for (item, quote) in items.iter().zip(quotes) {
            match quote {
                Some(quote) => resolved.push((item.quantity, quote)),
                None => {
                    warn!(service_id = %item.service_id, "checkout aborted: service unavailable");
                    return Err(ServiceError::ServiceUnavailable(item.service_id.clone()));
                }
            }
        }

        let currency = resolved[0].1.currency.clone();
        if let Some((_, odd)) = resolved.iter().find(|(_, q)| q.currency != currency) {
            return Err(ServiceError::ValidationError(format!(
                "cart mixes currencies {} and {}",
                currency, odd.currency
            )));
        }

        let lines: Vec<PricedLine> = resolved
            .iter()
            .map(|(qty, q)| PricedLine::new(q.unit_price, *qty))
            .collect();
        let totals = self.pricing.totals(&lines, &currency)?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", order_id.to_string()[..8].to_uppercase())),
            session_key: Set(input.session_key.clone()),
            customer_id: Set(input.customer_id.clone()),
            idempotency_key: Set(input.idempotency_key.clone()),
            status: Set(OrderStatus::Pending),
            currency: Set(currency.clone()),
            subtotal: Set(totals.subtotal.into()),
            tax_rate: Set(self.pricing.tax_rate().into()),
            tax_amount: Set(totals.tax_amount.into()),
            grand_total: Set(totals.grand_total.into()),
            customer_name: Set(input.customer.name.trim().to_string()),
            customer_email: Set(input.customer.email.trim().to_string()),
            customer_phone: Set(input.customer.phone.clone()),
            customer_address: Set(input.customer.address.clone()),
            payment_reference: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut item_models = Vec::with_capacity(resolved.len());
        for (index, (quantity, quote)) in resolved.iter().enumerate() {
            let line_total = self
                .pricing
                .line_total(quote.unit_price, *quantity, &currency)?;
            item_models.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                line_number: Set(index as i32 + 1),
                service_id: Set(quote.service_id.clone()),
                name: Set(quote.name.clone()),
                unit_price: Set(quote.unit_price.into()),
                quantity: Set(*quantity),
                line_total: Set(line_total.into()),
                created_at: Set(now),
            });
        }

        let orders = &self.orders;
        let expected_version = cart.version;
        let attempt = with_retry(&self.retry(), TransientPolicy, || {
            let order_model = order_model.clone();
            let item_models = item_models.clone();
            async move {
                let txn = db.begin().await?;
                if !carts
                    .claim_version(&txn, cart_id, expected_version, Utc::now())
                    .await?
                {
                    return Ok::<_, ServiceError>(Claim::Lost);
                }
                let order = orders.insert_order(&txn, order_model, item_models).await?;
                let items = orders.items(&txn, order_id).await?;
                carts.delete_all_items(&txn, cart_id).await?;
                txn.commit().await?;
                Ok(Claim::Won(OrderDetails { order, items }))
            }
        })
        .await;

        match attempt {
            Ok(Claim::Won(details)) => {
                counter!("orderdesk.orders.created", 1);
                info!(
                    order_id = %details.order.id,
                    order_number = %details.order.order_number,
                    grand_total = %details.order.grand_total,
                    "order created from cart"
                );
                self.event_sender.send_or_log(Event::OrderCreated {
                    order_id: details.order.id,
                    order_number: details.order.order_number.clone(),
                    session_key: details.order.session_key.clone(),
                    grand_total: details.order.grand_total.get(),
                });
                Ok(CheckoutOutcome::Created(details))
            }
            Ok(Claim::Lost) => self.resolve_lost_claim(&input, cart_id).await,
            Err(ServiceError::DatabaseError(err)) if is_unique_violation(&err) => {
                // A concurrent request with the same key committed first
                match self.find_replay(&input).await? {
                    Some(existing) => Ok(CheckoutOutcome::Replayed(existing)),
                    None => {
                        error!(error = %err, "unique violation without a matching order");
                        Err(ServiceError::DatabaseError(err))
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn find_replay(
        &self,
        input: &CheckoutInput,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let orders = &self.orders;
        let session_key = input.session_key.as_str();
        let idempotency_key = input.idempotency_key.as_str();
        let found = with_retry(&self.retry(), TransientPolicy, move || {
            orders.find_by_idempotency_key(orders.db(), session_key, idempotency_key)
        })
        .await?;

        let Some(order) = found else {
            return Ok(None);
        };
        let order_id = order.id;
        let items = with_retry(&self.retry(), TransientPolicy, move || {
            orders.items(orders.db(), order_id)
        })
        .await?;
        Ok(Some(OrderDetails { order, items }))
    }

    /// Another writer changed the cart between our read and our claim
    async fn resolve_lost_claim(
        &self,
        input: &CheckoutInput,
        cart_id: Uuid,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if let Some(existing) = self.find_replay(input).await? {
            return Ok(CheckoutOutcome::Replayed(existing));
        }

        let db = self.db.as_ref();
        let carts = &self.carts;
        let remaining = with_retry(&self.retry(), TransientPolicy, move || {
            carts.items(db, cart_id)
        })
        .await?;

        warn!(remaining = remaining.len(), "checkout lost cart version race");
        if remaining.is_empty() {
            Err(ServiceError::EmptyCart(input.session_key.clone()))
        } else {
            Err(ServiceError::ConcurrentCheckout(format!(
                "cart for session {} changed during checkout",
                input.session_key
            )))
        }
    }
}
