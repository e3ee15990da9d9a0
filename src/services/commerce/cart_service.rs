use crate::{
    config::AppConfig,
    entities::commerce::{cart, cart_item},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, RetryConfig, TransientPolicy},
    repositories::CartRepository,
    services::commerce::{
        catalog::{resolve_quote, ServiceCatalog, ServiceQuote},
        pricing_service::{PricedLine, PricingEngine, Totals},
    },
};
use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Longest accepted session key
pub const MAX_SESSION_KEY_LEN: usize = 128;

/// Largest quantity a single cart line may hold
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Session-scoped shopping cart.
///
/// Line items hold only `(service_id, quantity)`. Names and prices are joined
/// from the live catalog whenever the cart is read, so a cart never shows a
/// stale price and never persists one.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    carts: CartRepository,
    catalog: Arc<dyn ServiceCatalog>,
    pricing: PricingEngine,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

/// One cart line joined with its current catalog entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLineView {
    pub id: Uuid,
    pub service_id: String,
    pub quantity: i32,
    /// Catalog name; `None` when the service no longer resolves
    pub name: Option<String>,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
    /// False when the service was withdrawn or is priced in another currency.
    /// Unavailable lines are excluded from `totals` and would fail checkout.
    pub available: bool,
    pub added_at: DateTime<Utc>,
}

/// Cart snapshot returned by every cart operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartView {
    pub session_key: String,
    /// 0 when the session has no cart yet
    pub version: i32,
    pub currency: String,
    pub items: Vec<CartLineView>,
    pub item_count: i64,
    pub totals: Totals,
}

impl CartView {
    fn empty(session_key: &str, currency: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            version: 0,
            currency: currency.to_string(),
            items: Vec::new(),
            item_count: 0,
            totals: Totals::zero(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Rejects blank or oversized session keys
pub fn validate_session_key(session_key: &str) -> Result<(), ServiceError> {
    if session_key.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "session key must not be empty".to_string(),
        ));
    }
    if session_key.len() > MAX_SESSION_KEY_LEN {
        return Err(ServiceError::ValidationError(format!(
            "session key must be at most {} characters",
            MAX_SESSION_KEY_LEN
        )));
    }
    Ok(())
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ServiceError::InvalidQuantity(quantity));
    }
    Ok(())
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `catalog` - Source of current service names and prices
    /// * `event_sender` - Event sender for publishing cart events
    /// * `config` - Application configuration (tax rate, currency, retry delay)
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn ServiceCatalog>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            carts: CartRepository::new(db.clone()),
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

    /// Adds `quantity` of a service to the session's cart, creating the cart
    /// on first use. Adding a service already in the cart accumulates.
    ///
    /// # Returns
    ///
    /// * `Ok(CartView)` - The cart after the change
    /// * `Err(ServiceError::InvalidQuantity)` - `quantity` out of range, or the
    ///   line would exceed [`MAX_LINE_QUANTITY`]
    /// * `Err(ServiceError::UnknownService)` - The catalog cannot resolve `service_id`
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_key: &str,
        service_id: &str,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        validate_session_key(session_key)?;
        validate_quantity(quantity)?;

        let Some(quote) = resolve_quote(self.catalog.as_ref(), &self.retry(), service_id).await?
        else {
            warn!(service_id, "rejected add of unknown service");
            return Err(ServiceError::UnknownService(service_id.to_string()));
        };

        let db = self.db.as_ref();
        let carts = &self.carts;
        let snapshot = with_retry(&self.retry(), TransientPolicy, move || async move {
            let now = Utc::now();
            let txn = db.begin().await?;
            let cart = carts.ensure_cart(&txn, session_key, now).await?;
            let added = carts
                .add_quantity(&txn, cart.id, service_id, quantity, MAX_LINE_QUANTITY, now)
                .await?;
            if !added {
                txn.rollback().await?;
                return Ok::<_, ServiceError>(None);
            }
            carts.touch(&txn, cart.id, now).await?;
            let snapshot = carts.snapshot(&txn, cart.id).await?;
            txn.commit().await?;
            Ok(Some(snapshot))
        })
        .await?;

        let Some((cart, items)) = snapshot else {
            warn!(session_key, service_id, quantity, "cart line quantity limit reached");
            return Err(ServiceError::InvalidQuantity(quantity));
        };

        counter!("orderdesk.cart.items_added", quantity as u64);
        info!(session_key, service_id, quantity, "added item to cart");

        self.event_sender.send_or_log(Event::CartItemAdded {
            session_key: session_key.to_string(),
            service_id: service_id.to_string(),
            quantity,
        });

        self.render_committed(cart, items, Some(&quote)).await
    }

    /// Sets the quantity of an existing line.
    ///
    /// Use [`CartService::remove_item`] to drop a line; zero is rejected.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        session_key: &str,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        validate_session_key(session_key)?;
        validate_quantity(quantity)?;

        let cart = self
            .find_cart(session_key)
            .await?
            .ok_or(ServiceError::ItemNotFound(item_id))?;

        let cart_id = cart.id;
        let db = self.db.as_ref();
        let carts = &self.carts;
        let snapshot = with_retry(&self.retry(), TransientPolicy, move || async move {
            let now = Utc::now();
            let txn = db.begin().await?;
            let updated = carts
                .set_quantity(&txn, cart_id, item_id, quantity, now)
                .await?;
            if !updated {
                txn.rollback().await?;
                return Ok::<_, ServiceError>(None);
            }
            carts.touch(&txn, cart_id, now).await?;
            let snapshot = carts.snapshot(&txn, cart_id).await?;
            txn.commit().await?;
            Ok(Some(snapshot))
        })
        .await?;

        let Some((cart, items)) = snapshot else {
            warn!(session_key, %item_id, "cart item not found for update");
            return Err(ServiceError::ItemNotFound(item_id));
        };

        info!(session_key, %item_id, quantity, "updated cart item quantity");
        self.event_sender.send_or_log(Event::CartItemUpdated {
            session_key: session_key.to_string(),
            item_id,
            quantity,
        });

        self.render_committed(cart, items, None).await
    }

    /// Removes a line. Removing an item that is not there succeeds and leaves
    /// the cart unchanged.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        session_key: &str,
        item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        validate_session_key(session_key)?;

        let Some(cart) = self.find_cart(session_key).await? else {
            return Ok(CartView::empty(session_key, &self.config.default_currency));
        };

        let cart_id = cart.id;
        let db = self.db.as_ref();
        let carts = &self.carts;
        let (removed, (cart, items)) =
            with_retry(&self.retry(), TransientPolicy, move || async move {
                let txn = db.begin().await?;
                let removed = carts.delete_item(&txn, cart_id, item_id).await?;
                if removed > 0 {
                    carts.touch(&txn, cart_id, Utc::now()).await?;
                }
                let snapshot = carts.snapshot(&txn, cart_id).await?;
                txn.commit().await?;
                Ok::<_, ServiceError>((removed, snapshot))
            })
            .await?;

        if removed > 0 {
            info!(session_key, %item_id, "removed cart item");
            self.event_sender.send_or_log(Event::CartItemRemoved {
                session_key: session_key.to_string(),
                item_id,
            });
        }

        self.render_committed(cart, items, None).await
    }

    /// Empties the cart. The cart row itself is kept for the session.
    #[instrument(skip(self))]
    pub async fn clear(&self, session_key: &str) -> Result<CartView, ServiceError> {
        validate_session_key(session_key)?;

        let Some(cart) = self.find_cart(session_key).await? else {
            return Ok(CartView::empty(session_key, &self.config.default_currency));
        };

        let cart_id = cart.id;
        let db = self.db.as_ref();
        let carts = &self.carts;
        let (removed, cart) = with_retry(&self.retry(), TransientPolicy, move || async move {
            let txn = db.begin().await?;
            let removed = carts.delete_all_items(&txn, cart_id).await?;
            if removed > 0 {
                carts.touch(&txn, cart_id, Utc::now()).await?;
            }
            let (cart, _) = carts.snapshot(&txn, cart_id).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>((removed, cart))
        })
        .await?;

        if removed > 0 {
            info!(session_key, removed, "cleared cart");
            self.event_sender.send_or_log(Event::CartCleared {
                session_key: session_key.to_string(),
            });
        }

        self.render_committed(cart, Vec::new(), None).await
    }

    /// Current cart joined against live catalog prices. Never creates a cart.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, session_key: &str) -> Result<CartView, ServiceError> {
        validate_session_key(session_key)?;

        let Some(cart) = self.find_cart(session_key).await? else {
            return Ok(CartView::empty(session_key, &self.config.default_currency));
        };

        let items = self.load_items(&cart).await?;
        let retry = self.retry();
        let quotes = try_join_all(
            items
                .iter()
                .map(|item| resolve_quote(self.catalog.as_ref(), &retry, &item.service_id)),
        )
        .await?;

        self.build_view(&cart, items, quotes)
    }

    async fn find_cart(&self, session_key: &str) -> Result<Option<cart::Model>, ServiceError> {
        let carts = &self.carts;
        with_retry(&self.retry(), TransientPolicy, move || {
            carts.find_by_session(carts.db(), session_key)
        })
        .await
    }

    async fn load_items(&self, cart: &cart::Model) -> Result<Vec<cart_item::Model>, ServiceError> {
        let carts = &self.carts;
        let cart_id = cart.id;
        with_retry(&self.retry(), TransientPolicy, move || {
            carts.items(carts.db(), cart_id)
        })
        .await
    }

    /// View of a cart whose change has already been committed. A catalog
    /// failure at this point shows the line as unavailable instead of
    /// failing the saved change.
    async fn render_committed(
        &self,
        cart: cart::Model,
        items: Vec<cart_item::Model>,
        known: Option<&ServiceQuote>,
    ) -> Result<CartView, ServiceError> {
        let retry = &self.retry();
        let catalog = self.catalog.as_ref();
        let quotes = join_all(items.iter().map(|item| async move {
            if let Some(quote) = known.filter(|q| q.service_id == item.service_id) {
                return Some(quote.clone());
            }
            match resolve_quote(catalog, retry, &item.service_id).await {
                Ok(quote) => quote,
                Err(err) => {
                    warn!(
                        service_id = %item.service_id,
                        error = %err,
                        "catalog lookup failed after cart change"
                    );
                    None
                }
            }
        }))
        .await;

        self.build_view(&cart, items, quotes)
    }

    fn build_view(
        &self,
        cart: &cart::Model,
        items: Vec<cart_item::Model>,
        quotes: Vec<Option<ServiceQuote>>,
    ) -> Result<CartView, ServiceError> {
        // Cart currency follows the first resolvable line
        let currency = quotes
            .iter()
            .flatten()
            .map(|q| q.currency.clone())
            .next()
            .unwrap_or_else(|| self.config.default_currency.clone());

        let mut lines = Vec::with_capacity(items.len());
        let mut priced = Vec::with_capacity(items.len());
        let mut item_count: i64 = 0;

        for (item, quote) in items.into_iter().zip(quotes) {
            item_count += i64::from(item.quantity);
            let line = match quote {
                Some(quote) if quote.currency == currency => {
                    let total =
                        self.pricing
                            .line_total(quote.unit_price, item.quantity, &currency)?;
                    priced.push(PricedLine::new(quote.unit_price, item.quantity));
                    CartLineView {
                        id: item.id,
                        service_id: item.service_id,
                        quantity: item.quantity,
                        name: Some(quote.name),
                        unit_price: Some(quote.unit_price),
                        line_total: Some(total),
                        available: true,
                        added_at: item.added_at,
                    }
                }
                Some(quote) => CartLineView {
                    id: item.id,
                    service_id: item.service_id,
                    quantity: item.quantity,
                    name: Some(quote.name),
                    unit_price: Some(quote.unit_price),
                    line_total: None,
                    available: false,
                    added_at: item.added_at,
                },
                None => CartLineView {
                    id: item.id,
                    service_id: item.service_id,
                    quantity: item.quantity,
                    name: None,
                    unit_price: None,
                    line_total: None,
                    available: false,
                    added_at: item.added_at,
                },
            };
            lines.push(line);
        }

        let totals = self.pricing.totals(&priced, &currency)?;

        Ok(CartView {
            session_key: cart.session_key.clone(),
            version: cart.version,
            currency,
            items: lines,
            item_count,
            totals,
        })
    }
}
