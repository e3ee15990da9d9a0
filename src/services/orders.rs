use crate::{
    config::AppConfig,
    entities::{order, order_item, OrderStatus},
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, RetryConfig, TransientPolicy},
    repositories::OrderRepository,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// An order together with its frozen line items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// One page of the admin order listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read side of orders: admin listing and storefront order history
#[derive(Clone)]
pub struct OrderService {
    orders: OrderRepository,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self {
            orders: OrderRepository::new(db),
            config,
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::once(self.config.transient_retry_delay())
    }

    /// Fetches an order with its items
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let orders = &self.orders;
        let found = with_retry(&self.retry(), TransientPolicy, move || {
            orders.find_by_id(orders.db(), order_id)
        })
        .await?;

        match found {
            Some(order) => self.with_items(order).await,
            None => Err(ServiceError::NotFound(format!(
                "Order with ID {} not found",
                order_id
            ))),
        }
    }

    /// Newest-first listing for the admin surface. `page` starts at 1;
    /// `per_page` is clamped to the configured maximum.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page
            .unwrap_or(self.config.api_default_page_size as u64)
            .clamp(1, self.config.api_max_page_size as u64);

        let orders = &self.orders;
        let (items, total) = with_retry(&self.retry(), TransientPolicy, move || {
            orders.list(orders.db(), status, page, per_page)
        })
        .await?;

        Ok(OrderPage {
            orders: items,
            total,
            page,
            per_page,
        })
    }

    /// Orders placed from a browsing session, newest first
    #[instrument(skip(self))]
    pub async fn orders_for_session(
        &self,
        session_key: &str,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = &self.orders;
        let found = with_retry(&self.retry(), TransientPolicy, move || {
            orders.find_by_session(orders.db(), session_key)
        })
        .await?;
        self.with_items_all(found).await
    }

    /// Orders placed by a signed-in customer, newest first
    #[instrument(skip(self))]
    pub async fn orders_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = &self.orders;
        let found = with_retry(&self.retry(), TransientPolicy, move || {
            orders.find_by_customer(orders.db(), customer_id)
        })
        .await?;
        self.with_items_all(found).await
    }

    pub(crate) async fn with_items(
        &self,
        order: order::Model,
    ) -> Result<OrderDetails, ServiceError> {
        let orders = &self.orders;
        let order_id = order.id;
        let items = with_retry(&self.retry(), TransientPolicy, move || {
            orders.items(orders.db(), order_id)
        })
        .await?;
        Ok(OrderDetails { order, items })
    }

    async fn with_items_all(
        &self,
        found: Vec<order::Model>,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let mut details = Vec::with_capacity(found.len());
        for order in found {
            details.push(self.with_items(order).await?);
        }
        Ok(details)
    }
}
