use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel, OrderStatus,
};
use crate::entities::order_item::{
    ActiveModel as OrderItemActiveModel, Column as OrderItemColumn, Entity as OrderItem,
    Model as OrderItemModel,
};
use crate::entities::order_transition::{
    ActiveModel as TransitionActiveModel, Column as TransitionColumn, Entity as OrderTransition,
    Model as TransitionModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    /// Find an order by ID
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find_by_id(id).one(conn).await?)
    }

    /// Order previously created for this checkout attempt, if any
    pub async fn find_by_idempotency_key<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_key: &str,
        idempotency_key: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::SessionKey.eq(session_key))
            .filter(Column::IdempotencyKey.eq(idempotency_key))
            .one(conn)
            .await?)
    }

    /// Lines of an order in checkout order
    pub async fn items<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItem::find()
            .filter(OrderItemColumn::OrderId.eq(order_id))
            .order_by_asc(OrderItemColumn::LineNumber)
            .all(conn)
            .await?)
    }

    pub async fn insert_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderActiveModel,
        items: Vec<OrderItemActiveModel>,
    ) -> Result<OrderModel, ServiceError> {
        let order = order.insert(conn).await?;
        if !items.is_empty() {
            OrderItem::insert_many(items)
                .exec_without_returning(conn)
                .await?;
        }
        Ok(order)
    }

    /// Moves the order from `from` to `to` only if neither status nor version
    /// changed since the caller read it. Returns false when another writer won.
    #[allow(clippy::too_many_arguments)]
    pub async fn compare_and_set_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        from: OrderStatus,
        expected_version: i32,
        to: OrderStatus,
        payment_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut update = Order::update_many()
            .col_expr(Column::Status, Expr::value(to))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(now));

        if let Some(reference) = payment_reference {
            update = update.col_expr(Column::PaymentReference, Expr::value(reference.to_string()));
        }

        let result = update
            .filter(Column::Id.eq(order_id))
            .filter(Column::Status.eq(from))
            .filter(Column::Version.eq(expected_version))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn append_transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        transition: TransitionActiveModel,
    ) -> Result<TransitionModel, ServiceError> {
        Ok(transition.insert(conn).await?)
    }

    /// Transition log, oldest first
    pub async fn transitions<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<TransitionModel>, ServiceError> {
        Ok(OrderTransition::find()
            .filter(TransitionColumn::OrderId.eq(order_id))
            .order_by_asc(TransitionColumn::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Newest-first page of orders, optionally filtered by status.
    /// `page` is 1-based.
    pub async fn list<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find();
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(conn, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Orders placed from a browsing session, newest first
    pub async fn find_by_session<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_key: &str,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::SessionKey.eq(session_key))
            .order_by_desc(Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Orders placed by a signed-in customer, newest first
    pub async fn find_by_customer<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: &str,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(Column::CustomerId.eq(customer_id))
            .order_by_desc(Column::CreatedAt)
            .all(conn)
            .await?)
    }
}
