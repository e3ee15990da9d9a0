use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::commerce::{cart, cart_item};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Cart storage. Every method takes the connection to run on so callers can
/// compose several calls inside one transaction.
#[derive(Debug, Clone)]
pub struct CartRepository {
    base: BaseRepository,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    /// Find the cart owned by `session_key`
    pub async fn find_by_session<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_key: &str,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::SessionKey.eq(session_key))
            .one(conn)
            .await?)
    }

    /// Returns the session's cart, creating it if needed. Safe under
    /// concurrent first adds: the losing insert is a no-op.
    pub async fn ensure_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_by_session(conn, session_key).await? {
            return Ok(existing);
        }

        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_key: Set(session_key.to_string()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };
        cart::Entity::insert(model)
            .on_conflict(
                OnConflict::column(cart::Column::SessionKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        self.find_by_session(conn, session_key)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("cart for session {} vanished", session_key))
            })
    }

    /// Items in insertion order
    pub async fn items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .order_by_asc(cart_item::Column::Id)
            .all(conn)
            .await?)
    }

    /// Cart row and its items as seen by `conn`
    pub async fn snapshot<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let cart = cart::Entity::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("cart {} vanished", cart_id)))?;
        let items = self.items(conn, cart_id).await?;
        Ok((cart, items))
    }

    /// Inserts the line or adds `quantity` to the existing one in a single
    /// statement, so concurrent adds never lose an increment.
    ///
    /// Returns false, changing nothing, when the line would exceed
    /// `max_quantity`. `quantity` itself must already be within bounds.
    pub async fn add_quantity<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        service_id: &str,
        quantity: i32,
        max_quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let model = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            service_id: Set(service_id.to_string()),
            quantity: Set(quantity),
            added_at: Set(now),
            updated_at: Set(now),
        };

        let existing = || Expr::col((cart_item::Entity, cart_item::Column::Quantity));
        let rows = cart_item::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([cart_item::Column::CartId, cart_item::Column::ServiceId])
                    .value(cart_item::Column::Quantity, existing().add(quantity))
                    .update_column(cart_item::Column::UpdatedAt)
                    .action_and_where(existing().lte(max_quantity - quantity))
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Ok(rows > 0)
    }

    /// Overwrites the quantity; returns false if the item is not in the cart
    pub async fn set_quantity<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Quantity, Expr::value(quantity))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(now))
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn delete_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_all_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Unconditional version bump after a cart mutation
    pub async fn touch<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        cart::Entity::update_many()
            .col_expr(
                cart::Column::Version,
                Expr::col(cart::Column::Version).add(1),
            )
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Bumps the version only if it still equals `expected`. Exactly one of
    /// several racing callers gets `true`.
    pub async fn claim_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        expected: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = cart::Entity::update_many()
            .col_expr(
                cart::Column::Version,
                Expr::col(cart::Column::Version).add(1),
            )
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::Version.eq(expected))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
