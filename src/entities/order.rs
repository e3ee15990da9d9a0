use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoredDecimal;

/// Order lifecycle states. `Completed` and `Cancelled` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// Who asked for a status change
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransitionTrigger {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "payment_confirmed")]
    PaymentConfirmed,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
}

/// The `orders` table. Totals and contact details are frozen at checkout.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub session_key: String,
    pub customer_id: Option<String>,
    pub idempotency_key: String,
    pub status: OrderStatus,
    pub currency: String,
    #[sea_orm(column_type = "Text")]
    pub subtotal: StoredDecimal,
    #[sea_orm(column_type = "Text")]
    pub tax_rate: StoredDecimal,
    #[sea_orm(column_type = "Text")]
    pub tax_amount: StoredDecimal,
    #[sea_orm(column_type = "Text")]
    pub grand_total: StoredDecimal,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub customer_address: Option<String>,
    pub payment_reference: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_transition::Entity")]
    OrderTransition,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_transition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderTransition.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_text_round_trips_through_strum() {
        assert_eq!(OrderStatus::Processing.to_string(), "processing");
        assert_eq!(
            OrderStatus::from_str("cancelled").unwrap(),
            OrderStatus::Cancelled
        );
        assert!(OrderStatus::from_str("shipped").is_err());
        assert_eq!(
            TransitionTrigger::PaymentConfirmed.to_string(),
            "payment_confirmed"
        );
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }
}
