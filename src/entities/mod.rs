pub mod commerce;
pub mod order;
pub mod order_item;
pub mod order_transition;
pub mod stored_decimal;

pub use order::{OrderStatus, TransitionTrigger};
pub use stored_decimal::StoredDecimal;
