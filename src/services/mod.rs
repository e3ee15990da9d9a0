// Cart, pricing and checkout
pub mod commerce;

// Order reads and the status lifecycle
pub mod order_status;
pub mod orders;
