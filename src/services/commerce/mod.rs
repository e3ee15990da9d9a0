/// Commerce services module - carts, pricing and checkout
pub mod cart_service;
pub mod catalog;
pub mod checkout_service;
pub mod pricing_service;

// Re-export services for convenience
pub use cart_service::{CartLineView, CartService, CartView};
pub use catalog::{DbServiceCatalog, InMemoryServiceCatalog, ServiceCatalog, ServiceQuote};
pub use checkout_service::{CheckoutInput, CheckoutOutcome, CheckoutService, CustomerContact};
pub use pricing_service::{PricedLine, PricingEngine, Totals};
