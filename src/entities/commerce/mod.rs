/// Commerce entities module
pub mod cart;
pub mod cart_item;
pub mod catalog_service;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use catalog_service::{Entity as CatalogService, Model as CatalogServiceModel};
