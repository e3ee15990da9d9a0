pub mod commerce;
pub mod common;
pub mod orders;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    commerce::{CartService, CheckoutService, ServiceCatalog},
    order_status::OrderStatusService,
    orders::OrderService,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
}

impl AppServices {
    /// Wires every service against one database pool, catalog and event channel.
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn ServiceCatalog>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let cart = Arc::new(CartService::new(
            db.clone(),
            catalog.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            catalog,
            event_sender.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderService::new(db.clone(), config.clone()));
        let order_status = Arc::new(OrderStatusService::new(db, event_sender, config));

        Self {
            cart,
            checkout,
            orders,
            order_status,
        }
    }
}
