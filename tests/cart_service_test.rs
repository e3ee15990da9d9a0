mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{TestApp, GST_REG, ITR_FILING, US_LLC};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tokio::sync::mpsc;
use orderdesk::{
    entities::commerce::{cart, cart_item},
    errors::ServiceError,
    events::EventSender,
    services::commerce::{
        cart_service::MAX_LINE_QUANTITY, CartService, InMemoryServiceCatalog, ServiceCatalog,
        ServiceQuote,
    },
};
use uuid::Uuid;

/// Answers the first `budget` lookups, then reports the catalog as down.
struct FailingAfter {
    inner: InMemoryServiceCatalog,
    budget: AtomicUsize,
}

#[async_trait]
impl ServiceCatalog for FailingAfter {
    async fn quote(&self, service_id: &str) -> Result<Option<ServiceQuote>, ServiceError> {
        let granted = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if granted {
            self.inner.quote(service_id).await
        } else {
            Err(ServiceError::CatalogError("catalog offline".into()))
        }
    }
}

#[tokio::test]
async fn adding_same_service_twice_accumulates() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts.add_item("sess-acc", GST_REG, 2).await.unwrap();
    let view = carts.add_item("sess-acc", GST_REG, 3).await.unwrap();

    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.item_count, 5);
    assert_eq!(view.totals.subtotal, dec!(12495.00));
}

#[tokio::test]
async fn concurrent_adds_do_not_lose_increments() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    let (first, second) = tokio::join!(
        carts.add_item("sess-race", GST_REG, 1),
        carts.add_item("sess-race", GST_REG, 1),
    );
    first.unwrap();
    second.unwrap();

    let view = carts.get_cart("sess-race").await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 2);
}

#[tokio::test]
async fn cart_view_uses_live_prices_and_totals() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts.add_item("sess-live", GST_REG, 1).await.unwrap();
    let view = carts.get_cart("sess-live").await.unwrap();
    assert_eq!(view.currency, "INR");
    assert_eq!(view.totals.subtotal, dec!(2499.00));
    assert_eq!(view.totals.tax_amount, dec!(449.82));
    assert_eq!(view.totals.grand_total, dec!(2948.82));

    // The cart never stores a price
    app.catalog.set_price(GST_REG, dec!(2999.00));
    let view = carts.get_cart("sess-live").await.unwrap();
    assert_eq!(view.items[0].unit_price, Some(dec!(2999.00)));
    assert_eq!(view.totals.subtotal, dec!(2999.00));
}

#[tokio::test]
async fn reading_an_unknown_session_does_not_create_a_cart() {
    let app = TestApp::new().await;

    let view = app.state.services.cart.get_cart("sess-ghost").await.unwrap();
    assert!(view.is_empty());
    assert_eq!(view.version, 0);
    assert_eq!(view.currency, "INR");

    let carts = cart::Entity::find().all(app.db.as_ref()).await.unwrap();
    assert!(carts.is_empty());
}

#[tokio::test]
async fn invalid_quantity_is_rejected() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    assert_matches!(
        carts.add_item("sess-q", GST_REG, 0).await,
        Err(ServiceError::InvalidQuantity(0))
    );

    let view = carts.add_item("sess-q", GST_REG, 1).await.unwrap();
    let item_id = view.items[0].id;
    assert_matches!(
        carts.update_quantity("sess-q", item_id, -1).await,
        Err(ServiceError::InvalidQuantity(-1))
    );
}

#[tokio::test]
async fn unknown_service_is_rejected() {
    let app = TestApp::new().await;

    let result = app
        .state
        .services
        .cart
        .add_item("sess-unknown", "does-not-exist", 1)
        .await;
    assert_matches!(result, Err(ServiceError::UnknownService(id)) if id == "does-not-exist");
}

#[tokio::test]
async fn update_quantity_overwrites() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    let view = carts.add_item("sess-upd", ITR_FILING, 1).await.unwrap();
    let item_id = view.items[0].id;
    let before = view.version;

    let view = carts.update_quantity("sess-upd", item_id, 4).await.unwrap();
    assert_eq!(view.items[0].quantity, 4);
    assert_eq!(view.totals.subtotal, dec!(3996.00));
    assert!(view.version > before);
}

#[tokio::test]
async fn update_of_missing_item_fails() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;
    let missing = Uuid::new_v4();

    // No cart at all
    assert_matches!(
        carts.update_quantity("sess-none", missing, 2).await,
        Err(ServiceError::ItemNotFound(id)) if id == missing
    );

    carts.add_item("sess-none", GST_REG, 1).await.unwrap();
    assert_matches!(
        carts.update_quantity("sess-none", missing, 2).await,
        Err(ServiceError::ItemNotFound(id)) if id == missing
    );
}

#[tokio::test]
async fn removing_missing_item_is_a_no_op() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    let before = carts.add_item("sess-rm", GST_REG, 1).await.unwrap();
    let after = carts
        .remove_item("sess-rm", Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(after, before);
}

#[tokio::test]
async fn remove_then_clear() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts.add_item("sess-clear", GST_REG, 1).await.unwrap();
    let view = carts.add_item("sess-clear", ITR_FILING, 2).await.unwrap();
    assert_eq!(view.items.len(), 2);
    // Insertion order is kept
    assert_eq!(view.items[0].service_id, GST_REG);
    assert_eq!(view.items[1].service_id, ITR_FILING);

    let view = carts
        .remove_item("sess-clear", view.items[0].id)
        .await
        .unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].service_id, ITR_FILING);

    let view = carts.clear("sess-clear").await.unwrap();
    assert!(view.is_empty());
    assert_eq!(view.totals.grand_total, dec!(0));
    // The cart row survives for reuse by the session
    assert!(view.version > 0);

    let again = carts.clear("sess-clear").await.unwrap();
    assert_eq!(again, view);
}

#[tokio::test]
async fn withdrawn_service_is_flagged_and_excluded_from_totals() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts.add_item("sess-withdrawn", GST_REG, 1).await.unwrap();
    carts.add_item("sess-withdrawn", ITR_FILING, 1).await.unwrap();
    app.catalog.deactivate(ITR_FILING);

    let view = carts.get_cart("sess-withdrawn").await.unwrap();
    let itr = view
        .items
        .iter()
        .find(|line| line.service_id == ITR_FILING)
        .unwrap();
    assert!(!itr.available);
    assert_eq!(itr.unit_price, None);
    assert_eq!(view.totals.subtotal, dec!(2499.00));
    assert_eq!(view.item_count, 2);
}

#[tokio::test]
async fn other_currency_line_is_flagged() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts.add_item("sess-fx", GST_REG, 1).await.unwrap();
    let view = carts.add_item("sess-fx", US_LLC, 1).await.unwrap();

    assert_eq!(view.currency, "INR");
    let llc = view.items.iter().find(|l| l.service_id == US_LLC).unwrap();
    assert!(!llc.available);
    assert_eq!(llc.line_total, None);
    assert_eq!(view.totals.subtotal, dec!(2499.00));
}

#[tokio::test]
async fn blank_session_key_is_rejected() {
    let app = TestApp::new().await;
    assert_matches!(
        app.state.services.cart.get_cart("  ").await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn line_quantity_is_capped_without_side_effects() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    assert_matches!(
        carts.add_item("sess-cap", GST_REG, i32::MAX).await,
        Err(ServiceError::InvalidQuantity(_))
    );
    assert!(cart::Entity::find().all(app.db.as_ref()).await.unwrap().is_empty());

    let full = carts
        .add_item("sess-cap", GST_REG, MAX_LINE_QUANTITY)
        .await
        .unwrap();
    assert_matches!(
        carts.add_item("sess-cap", GST_REG, 1).await,
        Err(ServiceError::InvalidQuantity(1))
    );
    assert_matches!(
        carts
            .update_quantity("sess-cap", full.items[0].id, MAX_LINE_QUANTITY + 1)
            .await,
        Err(ServiceError::InvalidQuantity(_))
    );

    // Rejected accumulation left the cart readable and untouched
    let view = carts.get_cart("sess-cap").await.unwrap();
    assert_eq!(view, full);
    assert_eq!(view.items[0].quantity, MAX_LINE_QUANTITY);
}

#[tokio::test]
async fn item_count_spans_full_lines() {
    let app = TestApp::new().await;
    let carts = &app.state.services.cart;

    carts
        .add_item("sess-count", GST_REG, MAX_LINE_QUANTITY)
        .await
        .unwrap();
    let view = carts
        .add_item("sess-count", ITR_FILING, MAX_LINE_QUANTITY)
        .await
        .unwrap();

    assert_eq!(view.item_count, 2 * i64::from(MAX_LINE_QUANTITY));
}

#[tokio::test]
async fn catalog_outage_after_commit_does_not_fail_the_add() {
    let app = TestApp::new().await;
    let (event_tx, _event_rx) = mpsc::channel(16);
    let catalog = Arc::new(FailingAfter {
        inner: app.catalog.clone(),
        budget: AtomicUsize::new(2),
    });
    let carts = CartService::new(
        app.db.clone(),
        catalog,
        Arc::new(EventSender::new(event_tx)),
        app.config.clone(),
    );

    carts.add_item("sess-outage", GST_REG, 1).await.unwrap();
    // Second lookup validates ITR; the GST line can no longer be priced
    let view = carts.add_item("sess-outage", ITR_FILING, 1).await.unwrap();

    let gst = view.items.iter().find(|l| l.service_id == GST_REG).unwrap();
    let itr = view.items.iter().find(|l| l.service_id == ITR_FILING).unwrap();
    assert!(!gst.available);
    assert!(itr.available);
    assert_eq!(itr.quantity, 1);
    assert_eq!(view.totals.subtotal, dec!(999.00));

    let stored = cart_item::Entity::find()
        .filter(cart_item::Column::ServiceId.eq(ITR_FILING))
        .one(app.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.quantity, 1);
}
