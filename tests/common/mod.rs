#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use orderdesk::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::commerce::catalog_service,
    events::{self, EventSender},
    services::commerce::{CheckoutInput, CustomerContact, InMemoryServiceCatalog, ServiceQuote},
    AppState,
};

pub const GST_REG: &str = "gst-reg";
pub const ITR_FILING: &str = "itr-filing";
pub const TRADEMARK: &str = "trademark";
pub const US_LLC: &str = "us-llc";

pub fn quote(service_id: &str, name: &str, unit_price: Decimal, currency: &str) -> ServiceQuote {
    ServiceQuote {
        service_id: service_id.to_string(),
        name: name.to_string(),
        unit_price,
        currency: currency.to_string(),
    }
}

/// In-memory SQLite database, migrated, with a seeded in-process catalog.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub catalog: InMemoryServiceCatalog,
    pub config: Arc<AppConfig>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.transient_retry_delay_ms = 1;
        cfg.cors_allow_any_origin = true;
        let config = Arc::new(cfg);

        let pool = db::establish_connection_with_config(&DbConfig::sqlite_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let catalog = InMemoryServiceCatalog::new();
        catalog.upsert(quote(GST_REG, "GST Registration", dec!(2499.00), "INR"));
        catalog.upsert(quote(ITR_FILING, "Income Tax Return Filing", dec!(999.00), "INR"));
        catalog.upsert(quote(TRADEMARK, "Trademark Registration", dec!(6999.00), "INR"));
        catalog.upsert(quote(US_LLC, "US LLC Formation", dec!(399.00), "USD"));

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(
            db.clone(),
            Arc::new(catalog.clone()),
            event_sender,
            config.clone(),
        );
        let router = orderdesk::build_router(state.clone());

        Self {
            router,
            state,
            db,
            catalog,
            config,
            _event_task: event_task,
        }
    }

    /// Inserts a row into the `services` table for database-backed catalog tests.
    pub async fn seed_catalog_row(&self, id: &str, name: &str, unit_price: Decimal, active: bool) {
        catalog_service::ActiveModel {
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            unit_price: Set(unit_price.into()),
            currency: Set("INR".to_string()),
            active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed catalog row");
    }

    pub fn checkout_input(&self, session_key: &str, idempotency_key: &str) -> CheckoutInput {
        CheckoutInput {
            session_key: session_key.to_string(),
            idempotency_key: idempotency_key.to_string(),
            customer_id: None,
            customer: CustomerContact {
                name: "Asha Rao".to_string(),
                email: "asha@example.in".to_string(),
                phone: Some("+91 98450 00000".to_string()),
                address: Some("12 MG Road, Bengaluru 560001".to_string()),
            },
        }
    }

    /// Send a JSON request through the full router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("response body is json")
}
