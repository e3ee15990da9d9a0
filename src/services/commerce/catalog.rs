use crate::{
    entities::commerce::catalog_service,
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, RetryConfig, TransientPolicy},
};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Current catalog entry for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub service_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub currency: String,
}

/// Read-only view of the service catalog.
///
/// `Ok(None)` means the service does not exist or is no longer offered.
/// `Err` is reserved for failures talking to the catalog itself.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn quote(&self, service_id: &str) -> Result<Option<ServiceQuote>, ServiceError>;
}

/// Resolves one quote, retrying a transient failure once.
pub async fn resolve_quote(
    catalog: &dyn ServiceCatalog,
    retry: &RetryConfig,
    service_id: &str,
) -> Result<Option<ServiceQuote>, ServiceError> {
    with_retry(retry, TransientPolicy, move || catalog.quote(service_id)).await
}

/// Catalog backed by the `services` table
#[derive(Clone)]
pub struct DbServiceCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbServiceCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ServiceCatalog for DbServiceCatalog {
    async fn quote(&self, service_id: &str) -> Result<Option<ServiceQuote>, ServiceError> {
        let service = catalog_service::Entity::find_by_id(service_id.to_string())
            .one(&*self.db)
            .await?;

        Ok(service.and_then(|s| {
            if !s.active {
                debug!(service_id = %s.id, "service is inactive");
                return None;
            }
            Some(ServiceQuote {
                service_id: s.id,
                name: s.name,
                unit_price: s.unit_price.get(),
                currency: s.currency,
            })
        }))
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    quote: ServiceQuote,
    active: bool,
}

/// In-process catalog for tests and local runs
#[derive(Debug, Default, Clone)]
pub struct InMemoryServiceCatalog {
    entries: Arc<DashMap<String, CatalogEntry>>,
}

impl InMemoryServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a service and marks it active.
    pub fn upsert(&self, quote: ServiceQuote) {
        self.entries.insert(
            quote.service_id.clone(),
            CatalogEntry {
                quote,
                active: true,
            },
        );
    }

    /// Returns false when the service is unknown.
    pub fn set_price(&self, service_id: &str, unit_price: Decimal) -> bool {
        match self.entries.get_mut(service_id) {
            Some(mut entry) => {
                entry.quote.unit_price = unit_price;
                true
            }
            None => false,
        }
    }

    pub fn deactivate(&self, service_id: &str) -> bool {
        match self.entries.get_mut(service_id) {
            Some(mut entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryServiceCatalog {
    async fn quote(&self, service_id: &str) -> Result<Option<ServiceQuote>, ServiceError> {
        Ok(self
            .entries
            .get(service_id)
            .filter(|entry| entry.active)
            .map(|entry| entry.quote.clone()))
    }
}
