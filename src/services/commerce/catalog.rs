use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::ServiceError;

/// Read-only view of a product as the catalog currently has it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
}

/// Catalog collaborator, used for display only. Order lines are never
/// re-priced from it.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_by_id(&self, product_id: i64) -> Result<Option<ProductSnapshot>, ServiceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<i64, ProductSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, product: ProductSnapshot) {
        self.products.write().await.insert(product.id, product);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn get_by_id(&self, product_id: i64) -> Result<Option<ProductSnapshot>, ServiceError> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }
}
