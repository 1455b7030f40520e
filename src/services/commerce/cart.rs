use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::ServiceError;
use crate::money;

/// One cart line, priced when the product was added to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i32,
    /// Unit price recorded at add-to-cart time
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn new(product_id: i64, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Decimal {
        money::line_total(self.unit_price, self.quantity)
    }
}

/// Cart collaborator. Cart mutation lives elsewhere; checkout only reads
/// the lines and clears the cart once the order is saved.
#[async_trait]
pub trait CartProvider: Send + Sync {
    /// `None` when the user has no cart at all.
    async fn get_lines(&self, user_id: i64) -> Result<Option<Vec<CartLine>>, ServiceError>;

    async fn clear(&self, user_id: i64) -> Result<(), ServiceError>;
}

/// Process-local carts keyed by user id.
#[derive(Debug, Default)]
pub struct InMemoryCart {
    carts: RwLock<HashMap<i64, Vec<CartLine>>>,
}

impl InMemoryCart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the user's cart with `lines`.
    pub async fn put(&self, user_id: i64, lines: Vec<CartLine>) {
        self.carts.write().await.insert(user_id, lines);
    }

    pub async fn add(&self, user_id: i64, line: CartLine) {
        self.carts
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(line);
    }
}

#[async_trait]
impl CartProvider for InMemoryCart {
    async fn get_lines(&self, user_id: i64) -> Result<Option<Vec<CartLine>>, ServiceError> {
        Ok(self.carts.read().await.get(&user_id).cloned())
    }

    async fn clear(&self, user_id: i64) -> Result<(), ServiceError> {
        if let Some(lines) = self.carts.write().await.get_mut(&user_id) {
            debug!(user_id, removed = lines.len(), "cart cleared");
            lines.clear();
        }
        Ok(())
    }
}
