//! Ephemeral carts. A cart lives until an order placed from it is confirmed or cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{BuyerId, CartId, ProductId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::SagaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub lot_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub cart_id: CartId,
    pub buyer_id: BuyerId,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn save(&self, cart: Cart) -> Result<(), SagaError>;

    async fn get(&self, cart_id: CartId) -> Result<Option<Cart>, SagaError>;

    /// Removing a missing cart is not an error.
    async fn remove(&self, cart_id: CartId) -> Result<(), SagaError>;
}

pub type SharedCartStore = Arc<dyn CartStore>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<Mutex<HashMap<CartId, Cart>>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.carts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn save(&self, cart: Cart) -> Result<(), SagaError> {
        self.carts.lock().await.insert(cart.cart_id, cart);
        Ok(())
    }

    async fn get(&self, cart_id: CartId) -> Result<Option<Cart>, SagaError> {
        Ok(self.carts.lock().await.get(&cart_id).cloned())
    }

    async fn remove(&self, cart_id: CartId) -> Result<(), SagaError> {
        self.carts.lock().await.remove(&cart_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_remove() {
        let store = InMemoryCartStore::new();
        let cart = Cart {
            cart_id: CartId::new(),
            buyer_id: BuyerId::new(),
            lines: vec![CartLine {
                product_id: ProductId::new(),
                lot_quantity: 2,
            }],
            created_at: Utc::now(),
        };
        let id = cart.cart_id;

        store.save(cart.clone()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Some(cart));

        store.remove(id).await.unwrap();
        store.remove(id).await.unwrap();
        assert!(store.is_empty().await);
    }
}
