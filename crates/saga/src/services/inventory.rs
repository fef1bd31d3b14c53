//! Inventory ledger trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::ProductId;
use domain::Product;

use crate::error::SagaError;

/// Trait for inventory management operations.
///
/// Reservations are keyed by the caller (the checkout saga uses its own
/// workflow ID), so reserving or releasing twice under one key changes the
/// counter at most once.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Loads a product with its current inventory.
    async fn get_product(&self, product_id: ProductId) -> Result<Product, SagaError>;

    /// Takes one unit if any is available.
    ///
    /// Returns `Ok(false)` when the product is out of stock. The decrement is
    /// conditional and atomic, so concurrent callers never drive the counter
    /// below zero.
    async fn reserve(&self, product_id: ProductId, reservation_key: &str)
    -> Result<bool, SagaError>;

    /// Returns the unit held under `reservation_key`.
    ///
    /// Returns `Ok(false)` if there is no active reservation under that key.
    async fn release(&self, product_id: ProductId, reservation_key: &str)
    -> Result<bool, SagaError>;

    /// Sets the inventory counter to `level`.
    async fn restock(&self, product_id: ProductId, level: u32) -> Result<Product, SagaError>;
}

#[derive(Debug)]
struct Reservation {
    product_id: ProductId,
    released: bool,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<String, Reservation>,
    fail_on_reserve: bool,
    release_failures: u32,
}

/// In-memory inventory ledger for tests and the database-less server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger holding one product.
    pub fn with_product(product: Product) -> Self {
        let ledger = Self::new();
        ledger.add_product(product);
        ledger
    }

    /// Adds or replaces a product.
    pub fn add_product(&self, product: Product) {
        self.write().products.insert(product.product_id, product);
    }

    /// Configures the ledger to fail every reserve call.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.write().fail_on_reserve = fail;
    }

    /// Makes the next `count` release calls fail.
    pub fn fail_next_releases(&self, count: u32) {
        self.write().release_failures = count;
    }

    /// Returns the inventory counter of a product (0 if unknown).
    pub fn inventory(&self, product_id: ProductId) -> u32 {
        self.read()
            .products
            .get(&product_id)
            .map_or(0, |p| p.inventory)
    }

    /// Returns the number of reservations that have not been released.
    pub fn active_reservations(&self) -> usize {
        self.read()
            .reservations
            .values()
            .filter(|r| !r.released)
            .count()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryInventoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryInventoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn get_product(&self, product_id: ProductId) -> Result<Product, SagaError> {
        self.read()
            .products
            .get(&product_id)
            .cloned()
            .ok_or(SagaError::ProductNotFound(product_id))
    }

    async fn reserve(
        &self,
        product_id: ProductId,
        reservation_key: &str,
    ) -> Result<bool, SagaError> {
        let mut state = self.write();

        if state.fail_on_reserve {
            return Err(SagaError::InventoryService(
                "Inventory ledger unavailable".to_string(),
            ));
        }
        if let Some(existing) = state.reservations.get(reservation_key) {
            return Ok(!existing.released);
        }

        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(SagaError::ProductNotFound(product_id))?;
        if product.inventory == 0 {
            return Ok(false);
        }
        product.inventory -= 1;
        state.reservations.insert(
            reservation_key.to_string(),
            Reservation {
                product_id,
                released: false,
            },
        );
        Ok(true)
    }

    async fn release(
        &self,
        product_id: ProductId,
        reservation_key: &str,
    ) -> Result<bool, SagaError> {
        let mut state = self.write();

        if state.release_failures > 0 {
            state.release_failures -= 1;
            return Err(SagaError::InventoryService(
                "Inventory ledger unavailable".to_string(),
            ));
        }

        let InMemoryInventoryState {
            products,
            reservations,
            ..
        } = &mut *state;
        let Some(reservation) = reservations
            .get_mut(reservation_key)
            .filter(|r| !r.released && r.product_id == product_id)
        else {
            return Ok(false);
        };

        let product = products
            .get_mut(&product_id)
            .ok_or(SagaError::ProductNotFound(product_id))?;
        product.inventory += 1;
        reservation.released = true;
        Ok(true)
    }

    async fn restock(&self, product_id: ProductId, level: u32) -> Result<Product, SagaError> {
        let mut state = self.write();
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(SagaError::ProductNotFound(product_id))?;
        product.inventory = level;
        Ok(product.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_id() -> ProductId {
        ProductId::new(1)
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(2));

        assert!(ledger.reserve(widget_id(), "wf-1").await.unwrap());
        assert_eq!(ledger.inventory(widget_id()), 1);
        assert_eq!(ledger.active_reservations(), 1);

        assert!(ledger.release(widget_id(), "wf-1").await.unwrap());
        assert_eq!(ledger.inventory(widget_id()), 2);
        assert_eq!(ledger.active_reservations(), 0);
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_key() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(5));

        assert!(ledger.reserve(widget_id(), "wf-1").await.unwrap());
        assert!(ledger.reserve(widget_id(), "wf-1").await.unwrap());
        assert_eq!(ledger.inventory(widget_id()), 4);
    }

    #[tokio::test]
    async fn test_release_twice_restores_one_unit() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(1));
        ledger.reserve(widget_id(), "wf-1").await.unwrap();

        assert!(ledger.release(widget_id(), "wf-1").await.unwrap());
        assert!(!ledger.release(widget_id(), "wf-1").await.unwrap());
        assert_eq!(ledger.inventory(widget_id()), 1);
    }

    #[tokio::test]
    async fn test_out_of_stock_returns_false() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(0));
        assert!(!ledger.reserve(widget_id(), "wf-1").await.unwrap());
        assert_eq!(ledger.inventory(widget_id()), 0);
    }

    #[tokio::test]
    async fn test_fail_on_reserve() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(3));
        ledger.set_fail_on_reserve(true);

        let result = ledger.reserve(widget_id(), "wf-1").await;
        assert!(matches!(result, Err(SagaError::InventoryService(_))));
        assert_eq!(ledger.inventory(widget_id()), 3);
    }

    #[tokio::test]
    async fn test_release_failures_are_consumed() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(1));
        ledger.reserve(widget_id(), "wf-1").await.unwrap();
        ledger.fail_next_releases(1);

        assert!(ledger.release(widget_id(), "wf-1").await.is_err());
        assert!(ledger.release(widget_id(), "wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_restock_sets_level() {
        let ledger = InMemoryInventoryLedger::with_product(Product::widget(0));
        let product = ledger.restock(widget_id(), 100).await.unwrap();
        assert_eq!(product.inventory, 100);
        assert!(matches!(
            ledger.restock(ProductId::new(9), 1).await,
            Err(SagaError::ProductNotFound(_))
        ));
    }
}
