//! Order store trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::OrderId;
use domain::{Order, OrderStatus};

use crate::error::SagaError;

/// Trait for order persistence.
///
/// Status changes and progress ticks are applied through the domain
/// [`Order`] methods, so every implementation enforces the same transitions.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates a pending order with `total_progress` dispatch ticks.
    async fn create_order(&self, total_progress: u32) -> Result<Order, SagaError>;

    /// Moves an order to `status`. Setting the current status again is a no-op.
    async fn update_status(&self, order_id: OrderId, status: OrderStatus)
    -> Result<Order, SagaError>;

    /// Decrements the progress counter of a paid order and returns the
    /// remaining count. The update that reaches 0 also sets DISPATCHED.
    async fn advance_progress(&self, order_id: OrderId) -> Result<u32, SagaError>;

    /// Loads an order.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, SagaError>;

    /// Lists every order, oldest first.
    async fn list_orders(&self) -> Result<Vec<Order>, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: BTreeMap<OrderId, Order>,
    next_id: i64,
    fail_on_create: bool,
}

/// In-memory order store for tests and the database-less server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail every create call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Returns the number of stored orders.
    pub fn order_count(&self) -> usize {
        self.read().orders.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryOrderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryOrderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, total_progress: u32) -> Result<Order, SagaError> {
        let mut state = self.write();
        if state.fail_on_create {
            return Err(SagaError::OrderService("Order store unavailable".to_string()));
        }

        state.next_id += 1;
        let order = Order::new(OrderId::new(state.next_id), total_progress);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, SagaError> {
        let mut state = self.write();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(SagaError::OrderNotFound(order_id))?;
        order.transition(status)?;
        Ok(order.clone())
    }

    async fn advance_progress(&self, order_id: OrderId) -> Result<u32, SagaError> {
        let mut state = self.write();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(SagaError::OrderNotFound(order_id))?;
        Ok(order.tick_progress()?)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, SagaError> {
        Ok(self.read().orders.get(&order_id).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, SagaError> {
        Ok(self.read().orders.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemoryOrderStore::new();
        let first = store.create_order(10).await.unwrap();
        let second = store.create_order(10).await.unwrap();

        assert_eq!(first.id, OrderId::new(1));
        assert_eq!(second.id, OrderId::new(2));
        assert_eq!(first.status, OrderStatus::Pending);
        assert_eq!(store.order_count(), 2);
    }

    #[tokio::test]
    async fn test_advance_progress_flips_to_dispatched() {
        let store = InMemoryOrderStore::new();
        let order = store.create_order(2).await.unwrap();
        store.update_status(order.id, OrderStatus::Paid).await.unwrap();

        assert_eq!(store.advance_progress(order.id).await.unwrap(), 1);
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        assert_eq!(store.advance_progress(order.id).await.unwrap(), 0);
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Dispatched);
        assert_eq!(order.progress_remaining, 0);
    }

    #[tokio::test]
    async fn test_advance_requires_paid_order() {
        let store = InMemoryOrderStore::new();
        let order = store.create_order(10).await.unwrap();
        let result = store.advance_progress(order.id).await;
        assert!(matches!(result, Err(SagaError::Domain(_))));
    }

    #[tokio::test]
    async fn test_missing_order() {
        let store = InMemoryOrderStore::new();
        let result = store.update_status(OrderId::new(42), OrderStatus::Paid).await;
        assert!(matches!(result, Err(SagaError::OrderNotFound(_))));
        assert!(store.get_order(OrderId::new(42)).await.unwrap().is_none());
    }
}
