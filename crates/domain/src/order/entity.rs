//! The order record mutated by saga steps.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// Number of dispatch ticks a new order starts with.
pub const DEFAULT_TOTAL_PROGRESS: u32 = 10;

/// A persisted order.
///
/// Invariants:
/// - status only moves along PENDING → CANCELLED or PENDING → PAID → DISPATCHED
/// - `progress_remaining` only decreases, and reaches 0 in the same update
///   that sets DISPATCHED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub progress_remaining: u32,
    pub last_update_time: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order.
    pub fn new(id: OrderId, total_progress: u32) -> Self {
        Self {
            id,
            status: OrderStatus::Pending,
            progress_remaining: total_progress,
            last_update_time: Utc::now(),
        }
    }

    /// Moves the order to `next`.
    ///
    /// Returns false if the order already had that status (nothing changes).
    pub fn transition(&mut self, next: OrderStatus) -> Result<bool, OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStatusTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        if self.status == next {
            return Ok(false);
        }
        // DISPATCHED is reached only through `tick_progress`.
        if next == OrderStatus::Dispatched && self.progress_remaining > 0 {
            return Err(OrderError::InvalidStatusTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.last_update_time = Utc::now();
        Ok(true)
    }

    /// Advances dispatch by one tick and returns the remaining count.
    ///
    /// The tick that brings the count to 0 also marks the order DISPATCHED.
    pub fn tick_progress(&mut self) -> Result<u32, OrderError> {
        if !self.status.can_dispatch() {
            return Err(OrderError::NotPaid {
                order_id: self.id,
                status: self.status,
            });
        }
        if self.progress_remaining == 0 {
            return Err(OrderError::ProgressExhausted(self.id));
        }

        self.progress_remaining -= 1;
        if self.progress_remaining == 0 {
            self.status = OrderStatus::Dispatched;
        }
        self.last_update_time = Utc::now();
        Ok(self.progress_remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid_order(progress: u32) -> Order {
        let mut order = Order::new(OrderId::new(1), progress);
        order.transition(OrderStatus::Paid).unwrap();
        order
    }

    #[test]
    fn test_new_order_is_pending_with_full_progress() {
        let order = Order::new(OrderId::new(1), DEFAULT_TOTAL_PROGRESS);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.progress_remaining, 10);
    }

    #[test]
    fn test_repeated_transition_is_a_no_op() {
        let mut order = Order::new(OrderId::new(1), 10);
        assert!(order.transition(OrderStatus::Cancelled).unwrap());
        assert!(!order.transition(OrderStatus::Cancelled).unwrap());
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_cancelled_order_cannot_be_paid() {
        let mut order = Order::new(OrderId::new(1), 10);
        order.transition(OrderStatus::Cancelled).unwrap();
        let err = order.transition(OrderStatus::Paid).unwrap_err();
        assert!(matches!(err, OrderError::InvalidStatusTransition { .. }));
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_dispatch_requires_exhausted_progress() {
        let mut order = paid_order(3);
        assert!(order.transition(OrderStatus::Dispatched).is_err());
    }

    #[test]
    fn test_ticks_strictly_decrease_and_flip_on_zero() {
        let mut order = paid_order(DEFAULT_TOTAL_PROGRESS);
        let mut previous = order.progress_remaining;

        for _ in 0..DEFAULT_TOTAL_PROGRESS {
            let remaining = order.tick_progress().unwrap();
            assert!(remaining < previous);
            assert_eq!(remaining == 0, order.status == OrderStatus::Dispatched);
            previous = remaining;
        }

        assert_eq!(order.progress_remaining, 0);
        assert_eq!(order.status, OrderStatus::Dispatched);
    }

    #[test]
    fn test_tick_after_dispatch_fails() {
        let mut order = paid_order(1);
        assert_eq!(order.tick_progress().unwrap(), 0);
        assert!(matches!(
            order.tick_progress(),
            Err(OrderError::NotPaid { .. })
        ));
    }

    #[test]
    fn test_tick_on_pending_order_fails() {
        let mut order = Order::new(OrderId::new(1), 10);
        assert!(matches!(
            order.tick_progress(),
            Err(OrderError::NotPaid { .. })
        ));
        assert_eq!(order.progress_remaining, 10);
    }
}
