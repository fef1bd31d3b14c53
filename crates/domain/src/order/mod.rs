//! Orders and their status state machine.

mod entity;
mod state;

pub use entity::{DEFAULT_TOTAL_PROGRESS, Order};
pub use state::OrderStatus;

use common::OrderId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The status change leaves both allowed paths
    /// (PENDING → CANCELLED, PENDING → PAID → DISPATCHED).
    #[error("Invalid status transition for order {order_id}: {from} → {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Dispatch progress can only advance on a paid order.
    #[error("Order {order_id} is {status}, dispatch progress requires PAID")]
    NotPaid {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// No dispatch progress is left.
    #[error("Order {0} has no dispatch progress remaining")]
    ProgressExhausted(OrderId),

    /// The stored status code is not one of the known values.
    #[error("Unknown order status code: {0}")]
    UnknownStatusCode(i16),
}
