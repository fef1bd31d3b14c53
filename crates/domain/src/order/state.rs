//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Paid ──► Dispatched
///           └──► Cancelled
/// ```
///
/// Statuses are stored as small integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, inventory not yet settled.
    #[default]
    Pending,

    /// Payment confirmed, dispatch in progress.
    Paid,

    /// Dispatch progress reached zero (terminal state).
    Dispatched,

    /// Order cancelled, inventory released (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order can be marked paid in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if dispatch progress can advance in this status.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if moving to `next` is allowed.
    ///
    /// Staying in the current status is always allowed, so re-applying a
    /// status update is a no-op.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == next
            || match next {
                OrderStatus::Pending => false,
                OrderStatus::Paid => self.can_pay(),
                OrderStatus::Cancelled => self.can_cancel(),
                OrderStatus::Dispatched => self.can_dispatch(),
            }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Dispatched | OrderStatus::Cancelled)
    }

    /// Returns the stored status code.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::Cancelled => -1,
            OrderStatus::Pending => 0,
            OrderStatus::Dispatched => 1,
            OrderStatus::Paid => 2,
        }
    }

    /// Parses a stored status code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            -1 => Some(OrderStatus::Cancelled),
            0 => Some(OrderStatus::Pending),
            1 => Some(OrderStatus::Dispatched),
            2 => Some(OrderStatus::Paid),
            _ => None,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Dispatched => "DISPATCHED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Dispatched,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_allowed_paths() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Dispatched));
    }

    #[test]
    fn test_cancelled_and_paid_are_exclusive() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Dispatched.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Dispatched));
    }

    #[test]
    fn test_same_status_is_allowed() {
        for status in ALL {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_nothing_returns_to_pending() {
        for status in ALL.into_iter().filter(|s| *s != OrderStatus::Pending) {
            assert!(!status.can_transition_to(OrderStatus::Pending));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Dispatched.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderStatus::Cancelled.code(), -1);
        assert_eq!(OrderStatus::Pending.code(), 0);
        assert_eq!(OrderStatus::Dispatched.code(), 1);
        assert_eq!(OrderStatus::Paid.code(), 2);
        for status in ALL {
            assert_eq!(OrderStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OrderStatus::from_code(3), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(OrderStatus::Pending.to_string(), "PENDING");
        assert_eq!(OrderStatus::Dispatched.to_string(), "DISPATCHED");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::Paid).unwrap();
        assert_eq!(json, "\"PAID\"");
        let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderStatus::Paid);
    }
}
