//! Integration tests for the order and issue models.
//!
//! These tests walk the two order paths and the issue approval path through
//! the public API only.

use common::{IssueId, OrderId, WorkflowId};
use domain::{
    DEFAULT_TOTAL_PROGRESS, DomainError, Issue, IssueStatus, Order, OrderError, OrderStatus,
    Product,
};

mod order_lifecycle {
    use super::*;

    #[test]
    fn paid_order_is_dispatched_after_all_ticks() {
        let mut order = Order::new(OrderId::new(7), DEFAULT_TOTAL_PROGRESS);
        order.transition(OrderStatus::Paid).unwrap();

        let ticks: Vec<u32> = (0..DEFAULT_TOTAL_PROGRESS)
            .map(|_| order.tick_progress().unwrap())
            .collect();

        assert_eq!(ticks, (0..DEFAULT_TOTAL_PROGRESS).rev().collect::<Vec<_>>());
        assert_eq!(order.status, OrderStatus::Dispatched);
        assert!(order.status.is_terminal());
    }

    #[test]
    fn cancelled_order_never_dispatches() {
        let mut order = Order::new(OrderId::new(8), DEFAULT_TOTAL_PROGRESS);
        order.transition(OrderStatus::Cancelled).unwrap();

        assert!(order.transition(OrderStatus::Paid).is_err());
        assert!(order.tick_progress().is_err());
        assert_eq!(order.progress_remaining, DEFAULT_TOTAL_PROGRESS);
    }

    #[test]
    fn errors_convert_into_domain_error() {
        let mut order = Order::new(OrderId::new(9), 1);
        let err: DomainError = order.tick_progress().unwrap_err().into();
        assert!(matches!(err, DomainError::Order(OrderError::NotPaid { .. })));
        assert!(err.to_string().contains("PENDING"));
    }
}

mod inventory {
    use super::*;

    #[test]
    fn widget_seed_is_in_stock() {
        let widget = Product::widget(100);
        assert!(widget.in_stock());
        assert_eq!(widget.price.to_string(), "$99.99");
        assert!(!Product::widget(0).in_stock());
    }
}

mod issue_lifecycle {
    use super::*;

    #[test]
    fn decision_is_applied_once() {
        let mut issue = Issue::new(
            IssueId::new(1),
            "acme/web",
            "Bump openssl",
            WorkflowId::new("issue-wf"),
        );

        let decision: IssueStatus = "rejected".parse().unwrap();
        issue.resolve(decision).unwrap();
        assert_eq!(issue.status, IssueStatus::Rejected);

        let err: DomainError = issue.resolve(IssueStatus::Approved).unwrap_err().into();
        assert!(err.to_string().contains("already rejected"));
    }
}
