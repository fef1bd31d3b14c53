//! Domain layer for the saga workspace.
//!
//! This crate holds the data the sagas operate on:
//! - Orders with their status state machine and dispatch progress counter
//! - Products with an inventory counter
//! - Security reports and the issues generated from them for approval

pub mod error;
pub mod issue;
pub mod order;
pub mod product;

pub use error::DomainError;
pub use issue::{Issue, IssueError, IssueStatus, Report};
pub use order::{DEFAULT_TOTAL_PROGRESS, Order, OrderError, OrderStatus};
pub use product::{Money, Product};
