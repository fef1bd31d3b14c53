//! Durable sagas for order fulfillment and issue approval.
//!
//! Every saga is a [`durable::Workflow`]: its side effects run as journaled
//! steps, so a restarted or forked saga replays what already happened
//! instead of repeating it.
//!
//! - [`CheckoutWorkflow`]: create order, reserve inventory, wait for payment,
//!   then either confirm and spawn dispatch or release the reservation
//! - [`DispatchWorkflow`]: ticks order progress down to DISPATCHED
//! - [`ScanWorkflow`]: judge every available scan report and store it
//! - [`IssueApprovalWorkflow`]: generate an issue from a scan report and wait
//!   for a human decision
//!
//! [`SagaCoordinator`] exposes the caller-facing operations.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod issue_approval;
pub mod order_fulfillment;
pub mod scan;
pub mod services;

pub use config::SagaConfig;
pub use coordinator::SagaCoordinator;
pub use dispatch::{DispatchInput, DispatchWorkflow};
pub use error::{Result, SagaError};
pub use issue_approval::{
    APPROVAL_TOPIC, ISSUE_GENERATED_EVENT, IssueApprovalInput, IssueApprovalWorkflow,
};
pub use order_fulfillment::{
    CheckoutInput, CheckoutOutcome, CheckoutResult, CheckoutWorkflow, ORDER_ID_EVENT,
    PAYMENT_ID_EVENT, PAYMENT_PAID, PAYMENT_STATUS_TOPIC,
};
pub use scan::{ScanSummary, ScanWorkflow, ScannedRepo};
pub use services::{
    ContentGenerator, DirectoryReportSource, InMemoryInventoryLedger, InMemoryIssueStore,
    InMemoryOrderStore, InMemoryReportSource, InMemoryReportStore, InMemoryServices,
    InventoryLedger, IssueStore, KeywordVulnerabilityDetector, OrderStore, PostgresIssueTracker,
    PostgresShop, ReportSource, ReportStore, SagaServices, TemplateContentGenerator,
    VulnerabilityDetector,
};
