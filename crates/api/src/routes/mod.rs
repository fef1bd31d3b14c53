//! Route handlers grouped by resource.

pub mod health;
pub mod issues;
pub mod metrics;
pub mod shop;
pub mod workflows;

use saga::SagaCoordinator;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: SagaCoordinator,
    /// `"postgres"` or `"memory"`, reported by the health check.
    pub backend: &'static str,
}
