//! Collaborators the sagas perform their side effects through.

mod generator;
mod inventory;
mod issues;
mod orders;
mod postgres;
mod scanner;

use std::sync::Arc;

pub use generator::{ContentGenerator, TemplateContentGenerator};
pub use inventory::{InMemoryInventoryLedger, InventoryLedger};
pub use issues::{InMemoryIssueStore, InMemoryReportStore, IssueStore, ReportStore};
pub use orders::{InMemoryOrderStore, OrderStore};
pub use postgres::{PostgresIssueTracker, PostgresShop};
pub use scanner::{
    DirectoryReportSource, InMemoryReportSource, KeywordVulnerabilityDetector, ReportSource,
    VulnerabilityDetector,
};

use crate::config::SagaConfig;

/// Everything a saga step needs, passed explicitly to each workflow.
#[derive(Clone)]
pub struct SagaServices {
    pub inventory: Arc<dyn InventoryLedger>,
    pub orders: Arc<dyn OrderStore>,
    pub reports: Arc<dyn ReportStore>,
    pub issues: Arc<dyn IssueStore>,
    pub generator: Arc<dyn ContentGenerator>,
    pub sources: Arc<dyn ReportSource>,
    pub detector: Arc<dyn VulnerabilityDetector>,
    pub config: SagaConfig,
}

impl SagaServices {
    /// Services backed by PostgreSQL.
    pub fn postgres(pool: sqlx::PgPool, config: SagaConfig) -> Self {
        let shop = PostgresShop::new(pool.clone());
        let tracker = PostgresIssueTracker::new(pool);
        Self {
            inventory: Arc::new(shop.clone()),
            orders: Arc::new(shop),
            reports: Arc::new(tracker.clone()),
            issues: Arc::new(tracker),
            generator: Arc::new(TemplateContentGenerator::new()),
            sources: Arc::new(DirectoryReportSource::new(config.scan_reports_dir.clone())),
            detector: Arc::new(KeywordVulnerabilityDetector::new()),
            config,
        }
    }
}

/// In-memory services with handles kept for inspection and fault injection.
#[derive(Clone, Default)]
pub struct InMemoryServices {
    pub inventory: InMemoryInventoryLedger,
    pub orders: InMemoryOrderStore,
    pub reports: InMemoryReportStore,
    pub issues: InMemoryIssueStore,
    pub generator: TemplateContentGenerator,
    pub sources: InMemoryReportSource,
    pub detector: KeywordVulnerabilityDetector,
}

impl InMemoryServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased services sharing state with these handles.
    pub fn services(&self, config: SagaConfig) -> SagaServices {
        SagaServices {
            inventory: Arc::new(self.inventory.clone()),
            orders: Arc::new(self.orders.clone()),
            reports: Arc::new(self.reports.clone()),
            issues: Arc::new(self.issues.clone()),
            generator: Arc::new(self.generator.clone()),
            sources: Arc::new(self.sources.clone()),
            detector: Arc::new(self.detector.clone()),
            config,
        }
    }
}
