//! Scan saga: judges every available report and stores it.
//!
//! ```text
//! list reports ──► for each repo: read_report-<repo> ──► detect_vuln-<repo> ──► store_report-<repo>
//! ```
//!
//! A repository whose report cannot be read or stored is skipped; a failed
//! detection counts as "no vulnerabilities". Step names carry the repository
//! so a replay matches each recorded result to the report it belongs to.

use async_trait::async_trait;
use common::ReportId;
use domain::Report;
use durable::{DurableError, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::SagaServices;

const STEP_LIST_REPORTS: &str = "list_reports";

/// One stored report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedRepo {
    pub repo_name: String,
    pub report_id: ReportId,
    pub has_vuln: bool,
}

/// Output of a scan saga.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scanned: Vec<ScannedRepo>,
    /// Repositories whose report could not be read or stored.
    pub skipped: Vec<String>,
}

impl ScanSummary {
    pub fn vulnerable_count(&self) -> usize {
        self.scanned.iter().filter(|r| r.has_vuln).count()
    }
}

pub struct ScanWorkflow {
    services: SagaServices,
}

impl ScanWorkflow {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }
}

/// Turns a failed step into `None` and passes every other error on.
fn skip_failed<T>(outcome: std::result::Result<T, DurableError>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(DurableError::StepFailed { step, reason }) => {
            tracing::warn!(step = %step, error = %reason, "scan step failed");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Workflow for ScanWorkflow {
    const NAME: &'static str = "scan";
    type Input = ();
    type Output = ScanSummary;
    type Error = SagaError;

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id()))]
    async fn run(&self, ctx: &WorkflowContext, _input: ()) -> Result<ScanSummary> {
        let sources = &self.services.sources;
        let detector = &self.services.detector;
        let reports = &self.services.reports;

        let repos: Vec<String> = ctx
            .run_step(STEP_LIST_REPORTS, || async move { sources.list_repos().await })
            .await?;
        tracing::info!(count = repos.len(), "scanning reports");

        let mut summary = ScanSummary::default();
        for repo in &repos {
            let repo = repo.as_str();

            let read = ctx
                .run_step(&format!("read_report-{repo}"), || async move {
                    sources.read_report(repo).await
                })
                .await;
            let Some(raw_report) = skip_failed::<String>(read)? else {
                summary.skipped.push(repo.to_string());
                continue;
            };

            let raw = raw_report.as_str();
            let detected = ctx
                .run_step(&format!("detect_vuln-{repo}"), || async move {
                    detector.detect(raw).await
                })
                .await;
            let has_vuln = skip_failed::<bool>(detected)?.unwrap_or(false);

            let stored = ctx
                .run_step(&format!("store_report-{repo}"), || async move {
                    reports.upsert_report(repo, has_vuln, raw).await
                })
                .await;
            let Some(report) = skip_failed::<Report>(stored)? else {
                summary.skipped.push(repo.to_string());
                continue;
            };

            metrics::counter!("scan_reports_processed", "vulnerable" => has_vuln.to_string())
                .increment(1);
            tracing::debug!(repo, has_vuln, report_id = %report.id, "report processed");
            summary.scanned.push(ScannedRepo {
                repo_name: report.repo_name,
                report_id: report.id,
                has_vuln,
            });
        }

        tracing::info!(
            scanned = summary.scanned.len(),
            skipped = summary.skipped.len(),
            vulnerable = summary.vulnerable_count(),
            "scan completed"
        );
        Ok(summary)
    }
}
