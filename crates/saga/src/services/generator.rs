//! Issue text generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::Report;

use crate::error::SagaError;

/// Writes the body of an issue from a scan report.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_issue(&self, report: &Report) -> Result<String, SagaError>;
}

/// Deterministic generator that fills a Markdown template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContentGenerator {
    fail: Arc<AtomicBool>,
}

impl TemplateContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the generator to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    async fn generate_issue(&self, report: &Report) -> Result<String, SagaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::ContentGeneration(
                "generator unavailable".to_string(),
            ));
        }

        let summary = if report.has_vuln {
            "The latest scan found vulnerabilities that need attention."
        } else {
            "The latest scan found no known vulnerabilities."
        };
        Ok(format!(
            "## Security scan results for {repo}\n\n{summary}\n\n<details>\n<summary>Raw report</summary>\n\n```\n{raw}\n```\n</details>\n",
            repo = report.repo_name,
            raw = report.raw_report.trim(),
        ))
    }
}
