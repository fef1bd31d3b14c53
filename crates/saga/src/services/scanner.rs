//! Where scan reports come from and how they are judged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::SagaError;

/// A set of raw scan reports, one per repository.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Lists the repositories that have a report, in a stable order.
    async fn list_repos(&self) -> Result<Vec<String>, SagaError>;

    /// Reads the raw report of one repository.
    async fn read_report(&self, repo_name: &str) -> Result<String, SagaError>;
}

/// Decides whether a raw report shows vulnerabilities.
#[async_trait]
pub trait VulnerabilityDetector: Send + Sync {
    async fn detect(&self, raw_report: &str) -> Result<bool, SagaError>;
}

/// Reports stored as files in one directory; the file stem is the repository.
#[derive(Debug, Clone)]
pub struct DirectoryReportSource {
    dir: PathBuf,
}

impl DirectoryReportSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn repo_name(path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
    }

    async fn find(&self, repo_name: &str) -> Result<PathBuf, SagaError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| source_error(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.is_file() && Self::repo_name(&path).as_deref() == Some(repo_name) {
                return Ok(path);
            }
        }
        Err(SagaError::ReportSource(format!(
            "no report for {repo_name} in {}",
            self.dir.display()
        )))
    }
}

fn source_error(path: &Path, err: std::io::Error) -> SagaError {
    SagaError::ReportSource(format!("{}: {err}", path.display()))
}

#[async_trait]
impl ReportSource for DirectoryReportSource {
    async fn list_repos(&self) -> Result<Vec<String>, SagaError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| source_error(&self.dir, e))?;

        let mut repos = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.is_file() {
                repos.extend(Self::repo_name(&path));
            }
        }
        tracing::debug!(dir = %self.dir.display(), count = repos.len(), "listed scan reports");
        Ok(repos.into_iter().collect())
    }

    async fn read_report(&self, repo_name: &str) -> Result<String, SagaError> {
        let path = self.find(repo_name).await?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| source_error(&path, e))
    }
}

#[derive(Debug, Default)]
struct InMemorySourceState {
    reports: BTreeMap<String, String>,
    unreadable: BTreeSet<String>,
}

/// In-memory report source for tests and the database-less server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReportSource {
    state: Arc<RwLock<InMemorySourceState>>,
}

impl InMemoryReportSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_report(&self, repo_name: &str, raw_report: &str) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reports
            .insert(repo_name.to_string(), raw_report.to_string());
    }

    /// Makes every read of this repository's report fail.
    pub fn set_unreadable(&self, repo_name: &str) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unreadable
            .insert(repo_name.to_string());
    }
}

#[async_trait]
impl ReportSource for InMemoryReportSource {
    async fn list_repos(&self) -> Result<Vec<String>, SagaError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.reports.keys().cloned().collect())
    }

    async fn read_report(&self, repo_name: &str) -> Result<String, SagaError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.unreadable.contains(repo_name) {
            return Err(SagaError::ReportSource(format!(
                "report for {repo_name} is unreadable"
            )));
        }
        state
            .reports
            .get(repo_name)
            .cloned()
            .ok_or_else(|| SagaError::ReportSource(format!("no report for {repo_name}")))
    }
}

const VULNERABILITY_MARKERS: [&str; 5] = [
    "vulnerability",
    "vulnerabilities",
    "security issue",
    "cve",
    "exploit",
];

/// Deterministic detector: a report is vulnerable if it mentions any known
/// marker, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct KeywordVulnerabilityDetector {
    fail: Arc<AtomicBool>,
}

impl KeywordVulnerabilityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the detector to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VulnerabilityDetector for KeywordVulnerabilityDetector {
    async fn detect(&self, raw_report: &str) -> Result<bool, SagaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::VulnerabilityDetection(
                "detector unavailable".to_string(),
            ));
        }
        let report = raw_report.to_lowercase();
        Ok(VULNERABILITY_MARKERS
            .iter()
            .any(|marker| report.contains(marker)))
    }
}
