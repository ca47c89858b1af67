use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EXIT_FAILED, EXIT_OK};

/// How a job that got past preflight ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// The action found nothing to do and changed nothing.
    SkippedNoWork,
    Success,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::SkippedNoWork => write!(f, "skipped"),
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one job execution. Built once at the end of a run and only read
/// afterwards by the log sink, the notifier and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: OutcomeStatus,
    pub summary: String,
    /// Files produced by the run, in creation order.
    pub artifacts: Vec<PathBuf>,
}

impl JobOutcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn skipped(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::SkippedNoWork,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = PathBuf>) -> Self {
        self.artifacts.extend(artifacts);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }

    pub fn exit_code(&self) -> u8 {
        match self.status {
            OutcomeStatus::Failed => EXIT_FAILED,
            OutcomeStatus::Success | OutcomeStatus::SkippedNoWork => EXIT_OK,
        }
    }

    /// Summary followed by one line per artifact, phrased for recovery when
    /// the job failed.
    pub fn report(&self) -> String {
        let mut text = self.summary.clone();
        for artifact in &self.artifacts {
            let line = if self.is_failed() {
                format!(
                    "\nstate snapshot available at {} for manual recovery",
                    artifact.display()
                )
            } else {
                format!("\nartifact: {}", artifact.display())
            };
            text.push_str(&line);
        }
        text
    }
}

/// Severity shared by the log sink and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}
