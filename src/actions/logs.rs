//! Log housekeeping: journal vacuum, removal of old rotated logs, truncation
//! of oversized container logs.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;

use super::command::{CommandRunner, CommandSpec, run_checked};
use super::{Action, format_bytes, plural, write_artifact};
use crate::config::CleanupConfig;
use crate::error::ActionError;
use crate::job::JobOutcome;

const ROTATED_PATTERNS: [&str; 3] = ["**/*.gz", "**/*.[0-9]", "**/*.old"];

pub struct LogCleanup {
    runner: Arc<dyn CommandRunner>,
    state_dir: PathBuf,
    log_dir: PathBuf,
    retention_days: u32,
    journal_max_size: String,
    docker_containers_dir: PathBuf,
    docker_log_max_bytes: u64,
}

/// Files selected for removal or truncation, with their sizes in bytes.
#[derive(Debug, Default, PartialEq, Eq)]
struct CleanupPlan {
    rotated: Vec<(PathBuf, u64)>,
    oversized: Vec<(PathBuf, u64)>,
}

impl CleanupPlan {
    fn is_empty(&self) -> bool {
        self.rotated.is_empty() && self.oversized.is_empty()
    }

    fn rotated_bytes(&self) -> u64 {
        self.rotated.iter().map(|(_, size)| size).sum()
    }

    fn oversized_bytes(&self) -> u64 {
        self.oversized.iter().map(|(_, size)| size).sum()
    }
}

impl LogCleanup {
    pub fn new(runner: Arc<dyn CommandRunner>, state_dir: PathBuf, config: &CleanupConfig) -> Self {
        Self {
            runner,
            state_dir,
            log_dir: config.log_dir.clone(),
            retention_days: config.retention_days,
            journal_max_size: config.journal_max_size.clone(),
            docker_containers_dir: config.docker_containers_dir.clone(),
            docker_log_max_bytes: config.docker_log_max_mb.saturating_mul(1024 * 1024),
        }
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }

    fn plan(&self, now: SystemTime) -> CleanupPlan {
        let cutoff = now.checked_sub(self.retention()).unwrap_or(SystemTime::UNIX_EPOCH);

        let mut rotated = BTreeSet::new();
        for pattern in ROTATED_PATTERNS {
            for (path, size, modified) in matching_files(&self.log_dir, pattern) {
                if modified < cutoff {
                    rotated.insert((path, size));
                }
            }
        }

        let oversized = matching_files(&self.docker_containers_dir, "*/*-json.log")
            .into_iter()
            .filter(|(_, size, _)| *size > self.docker_log_max_bytes)
            .map(|(path, size, _)| (path, size))
            .collect();

        CleanupPlan {
            rotated: rotated.into_iter().collect(),
            oversized,
        }
    }

    fn journal_vacuum(&self) -> CommandSpec {
        CommandSpec::new("journalctl").args([
            format!("--vacuum-size={}", self.journal_max_size),
            format!("--vacuum-time={}d", self.retention_days),
        ])
    }
}

impl Action for LogCleanup {
    fn name(&self) -> &str {
        "log-cleanup"
    }

    async fn simulate(&self) -> Result<String, ActionError> {
        let plan = self.plan(SystemTime::now());
        Ok(format!(
            "would delete {} ({}), truncate {} ({}), vacuum journal to {} / {} days",
            plural(plan.rotated.len(), "rotated log", "rotated logs"),
            format_bytes(plan.rotated_bytes()),
            plural(plan.oversized.len(), "container log", "container logs"),
            format_bytes(plan.oversized_bytes()),
            self.journal_max_size,
            self.retention_days
        ))
    }

    async fn execute(&self) -> Result<JobOutcome, ActionError> {
        let vacuum = run_checked(self.runner.as_ref(), &self.journal_vacuum()).await?;
        // journalctl reports on stderr.
        let journal_freed =
            journal_freed_bytes(&vacuum.stderr) + journal_freed_bytes(&vacuum.stdout);

        let plan = self.plan(SystemTime::now());
        if plan.is_empty() && journal_freed == 0 {
            return Ok(JobOutcome::skipped("nothing to clean up"));
        }

        let mut report = String::new();
        let mut failures = Vec::new();
        let _ = writeln!(report, "journal freed {journal_freed}");

        let mut deleted = 0;
        for (path, size) in &plan.rotated {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    deleted += 1;
                    let _ = writeln!(report, "deleted {} {size}", path.display());
                }
                Err(e) => failures.push(format!("delete {}: {e}", path.display())),
            }
        }

        let mut truncated = 0;
        for (path, size) in &plan.oversized {
            match truncate(path) {
                Ok(()) => {
                    truncated += 1;
                    let _ = writeln!(report, "truncated {} {size}", path.display());
                }
                Err(e) => failures.push(format!("truncate {}: {e}", path.display())),
            }
        }

        let artifact = write_artifact(&self.state_dir, "log-cleanup", Utc::now(), &report).await?;

        if let Some(first) = failures.first() {
            return Err(ActionError::new(format!(
                "{} during cleanup, first: {first}",
                plural(failures.len(), "error", "errors")
            ))
            .with_artifact(artifact));
        }

        let freed = plan.rotated_bytes() + plan.oversized_bytes() + journal_freed;
        Ok(JobOutcome::success(format!(
            "freed {}: {} deleted, {} truncated, journal vacuum freed {}",
            format_bytes(freed),
            plural(deleted, "rotated log", "rotated logs"),
            plural(truncated, "container log", "container logs"),
            format_bytes(journal_freed)
        ))
        .with_artifacts([artifact]))
    }
}

/// Regular files under `dir` matching `pattern`, with size and mtime.
fn matching_files(dir: &Path, pattern: &str) -> Vec<(PathBuf, u64, SystemTime)> {
    let full = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let Ok(paths) = glob::glob(&full) else {
        return Vec::new();
    };
    paths
        .filter_map(Result::ok)
        .filter_map(|path| {
            let meta = std::fs::symlink_metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().ok()?;
            Some((path, meta.len(), modified))
        })
        .collect()
}

fn truncate(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(0)
}

/// Sums every "freed <size>" reported by `journalctl --vacuum-*`.
fn journal_freed_bytes(output: &str) -> u64 {
    output
        .lines()
        .filter_map(|line| line.split("freed ").nth(1))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(parse_size)
        .sum()
}

/// Parses journalctl sizes such as `0B`, `512.0K`, `1.2G`.
fn parse_size(text: &str) -> Option<u64> {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };
    Some((value * multiplier as f64) as u64)
}
