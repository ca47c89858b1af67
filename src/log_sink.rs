//! Append-only maintenance log.
//!
//! One line per event: `<RFC 3339 UTC timestamp> [<SEVERITY>] <message>`.
//! Writes are best-effort; a full or read-only disk never fails a job. Every
//! line is also emitted as a `tracing` event.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::job::Severity;

#[derive(Debug, Clone)]
pub struct LogSink {
    path: Option<PathBuf>,
    min_severity: Severity,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            min_severity: Severity::Debug,
        }
    }

    /// A sink that only forwards to `tracing`.
    pub fn tracing_only() -> Self {
        Self {
            path: None,
            min_severity: Severity::Debug,
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Severity::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Severity::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Severity::Error, message);
    }

    pub fn log(&self, severity: Severity, message: impl AsRef<str>) {
        let message = message.as_ref();
        match severity {
            Severity::Debug => tracing::debug!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }

        if severity < self.min_severity {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        let line = format_line(Utc::now(), severity, message);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            tracing::debug!(path = %path.display(), error = %e, "log sink write failed");
        }
    }
}

/// Multi-line messages are flattened so each event stays on one line.
fn format_line(at: DateTime<Utc>, severity: Severity, message: &str) -> String {
    let flat = message.replace('\n', " | ");
    format!(
        "{} [{severity}] {flat}\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
