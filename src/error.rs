use std::path::PathBuf;

use thiserror::Error;

/// Process exit code: the job ran and succeeded, or had nothing to do.
pub const EXIT_OK: u8 = 0;
/// Process exit code: the job ran and failed.
pub const EXIT_FAILED: u8 = 1;
/// Process exit code: the job did not run (lock held, preflight failed).
pub const EXIT_DID_NOT_RUN: u8 = 2;
/// Process exit code: configuration could not be loaded (sysexits EX_CONFIG).
pub const EXIT_CONFIG: u8 = 78;
/// Process exit code: interrupted by a signal before execution started.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum UpkeepError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid job category {0:?}: use lowercase letters, digits, '-' or '_'")]
    InvalidCategory(String),
}

/// Reasons a run terminated before the action produced an outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{category} is already running (pid {holder_pid})")]
    AlreadyRunning { category: String, holder_pid: u32 },

    #[error("preflight check '{check}' failed: {reason}")]
    PreflightFailed { check: String, reason: String },

    #[error("interrupted by signal during {phase}")]
    Interrupted { phase: &'static str },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl RunError {
    /// Exit status distinguishing "did not run" from an interrupted run.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Interrupted { .. } => EXIT_INTERRUPTED,
            RunError::AlreadyRunning { .. }
            | RunError::PreflightFailed { .. }
            | RunError::Lock(_) => EXIT_DID_NOT_RUN,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock file {path} is now held by pid {holder_pid}")]
    Stolen { path: PathBuf, holder_pid: u32 },
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LockError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a maintenance action or one of the system commands it drives.
///
/// `artifacts` lists files the action produced before failing (a package
/// selection snapshot, a cleanup report) so an operator can recover by hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ActionError {
    pub reason: String,
    pub artifacts: Vec<PathBuf>,
}

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::new(err.to_string())
    }
}
