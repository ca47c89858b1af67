pub mod apt;
pub mod certs;
pub mod command;
pub mod logs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use apt::PackageUpdate;
pub use certs::CertRenewal;
pub use command::{CommandRunner, SystemCommandRunner};
pub use logs::LogCleanup;

use crate::config::UpkeepConfig;
use crate::error::ActionError;
use crate::job::{JobKind, JobOutcome};

/// The mutating operation a maintenance job wraps.
pub trait Action {
    fn name(&self) -> &str;

    /// Describes what `execute` would do. Must not change the host.
    async fn simulate(&self) -> Result<String, ActionError>;

    async fn execute(&self) -> Result<JobOutcome, ActionError>;
}

/// Dispatch over the built-in jobs.
pub enum MaintenanceAction {
    Update(PackageUpdate),
    Cleanup(LogCleanup),
    Certs(CertRenewal),
}

impl MaintenanceAction {
    pub fn for_kind(kind: JobKind, config: &UpkeepConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let state_dir = config.paths.state_dir.clone();
        match kind {
            JobKind::Update => {
                MaintenanceAction::Update(PackageUpdate::new(runner, state_dir, &config.update))
            }
            JobKind::Cleanup => {
                MaintenanceAction::Cleanup(LogCleanup::new(runner, state_dir, &config.cleanup))
            }
            JobKind::Certs => MaintenanceAction::Certs(CertRenewal::new(runner, &config.certs)),
        }
    }
}

impl Action for MaintenanceAction {
    fn name(&self) -> &str {
        match self {
            MaintenanceAction::Update(a) => a.name(),
            MaintenanceAction::Cleanup(a) => a.name(),
            MaintenanceAction::Certs(a) => a.name(),
        }
    }

    async fn simulate(&self) -> Result<String, ActionError> {
        match self {
            MaintenanceAction::Update(a) => a.simulate().await,
            MaintenanceAction::Cleanup(a) => a.simulate().await,
            MaintenanceAction::Certs(a) => a.simulate().await,
        }
    }

    async fn execute(&self) -> Result<JobOutcome, ActionError> {
        match self {
            MaintenanceAction::Update(a) => a.execute().await,
            MaintenanceAction::Cleanup(a) => a.execute().await,
            MaintenanceAction::Certs(a) => a.execute().await,
        }
    }
}

/// `<state_dir>/<prefix>-<UTC timestamp>.txt`, creating the directory.
pub(crate) async fn write_artifact(
    state_dir: &Path,
    prefix: &str,
    now: DateTime<Utc>,
    contents: &str,
) -> Result<PathBuf, ActionError> {
    tokio::fs::create_dir_all(state_dir).await.map_err(|e| {
        ActionError::new(format!("creating {}: {e}", state_dir.display()))
    })?;
    let path = state_dir.join(format!("{prefix}-{}.txt", now.format("%Y%m%dT%H%M%SZ")));
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| ActionError::new(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

/// Binary-prefixed size, one decimal above KiB.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub(crate) fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}
