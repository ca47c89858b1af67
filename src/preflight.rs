//! Safety preconditions evaluated before any mutation.
//!
//! Checks are stateless and re-evaluated on every run. Order matters: the
//! runner stops at the first failure, so cheap host-global checks go first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::actions::command::{CommandRunner, CommandSpec};
use crate::config::UpkeepConfig;
use crate::job::JobKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Pass,
    Fail(String),
}

#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn evaluate(&self) -> CheckResult;
}

/// Effective UID must be root.
pub struct PrivilegeCheck;

#[async_trait]
impl PreflightCheck for PrivilegeCheck {
    fn name(&self) -> &str {
        "elevated-privilege"
    }

    async fn evaluate(&self) -> CheckResult {
        let euid = nix::unistd::geteuid();
        if euid.is_root() {
            CheckResult::Pass
        } else {
            CheckResult::Fail(format!("must run as root (effective uid {euid})"))
        }
    }
}

/// Free space on the filesystem holding `path`, as seen by unprivileged users.
pub struct DiskSpaceCheck {
    pub path: PathBuf,
    pub min_free_mb: u64,
}

#[async_trait]
impl PreflightCheck for DiskSpaceCheck {
    fn name(&self) -> &str {
        "disk-space"
    }

    async fn evaluate(&self) -> CheckResult {
        match free_megabytes(&self.path) {
            Ok(free) if free >= self.min_free_mb => CheckResult::Pass,
            Ok(free) => CheckResult::Fail(format!(
                "{} MiB free on {}, need {} MiB",
                free,
                self.path.display(),
                self.min_free_mb
            )),
            Err(e) => CheckResult::Fail(format!("statvfs {}: {e}", self.path.display())),
        }
    }
}

fn free_megabytes(path: &Path) -> nix::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    #[allow(clippy::unnecessary_cast)]
    let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok(bytes / (1024 * 1024))
}

/// TCP reachability of `host:port`.
pub struct NetworkCheck {
    pub target: String,
    pub timeout: Duration,
}

#[async_trait]
impl PreflightCheck for NetworkCheck {
    fn name(&self) -> &str {
        "network"
    }

    async fn evaluate(&self) -> CheckResult {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => CheckResult::Pass,
            Ok(Err(e)) => CheckResult::Fail(format!("{} unreachable: {e}", self.target)),
            Err(_) => CheckResult::Fail(format!(
                "{} unreachable: no answer within {}s",
                self.target,
                self.timeout.as_secs()
            )),
        }
    }
}

/// `systemctl is-active --quiet <unit>`.
pub struct ServiceActiveCheck {
    name: String,
    unit: String,
    runner: Arc<dyn CommandRunner>,
}

impl ServiceActiveCheck {
    pub fn new(unit: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        let unit = unit.into();
        Self {
            name: format!("service:{unit}"),
            unit,
            runner,
        }
    }
}

#[async_trait]
impl PreflightCheck for ServiceActiveCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self) -> CheckResult {
        let spec = CommandSpec::new("systemctl").args(["is-active", "--quiet", &self.unit]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => CheckResult::Pass,
            Ok(_) => CheckResult::Fail(format!("{} is not active", self.unit)),
            Err(e) => CheckResult::Fail(e.reason),
        }
    }
}

/// The program must resolve through `PATH`.
pub struct CommandAvailableCheck {
    name: String,
    program: String,
}

impl CommandAvailableCheck {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{program}"),
            program,
        }
    }
}

#[async_trait]
impl PreflightCheck for CommandAvailableCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self) -> CheckResult {
        let path = std::env::var_os("PATH").unwrap_or_default();
        if find_in_path(&self.program, &path).is_some() {
            CheckResult::Pass
        } else {
            CheckResult::Fail(format!("{} not found in PATH", self.program))
        }
    }
}

fn find_in_path(program: &str, path: &std::ffi::OsStr) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    std::env::split_paths(path)
        .map(|dir| dir.join(program))
        .find(|candidate| {
            candidate
                .metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
}

/// Checks guarding each built-in job, cheapest first.
pub fn default_checks(
    kind: JobKind,
    config: &UpkeepConfig,
    runner: Arc<dyn CommandRunner>,
) -> Vec<Box<dyn PreflightCheck>> {
    let disk = || -> Box<dyn PreflightCheck> {
        Box::new(DiskSpaceCheck {
            path: config.preflight.disk_path.clone(),
            min_free_mb: config.preflight.min_free_mb,
        })
    };
    let timeout = config.preflight.probe_timeout();

    match kind {
        JobKind::Update => vec![
            disk(),
            Box::new(CommandAvailableCheck::new("apt-get")),
            Box::new(NetworkCheck {
                target: config.update.mirror_probe.clone(),
                timeout,
            }),
        ],
        // Running out of disk is the reason to clean up, so no disk check.
        JobKind::Cleanup => vec![Box::new(CommandAvailableCheck::new("journalctl"))],
        JobKind::Certs => {
            let mut checks: Vec<Box<dyn PreflightCheck>> = vec![
                disk(),
                Box::new(CommandAvailableCheck::new("openssl")),
                Box::new(CommandAvailableCheck::new("certbot")),
                Box::new(NetworkCheck {
                    target: config.certs.acme_probe.clone(),
                    timeout,
                }),
            ];
            for service in &config.certs.reload_services {
                checks.push(Box::new(ServiceActiveCheck::new(
                    service.clone(),
                    runner.clone(),
                )));
            }
            checks
        }
    }
}
