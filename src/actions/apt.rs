//! Package upgrades through apt, with a dpkg selection snapshot taken before
//! anything is installed.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use super::command::{CommandRunner, CommandSpec, run_checked};
use super::{Action, plural, write_artifact};
use crate::config::UpdateConfig;
use crate::error::ActionError;
use crate::job::JobOutcome;

const REBOOT_REQUIRED_FLAG: &str = "/var/run/reboot-required";
/// Package names listed in a simulation summary before truncating.
const MAX_LISTED: usize = 8;

pub struct PackageUpdate {
    runner: Arc<dyn CommandRunner>,
    state_dir: PathBuf,
    full_upgrade: bool,
    autoremove: bool,
    reboot_flag: PathBuf,
}

impl PackageUpdate {
    pub fn new(runner: Arc<dyn CommandRunner>, state_dir: PathBuf, config: &UpdateConfig) -> Self {
        Self {
            runner,
            state_dir,
            full_upgrade: config.full_upgrade,
            autoremove: config.autoremove,
            reboot_flag: PathBuf::from(REBOOT_REQUIRED_FLAG),
        }
    }

    pub fn with_reboot_flag(mut self, path: impl Into<PathBuf>) -> Self {
        self.reboot_flag = path.into();
        self
    }

    fn upgrade_verb(&self) -> &'static str {
        if self.full_upgrade { "dist-upgrade" } else { "upgrade" }
    }

    async fn pending(&self) -> Result<Vec<String>, ActionError> {
        let spec = CommandSpec::new("apt-get").args(["-s", self.upgrade_verb()]);
        let output = run_checked(self.runner.as_ref(), &spec).await?;
        Ok(pending_packages(&output.stdout))
    }

    fn apt(&self) -> CommandSpec {
        CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
    }
}

impl Action for PackageUpdate {
    fn name(&self) -> &str {
        "package-update"
    }

    async fn simulate(&self) -> Result<String, ActionError> {
        Ok(describe_pending(&self.pending().await?))
    }

    async fn execute(&self) -> Result<JobOutcome, ActionError> {
        run_checked(self.runner.as_ref(), &self.apt().arg("update")).await?;

        let pending = self.pending().await?;
        if pending.is_empty() {
            return Ok(JobOutcome::skipped("system is up to date"));
        }

        let selections = run_checked(
            self.runner.as_ref(),
            &CommandSpec::new("dpkg").arg("--get-selections"),
        )
        .await?;
        let snapshot =
            write_artifact(&self.state_dir, "dpkg-selections", Utc::now(), &selections.stdout)
                .await?;

        let upgrade = self
            .apt()
            .args(["-y", "-o", "Dpkg::Options::=--force-confold", self.upgrade_verb()]);
        run_checked(self.runner.as_ref(), &upgrade)
            .await
            .map_err(|e| e.with_artifact(&snapshot))?;

        if self.autoremove {
            run_checked(self.runner.as_ref(), &self.apt().args(["-y", "autoremove"]))
                .await
                .map_err(|e| e.with_artifact(&snapshot))?;
        }

        let mut summary = format!("upgraded {}", plural(pending.len(), "package", "packages"));
        if self.reboot_flag.exists() {
            summary.push_str("; reboot required");
        }
        Ok(JobOutcome::success(summary).with_artifacts([snapshot]))
    }
}

/// Package names from `apt-get -s` output (`Inst <name> ...` lines).
fn pending_packages(simulation: &str) -> Vec<String> {
    simulation
        .lines()
        .filter_map(|line| line.strip_prefix("Inst "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn describe_pending(packages: &[String]) -> String {
    if packages.is_empty() {
        return "system is up to date".to_string();
    }
    let mut text = format!(
        "{} to upgrade: {}",
        plural(packages.len(), "package", "packages"),
        packages
            .iter()
            .take(MAX_LISTED)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    if packages.len() > MAX_LISTED {
        text.push_str(&format!(" (+{} more)", packages.len() - MAX_LISTED));
    }
    text
}
