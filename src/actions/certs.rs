//! TLS certificate renewal through certbot, driven by expiry dates read with
//! openssl.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::command::{CommandRunner, CommandSpec, run_checked};
use super::{Action, plural};
use crate::config::CertsConfig;
use crate::error::ActionError;
use crate::job::JobOutcome;

pub struct CertRenewal {
    runner: Arc<dyn CommandRunner>,
    live_glob: String,
    renew_before_days: i64,
    reload_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CertInfo {
    domain: String,
    path: PathBuf,
    not_after: DateTime<Utc>,
}

impl CertInfo {
    fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    fn describe(&self, now: DateTime<Utc>) -> String {
        let days = self.days_remaining(now);
        if days < 0 {
            format!("{} (expired {} ago)", self.domain, plural(days.unsigned_abs() as usize, "day", "days"))
        } else {
            format!("{} ({})", self.domain, plural(days as usize, "day", "days"))
        }
    }
}

impl CertRenewal {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &CertsConfig) -> Self {
        Self {
            runner,
            live_glob: config.live_glob.clone(),
            renew_before_days: config.renew_before_days,
            reload_services: config.reload_services.clone(),
        }
    }

    fn cert_paths(&self) -> Result<Vec<PathBuf>, ActionError> {
        let paths = glob::glob(&self.live_glob)
            .map_err(|e| ActionError::new(format!("invalid certificate glob {:?}: {e}", self.live_glob)))?;
        let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
        found.sort();
        Ok(found)
    }

    async fn inspect(&self, path: PathBuf) -> Result<CertInfo, ActionError> {
        let spec = CommandSpec::new("openssl").args([
            "x509".to_string(),
            "-enddate".to_string(),
            "-noout".to_string(),
            "-in".to_string(),
            path.display().to_string(),
        ]);
        let output = run_checked(self.runner.as_ref(), &spec).await?;
        let not_after = parse_enddate(&output.stdout).ok_or_else(|| {
            ActionError::new(format!(
                "unexpected openssl output for {}: {}",
                path.display(),
                output.stdout.trim()
            ))
        })?;
        Ok(CertInfo {
            domain: domain_of(&path),
            path,
            not_after,
        })
    }

    async fn inspect_all(&self) -> Result<Vec<CertInfo>, ActionError> {
        let mut certs = Vec::new();
        for path in self.cert_paths()? {
            certs.push(self.inspect(path).await?);
        }
        Ok(certs)
    }

    /// Forces renewal: the expiry window here may be wider than certbot's own.
    async fn renew(&self, cert: &CertInfo) -> Result<CertInfo, ActionError> {
        let spec = CommandSpec::new("certbot").args([
            "renew",
            "--non-interactive",
            "--force-renewal",
            "--cert-name",
            cert.domain.as_str(),
        ]);
        run_checked(self.runner.as_ref(), &spec).await?;
        let fresh = self.inspect(cert.path.clone()).await?;
        let days = fresh.days_remaining(Utc::now());
        if self.is_due(&fresh, Utc::now()) {
            return Err(ActionError::new(format!(
                "certbot finished but the certificate still expires in {days} days"
            )));
        }
        Ok(fresh)
    }

    async fn reload_all(&self) -> Result<(), ActionError> {
        for service in &self.reload_services {
            let spec = CommandSpec::new("systemctl").args(["reload", service.as_str()]);
            run_checked(self.runner.as_ref(), &spec).await?;
        }
        Ok(())
    }

    fn is_due(&self, cert: &CertInfo, now: DateTime<Utc>) -> bool {
        cert.days_remaining(now) <= self.renew_before_days
    }
}

impl Action for CertRenewal {
    fn name(&self) -> &str {
        "cert-renewal"
    }

    async fn simulate(&self) -> Result<String, ActionError> {
        let now = Utc::now();
        let certs = self.inspect_all().await?;
        if certs.is_empty() {
            return Ok(format!("no certificates match {}", self.live_glob));
        }
        let due: Vec<String> = certs
            .iter()
            .filter(|c| self.is_due(c, now))
            .map(|c| c.describe(now))
            .collect();
        let mut text = format!(
            "{} of {} expire within {} days",
            due.len(),
            plural(certs.len(), "certificate", "certificates"),
            self.renew_before_days
        );
        if !due.is_empty() {
            text.push_str(": ");
            text.push_str(&due.join(", "));
        }
        Ok(text)
    }

    async fn execute(&self) -> Result<JobOutcome, ActionError> {
        let now = Utc::now();
        let certs = self.inspect_all().await?;
        if certs.is_empty() {
            return Ok(JobOutcome::skipped(format!(
                "no certificates match {}",
                self.live_glob
            )));
        }
        let due: Vec<CertInfo> = certs
            .iter()
            .filter(|c| self.is_due(c, now))
            .cloned()
            .collect();
        if due.is_empty() {
            return Ok(JobOutcome::skipped(format!(
                "all {} valid for more than {} days",
                plural(certs.len(), "certificate", "certificates"),
                self.renew_before_days
            )));
        }

        let mut renewed = Vec::new();
        let mut failure = None;
        for cert in &due {
            match self.renew(cert).await {
                Ok(fresh) => renewed.push(fresh),
                Err(e) => {
                    failure = Some((cert.domain.clone(), e));
                    break;
                }
            }
        }

        // Certificates renewed before a failure are only served after a
        // reload, and the next run will not see them as due.
        let reloaded = if renewed.is_empty() {
            Ok(())
        } else {
            self.reload_all().await
        };
        if let Some((domain, cause)) = failure {
            let mut err = renewal_error(&domain, cause, &renewed, now);
            match reloaded {
                Ok(()) if !renewed.is_empty() && !self.reload_services.is_empty() => {
                    err.reason
                        .push_str(&format!("; reloaded {}", self.reload_services.join(", ")));
                }
                Ok(()) => {}
                Err(e) => err.reason.push_str(&format!("; {}", e.reason)),
            }
            return Err(err);
        }
        reloaded?;

        let now = Utc::now();
        let mut summary = format!(
            "renewed {}: {}",
            plural(renewed.len(), "certificate", "certificates"),
            renewed
                .iter()
                .map(|c| c.describe(now))
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !self.reload_services.is_empty() {
            summary.push_str(&format!("; reloaded {}", self.reload_services.join(", ")));
        }
        Ok(JobOutcome::success(summary))
    }
}

fn renewal_error(
    domain: &str,
    cause: ActionError,
    renewed: &[CertInfo],
    now: DateTime<Utc>,
) -> ActionError {
    let mut reason = format!("renewing {domain}: {}", cause.reason);
    if !renewed.is_empty() {
        let done: Vec<String> = renewed.iter().map(|c| c.describe(now)).collect();
        reason.push_str(&format!("; already renewed: {}", done.join(", ")));
    }
    ActionError {
        reason,
        artifacts: cause.artifacts,
    }
}

/// Parses `notAfter=Jan  1 00:00:00 2027 GMT` from `openssl x509 -enddate`.
fn parse_enddate(output: &str) -> Option<DateTime<Utc>> {
    let value = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("notAfter="))?;
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %e %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// certbot keeps each lineage in `live/<domain>/`.
fn domain_of(path: &std::path::Path) -> String {
    path.parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
