use std::time::Duration;

use crate::actions::Action;
use crate::error::RunError;
use crate::job::{JobCategory, JobOutcome, OutcomeStatus, RunContext, RunState, Severity};
use crate::lock::{AcquireError, LockStore};
use crate::log_sink::LogSink;
use crate::notify::{Notification, Notifier};
use crate::preflight::{CheckResult, PreflightCheck, PrivilegeCheck};
use crate::signal::Interrupt;

/// Per-invocation switches for [`JobRunner::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Simulate only; `execute` is never called.
    pub dry_run: bool,
    /// Evaluate the privilege check before any other (skipped for dry runs).
    pub require_elevated_privilege: bool,
    /// How long a lock left by a dead process keeps blocking.
    pub stale_lock_grace: Duration,
}

/// Drives one maintenance job through lock, preflight, execution and
/// notification. Never runs the same category twice concurrently and always
/// releases the lock it took.
pub struct JobRunner<N> {
    locks: LockStore,
    log: LogSink,
    notifier: N,
    interrupt: Interrupt,
    privilege_check: Box<dyn PreflightCheck>,
}

impl<N: Notifier> JobRunner<N> {
    pub fn new(locks: LockStore, log: LogSink, notifier: N) -> Self {
        Self {
            locks,
            log,
            notifier,
            interrupt: Interrupt::new(),
            privilege_check: Box::new(PrivilegeCheck),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_privilege_check(mut self, check: Box<dyn PreflightCheck>) -> Self {
        self.privilege_check = check;
        self
    }

    /// Runs `action` under the lock for `category`.
    ///
    /// `Err` means the job did not run (lock held, lock storage unusable,
    /// preflight failed, interrupted before execution). Everything after
    /// preflight, including a failing action, comes back as `Ok(JobOutcome)`.
    /// `execute` is attempted at most once.
    pub async fn run<A: Action>(
        &self,
        category: &JobCategory,
        checks: &[Box<dyn PreflightCheck>],
        action: &A,
        options: &RunOptions,
    ) -> Result<JobOutcome, RunError> {
        let mut ctx = RunContext::new(category.clone());

        let guard = match self.locks.acquire(category, options.stale_lock_grace) {
            Ok(guard) => guard,
            Err(AcquireError::Held(holder)) => {
                self.log.warn(format!(
                    "{category}: already running (pid {}, since {})",
                    holder.holder_pid,
                    holder.acquired_at.to_rfc3339()
                ));
                return Err(RunError::AlreadyRunning {
                    category: category.to_string(),
                    holder_pid: holder.holder_pid,
                });
            }
            Err(AcquireError::Io(e)) => {
                self.log.error(format!("{category}: cannot take lock: {e}"));
                return Err(e.into());
            }
        };
        self.advance(&mut ctx, RunState::LockAcquired);
        self.log.info(format!(
            "{category}: lock acquired at {} (run {}, pid {})",
            guard.path().display(),
            ctx.run_id,
            guard.handle().holder_pid
        ));

        let result = self.run_locked(&mut ctx, checks, action, options).await;

        if !ctx.state.is_terminal() {
            self.log
                .warn(format!("{category}: run stopped in {}", ctx.state));
        }
        self.advance(&mut ctx, RunState::LockReleased);
        match guard.release() {
            Ok(()) => self.log.info(format!("{category}: lock released")),
            Err(e) => self
                .log
                .error(format!("{category}: failed to release lock: {e}")),
        }
        self.log.debug(format!(
            "{category}: run {} took {}ms: {}",
            ctx.run_id,
            ctx.elapsed_ms(),
            ctx.transitions()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        ));

        result
    }

    async fn run_locked<A: Action>(
        &self,
        ctx: &mut RunContext,
        checks: &[Box<dyn PreflightCheck>],
        action: &A,
        options: &RunOptions,
    ) -> Result<JobOutcome, RunError> {
        let category = ctx.category.clone();
        self.advance(ctx, RunState::PreflightRunning);

        let privilege = (options.require_elevated_privilege && !options.dry_run)
            .then_some(self.privilege_check.as_ref());
        for check in privilege.into_iter().chain(checks.iter().map(|c| &**c)) {
            let result = tokio::select! {
                result = check.evaluate() => result,
                _ = self.interrupt.triggered() => {
                    return Err(RunError::Interrupted { phase: "preflight" });
                }
            };
            match result {
                CheckResult::Pass => {
                    self.log
                        .info(format!("{category}: check {} passed", check.name()));
                }
                CheckResult::Fail(reason) => {
                    self.advance(ctx, RunState::PreflightFailed);
                    let message = format!(
                        "{category}: preflight check '{}' failed: {reason}",
                        check.name()
                    );
                    self.log.error(&message);
                    self.send(Severity::Error, message).await;
                    return Err(RunError::PreflightFailed {
                        check: check.name().to_string(),
                        reason,
                    });
                }
            }
        }
        self.advance(ctx, RunState::PreflightPassed);

        if options.dry_run {
            let simulated = tokio::select! {
                simulated = action.simulate() => simulated,
                _ = self.interrupt.triggered() => {
                    return Err(RunError::Interrupted { phase: "dry run" });
                }
            };
            let outcome = match simulated {
                Ok(description) => JobOutcome::success(description),
                Err(e) => JobOutcome::failed(format!("simulation failed: {}", e.reason))
                    .with_artifacts(e.artifacts),
            };
            self.advance(ctx, RunState::DryRunReturned);
            let severity = if outcome.is_failed() {
                Severity::Error
            } else {
                Severity::Info
            };
            self.log
                .log(severity, format!("{category}: dry run: {}", outcome.summary));
            return Ok(outcome);
        }

        self.advance(ctx, RunState::Executing);
        self.log
            .info(format!("{category}: executing {}", action.name()));
        let outcome = tokio::select! {
            result = action.execute() => match result {
                Ok(outcome) => outcome,
                Err(e) => JobOutcome::failed(e.reason).with_artifacts(e.artifacts),
            },
            _ = self.interrupt.triggered() => JobOutcome::failed(
                "interrupted by signal during execution; partial state left for the backend to reconcile",
            ),
        };
        let next = if outcome.is_failed() {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        self.advance(ctx, next);
        self.handle_outcome(&category, &outcome).await;
        Ok(outcome)
    }

    async fn handle_outcome(&self, category: &JobCategory, outcome: &JobOutcome) {
        match outcome.status {
            OutcomeStatus::SkippedNoWork => {
                self.log
                    .info(format!("{category}: nothing to do: {}", outcome.summary));
            }
            OutcomeStatus::Success => {
                let message = format!("{category}: {}", outcome.report());
                self.log.info(&message);
                self.send(Severity::Info, message).await;
            }
            OutcomeStatus::Failed => {
                let message = format!("{category} failed: {}", outcome.report());
                self.log.error(&message);
                self.send(Severity::Error, message).await;
            }
        }
    }

    /// Delivery problems are recorded and otherwise ignored.
    async fn send(&self, severity: Severity, message: String) {
        let notification = Notification::new(severity, message);
        if let Err(e) = self.notifier.notify(&notification).await {
            self.log
                .debug(format!("notification delivery failed: {e}"));
        }
    }

    fn advance(&self, ctx: &mut RunContext, next: RunState) {
        self.log
            .debug(format!("{}: {} -> {next}", ctx.category, ctx.state));
        ctx.advance(next);
    }
}

/// Process exit status for a finished [`JobRunner::run`].
pub fn exit_code(result: &Result<JobOutcome, RunError>) -> u8 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{ActionError, EXIT_DID_NOT_RUN, EXIT_FAILED, EXIT_OK};
    use crate::lock::LockHandle;
    use crate::notify::NotifyError;

    const DEAD_PID: u32 = 2_000_000_000;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                return Err(NotifyError::Rejected("chat not found".into()));
            }
            Ok(())
        }
    }

    struct FakeCheck {
        name: &'static str,
        result: CheckResult,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl PreflightCheck for FakeCheck {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(&self) -> CheckResult {
            self.log.lock().unwrap().push(self.name);
            self.result.clone()
        }
    }

    struct HangingCheck;

    #[async_trait]
    impl PreflightCheck for HangingCheck {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn evaluate(&self) -> CheckResult {
            std::future::pending().await
        }
    }

    fn check(
        name: &'static str,
        result: CheckResult,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn PreflightCheck> {
        Box::new(FakeCheck {
            name,
            result,
            log: log.clone(),
        })
    }

    enum Behavior {
        Return(Result<JobOutcome, ActionError>),
        Gate { started: Arc<Notify>, proceed: Arc<Notify> },
        Hang,
    }

    struct FakeAction {
        simulation: String,
        behavior: Behavior,
        executed: AtomicUsize,
    }

    impl FakeAction {
        fn new(simulation: &str, behavior: Behavior) -> Self {
            Self {
                simulation: simulation.to_string(),
                behavior,
                executed: AtomicUsize::new(0),
            }
        }

        fn succeeding(summary: &str) -> Self {
            Self::new("would do it", Behavior::Return(Ok(JobOutcome::success(summary))))
        }

        fn executions(&self) -> usize {
            self.executed.load(Ordering::SeqCst)
        }
    }

    impl Action for FakeAction {
        fn name(&self) -> &str {
            "fake"
        }

        async fn simulate(&self) -> Result<String, ActionError> {
            Ok(self.simulation.clone())
        }

        async fn execute(&self) -> Result<JobOutcome, ActionError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Return(result) => result.clone(),
                Behavior::Gate { started, proceed } => {
                    started.notify_one();
                    proceed.notified().await;
                    Ok(JobOutcome::success("finished after gate"))
                }
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        notifier: RecordingNotifier,
        runner: JobRunner<RecordingNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_notifier(RecordingNotifier::default())
        }

        fn with_notifier(notifier: RecordingNotifier) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let runner = JobRunner::new(
                LockStore::new(dir.path().join("locks")),
                LogSink::new(dir.path().join("upkeep.log")),
                notifier.clone(),
            );
            Self {
                dir,
                notifier,
                runner,
            }
        }

        fn lock_path(&self, category: &JobCategory) -> std::path::PathBuf {
            LockStore::new(self.dir.path().join("locks")).path_for(category)
        }

        fn log_contents(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("upkeep.log")).unwrap_or_default()
        }
    }

    fn category(name: &str) -> JobCategory {
        JobCategory::new(name).unwrap()
    }

    #[tokio::test]
    async fn concurrent_runs_exclude_each_other() {
        let h = Harness::new();
        let cat = category("system-update");
        let started = Arc::new(Notify::new());
        let proceed = Arc::new(Notify::new());
        let slow = FakeAction::new(
            "",
            Behavior::Gate {
                started: started.clone(),
                proceed: proceed.clone(),
            },
        );
        let quick = FakeAction::succeeding("quick");
        let options = RunOptions::default();

        let first = h.runner.run(&cat, &[], &slow, &options);
        let second = async {
            started.notified().await;
            let result = h.runner.run(&cat, &[], &quick, &options).await;
            proceed.notify_one();
            result
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().summary, "finished after gate");
        match second {
            Err(RunError::AlreadyRunning { holder_pid, .. }) => {
                assert_eq!(holder_pid, std::process::id());
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        assert_eq!(quick.executions(), 0);
        assert!(!h.lock_path(&cat).exists());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let h = Harness::new();
        let cat = category("cert-renewal");
        let path = h.lock_path(&cat);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let stale = LockHandle {
            holder_pid: DEAD_PID,
            acquired_at: chrono::Utc::now() - chrono::Duration::hours(6),
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let action = FakeAction::succeeding("renewed");
        let outcome = h
            .runner
            .run(&cat, &[], &action, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(action.executions(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn preflight_stops_at_first_failure() {
        let h = Harness::new();
        let cat = category("system-update");
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let checks = vec![
            check("A", CheckResult::Pass, &evaluated),
            check("B", CheckResult::Fail("mirror unreachable".into()), &evaluated),
            check("C", CheckResult::Pass, &evaluated),
        ];
        let action = FakeAction::succeeding("unused");

        let result = h
            .runner
            .run(&cat, &checks, &action, &RunOptions::default())
            .await;

        match result {
            Err(RunError::PreflightFailed { check, reason }) => {
                assert_eq!(check, "B");
                assert_eq!(reason, "mirror unreachable");
            }
            other => panic!("expected PreflightFailed, got {other:?}"),
        }
        assert_eq!(*evaluated.lock().unwrap(), vec!["A", "B"]);
        assert_eq!(action.executions(), 0);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Error);
        assert!(sent[0].message.contains("mirror unreachable"));
        assert!(!h.lock_path(&cat).exists());
    }

    #[tokio::test]
    async fn dry_run_never_executes() {
        let h = Harness::new();
        let cat = category("log-cleanup");
        let action = FakeAction::succeeding("mutated");

        let outcome = h
            .runner
            .run(
                &cat,
                &[],
                &action,
                &RunOptions {
                    dry_run: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::success("would do it"));
        assert_eq!(action.executions(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn nightly_update_dry_run_scenario() {
        let h = Harness::new();
        let cat = category("nightly-update");
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let checks = vec![
            check("diskSpace", CheckResult::Pass, &evaluated),
            check("network", CheckResult::Pass, &evaluated),
        ];
        let action = FakeAction::new(
            "12 packages to upgrade",
            Behavior::Return(Ok(JobOutcome::success("upgraded 12 packages"))),
        );

        let outcome = h
            .runner
            .run(
                &cat,
                &checks,
                &action,
                &RunOptions {
                    dry_run: true,
                    require_elevated_privilege: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.summary, "12 packages to upgrade");
        assert_eq!(action.executions(), 0);
        assert_eq!(*evaluated.lock().unwrap(), vec!["diskSpace", "network"]);
    }

    #[tokio::test]
    async fn action_error_becomes_failed_outcome() {
        let h = Harness::new();
        let cat = category("system-update");
        let action = FakeAction::new(
            "",
            Behavior::Return(Err(
                ActionError::new("disk full").with_artifact("/var/lib/upkeep/dpkg-selections.txt")
            )),
        );

        let outcome = h
            .runner
            .run(&cat, &[], &action, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.summary.contains("disk full"));
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(exit_code(&Ok(outcome)), EXIT_FAILED);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Error);
        assert!(sent[0].message.contains(
            "state snapshot available at /var/lib/upkeep/dpkg-selections.txt for manual recovery"
        ));
        assert!(h.log_contents().contains("[ERROR] system-update failed: disk full"));
    }

    #[tokio::test]
    async fn success_notifies_info_and_skip_stays_quiet() {
        let h = Harness::new();
        let cat = category("system-update");

        let done = FakeAction::succeeding("upgraded 3 packages");
        h.runner
            .run(&cat, &[], &done, &RunOptions::default())
            .await
            .unwrap();
        let idle = FakeAction::new(
            "",
            Behavior::Return(Ok(JobOutcome::skipped("system is up to date"))),
        );
        let outcome = h
            .runner
            .run(&cat, &[], &idle, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code(), EXIT_OK);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Info);
        assert_eq!(sent[0].message, "system-update: upgraded 3 packages");
    }

    #[tokio::test]
    async fn lock_is_released_on_every_path() {
        let h = Harness::new();
        let cat = category("system-update");
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let failing = vec![check("disk", CheckResult::Fail("full".into()), &evaluated)];
        let ok = FakeAction::succeeding("ok");
        let broken = FakeAction::new("", Behavior::Return(Err(ActionError::new("boom"))));
        let dry = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let real = RunOptions::default();

        assert!(h.runner.run(&cat, &failing, &ok, &real).await.is_err());
        assert!(!h.lock_path(&cat).exists());

        assert!(h.runner.run(&cat, &[], &ok, &dry).await.is_ok());
        assert!(!h.lock_path(&cat).exists());

        assert!(h.runner.run(&cat, &[], &ok, &real).await.is_ok());
        assert!(!h.lock_path(&cat).exists());

        assert!(h.runner.run(&cat, &[], &broken, &real).await.unwrap().is_failed());
        assert!(!h.lock_path(&cat).exists());

        // A fresh run after all of the above still gets the lock.
        assert!(h.runner.run(&cat, &[], &ok, &real).await.is_ok());
    }

    #[tokio::test]
    async fn already_running_leaves_foreign_lock_alone() {
        let h = Harness::new();
        let cat = category("system-update");
        let path = h.lock_path(&cat);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let holder = LockHandle {
            holder_pid: 1,
            acquired_at: chrono::Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&holder).unwrap()).unwrap();

        let action = FakeAction::succeeding("unused");
        let result = h.runner.run(&cat, &[], &action, &RunOptions::default()).await;

        assert!(matches!(result, Err(RunError::AlreadyRunning { holder_pid: 1, .. })));
        assert_eq!(exit_code(&result), EXIT_DID_NOT_RUN);
        assert!(path.exists());
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn notification_failure_does_not_change_outcome() {
        let h = Harness::with_notifier(RecordingNotifier::failing());
        let cat = category("log-cleanup");
        let action = FakeAction::succeeding("freed 1.0 GiB");

        let outcome = h
            .runner
            .run(&cat, &[], &action, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(
            h.log_contents()
                .contains("[DEBUG] notification delivery failed: Telegram rejected message")
        );
        assert!(!h.lock_path(&cat).exists());
    }

    #[tokio::test]
    async fn privilege_check_runs_first_unless_dry_run() {
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let h = Harness::new();
        let runner = h.runner.with_privilege_check(check(
            "elevated-privilege",
            CheckResult::Fail("must run as root (effective uid 1000)".into()),
            &evaluated,
        ));
        let cat = category("system-update");
        let checks = vec![check("disk", CheckResult::Pass, &evaluated)];
        let action = FakeAction::succeeding("ok");
        let mut options = RunOptions {
            require_elevated_privilege: true,
            ..RunOptions::default()
        };

        let result = runner.run(&cat, &checks, &action, &options).await;
        assert!(matches!(
            result,
            Err(RunError::PreflightFailed { ref check, .. }) if check.as_str() == "elevated-privilege"
        ));
        assert_eq!(*evaluated.lock().unwrap(), vec!["elevated-privilege"]);

        options.dry_run = true;
        assert!(runner.run(&cat, &checks, &action, &options).await.is_ok());
        assert_eq!(
            *evaluated.lock().unwrap(),
            vec!["elevated-privilege", "disk"]
        );
    }

    #[tokio::test]
    async fn interrupt_during_execution_fails_and_releases() {
        let h = Harness::new();
        let interrupt = Interrupt::new();
        let runner = h.runner.with_interrupt(interrupt.clone());
        let cat = category("system-update");
        let action = FakeAction::new("", Behavior::Hang);

        interrupt.trigger();
        let outcome = runner
            .run(&cat, &[], &action, &RunOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_failed());
        assert!(outcome.summary.starts_with("interrupted by signal"));
        let lock = LockStore::new(h.dir.path().join("locks")).path_for(&cat);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn interrupt_during_preflight_is_did_not_run() {
        let h = Harness::new();
        let interrupt = Interrupt::new();
        let runner = h.runner.with_interrupt(interrupt.clone());
        let cat = category("system-update");
        let checks: Vec<Box<dyn PreflightCheck>> = vec![Box::new(HangingCheck)];
        let action = FakeAction::succeeding("unused");

        interrupt.trigger();
        let result = runner.run(&cat, &checks, &action, &RunOptions::default()).await;

        assert!(matches!(result, Err(RunError::Interrupted { phase: "preflight" })));
        assert_eq!(action.executions(), 0);
        let lock = LockStore::new(h.dir.path().join("locks")).path_for(&cat);
        assert!(!lock.exists());
    }

    struct SlowSimulation;

    impl Action for SlowSimulation {
        fn name(&self) -> &str {
            "slow-simulation"
        }

        async fn simulate(&self) -> Result<String, ActionError> {
            std::future::pending().await
        }

        async fn execute(&self) -> Result<JobOutcome, ActionError> {
            panic!("dry run must not execute");
        }
    }

    #[tokio::test]
    async fn interrupt_during_dry_run_is_did_not_run() {
        let h = Harness::new();
        let interrupt = Interrupt::new();
        let runner = h.runner.with_interrupt(interrupt.clone());
        let cat = category("log-cleanup");
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        interrupt.trigger();
        let result = runner.run(&cat, &[], &SlowSimulation, &options).await;

        assert!(matches!(result, Err(RunError::Interrupted { phase: "dry run" })));
        assert_eq!(exit_code(&result), crate::error::EXIT_INTERRUPTED);
        let lock = LockStore::new(h.dir.path().join("locks")).path_for(&cat);
        assert!(!lock.exists());
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn log_records_each_transition() {
        let h = Harness::new();
        let cat = category("cert-renewal");
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let checks = vec![check("openssl", CheckResult::Pass, &evaluated)];
        let action = FakeAction::succeeding("renewed 1 certificate");

        h.runner
            .run(&cat, &checks, &action, &RunOptions::default())
            .await
            .unwrap();

        let log = h.log_contents();
        let expected = [
            "[INFO] cert-renewal: lock acquired",
            "[INFO] cert-renewal: check openssl passed",
            "[INFO] cert-renewal: executing fake",
            "[INFO] cert-renewal: renewed 1 certificate",
            "[INFO] cert-renewal: lock released",
        ];
        let mut position = 0;
        for needle in expected {
            let found = log[position..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing {needle:?} in log:\n{log}"));
            position += found + needle.len();
        }
        assert!(log.contains("EXECUTING -> SUCCEEDED"));
    }

    struct StealingAction {
        lock_path: std::path::PathBuf,
    }

    impl Action for StealingAction {
        fn name(&self) -> &str {
            "stealing"
        }

        async fn simulate(&self) -> Result<String, ActionError> {
            Ok(String::new())
        }

        async fn execute(&self) -> Result<JobOutcome, ActionError> {
            let intruder = LockHandle {
                holder_pid: 1,
                acquired_at: chrono::Utc::now(),
            };
            std::fs::write(&self.lock_path, serde_json::to_vec(&intruder).unwrap())?;
            Ok(JobOutcome::success("done"))
        }
    }

    #[tokio::test]
    async fn release_failure_is_logged_not_reported() {
        let h = Harness::new();
        let cat = category("system-update");
        let action = StealingAction {
            lock_path: h.lock_path(&cat),
        };

        let outcome = h
            .runner
            .run(&cat, &[], &action, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(
            h.log_contents()
                .contains("[ERROR] system-update: failed to release lock")
        );
    }
}
