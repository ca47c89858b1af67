mod actions;
mod cli;
mod config;
mod error;
mod job;
mod lock;
mod log_sink;
mod notify;
mod preflight;
mod runner;
mod signal;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use actions::{CommandRunner, MaintenanceAction, SystemCommandRunner};
use cli::{Cli, Command};
use config::UpkeepConfig;
use error::{EXIT_CONFIG, EXIT_DID_NOT_RUN, EXIT_OK};
use job::{JobCategory, JobKind, Severity};
use lock::LockStore;
use log_sink::LogSink;
use notify::TelegramNotifier;
use preflight::default_checks;
use runner::{JobRunner, RunOptions};
use signal::Interrupt;
use ui::JobProgress;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match UpkeepConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("upkeep: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let override_category = match cli.category.as_deref().map(JobCategory::new).transpose() {
        Ok(category) => category,
        Err(e) => {
            eprintln!("upkeep: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let locks = LockStore::new(&config.paths.lock_dir);
    let Some(kind) = cli.command.job_kind() else {
        return ExitCode::from(status(&locks, override_category.as_ref()));
    };
    let category = override_category.unwrap_or_else(|| kind.default_category());

    ExitCode::from(run_job(&cli, &config, locks, kind, category).await)
}

async fn run_job(
    cli: &Cli,
    config: &UpkeepConfig,
    locks: LockStore,
    kind: JobKind,
    category: JobCategory,
) -> u8 {
    let log = if config.paths.log_file.as_os_str().is_empty() {
        LogSink::tracing_only()
    } else {
        LogSink::new(&config.paths.log_file)
    }
    .with_min_severity(if cli.verbose {
        Severity::Debug
    } else {
        Severity::Info
    });
    if let Some(path) = log.path() {
        tracing::debug!(log_file = %path.display(), "maintenance log");
    }

    let notifier = match TelegramNotifier::from_config(&config.telegram) {
        Ok(notifier) => notifier,
        Err(e) => {
            tracing::warn!(error = %e, "Telegram notifications disabled");
            None
        }
    };

    let interrupt = Interrupt::new();
    if let Err(e) = interrupt.listen_for_signals() {
        tracing::warn!(error = %e, "could not install signal handlers");
    }

    let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let checks = default_checks(kind, config, commands.clone());
    let action = MaintenanceAction::for_kind(kind, config, commands);
    let options = RunOptions {
        dry_run: cli.dry_run,
        require_elevated_privilege: config.runner.require_elevated_privilege
            && !cli.allow_unprivileged,
        stale_lock_grace: config.runner.stale_lock_grace(),
    };

    let runner = JobRunner::new(locks, log, notifier).with_interrupt(interrupt);
    let progress = JobProgress::start(&category, cli.dry_run);
    let result = runner.run(&category, &checks, &action, &options).await;
    match &result {
        Ok(outcome) => progress.complete(outcome),
        Err(e) => progress.abort(e),
    }
    runner::exit_code(&result)
}

fn status(locks: &LockStore, extra: Option<&JobCategory>) -> u8 {
    let mut categories: Vec<JobCategory> =
        JobKind::ALL.iter().map(|kind| kind.default_category()).collect();
    if let Some(extra) = extra {
        if !categories.contains(extra) {
            categories.push(extra.clone());
        }
    }

    let mut code = EXIT_OK;
    for category in &categories {
        match locks.inspect(category) {
            Ok(state) => ui::print_lock_state(category, &state),
            Err(e) => {
                eprintln!("  {category}: {e}");
                code = EXIT_DID_NOT_RUN;
            }
        }
    }
    code
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "upkeep=debug" } else { "upkeep=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
