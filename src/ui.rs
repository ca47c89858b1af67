//! Interface de terminal do upkeep — spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto um job roda e `console` para as
//! cores. Toda a saída aqui é para humanos; o registro durável fica no
//! [`LogSink`](crate::log_sink::LogSink).

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::RunError;
use crate::job::{JobCategory, JobOutcome, OutcomeStatus};
use crate::lock::LockState;

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner durante a execução e, ao final, o resultado em verde
/// (sucesso), amarelo (nada a fazer) ou vermelho (falha).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner para a categoria dada.
    pub fn start(category: &JobCategory, dry_run: bool) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        let mode = if dry_run { " (dry run)" } else { "" };
        pb.set_message(format!("{category}{mode}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e mostra o resultado do job.
    pub fn complete(&self, outcome: &JobOutcome) {
        self.pb.finish_and_clear();
        let (mark, style) = match outcome.status {
            OutcomeStatus::Success => ("✓", &self.green),
            OutcomeStatus::SkippedNoWork => ("–", &self.yellow),
            OutcomeStatus::Failed => ("✗", &self.red),
        };
        let mut lines = outcome.report().lines().map(str::to_string).collect::<Vec<_>>();
        if lines.is_empty() {
            lines.push(String::new());
        }
        println!("  {} {}", style.apply_to(mark), lines[0]);
        for line in &lines[1..] {
            println!("    {line}");
        }
    }

    /// Finaliza o spinner quando o job nem chegou a rodar.
    pub fn abort(&self, error: &RunError) {
        self.pb.finish_and_clear();
        let style = match error {
            RunError::AlreadyRunning { .. } => &self.yellow,
            _ => &self.red,
        };
        eprintln!("  {} {error}", style.apply_to("✗"));
    }
}

/// Imprime o estado do lock de uma categoria (subcomando `status`).
pub fn print_lock_state(category: &JobCategory, state: &LockState) {
    let text = match state {
        LockState::Free => Style::new().green().apply_to("idle".to_string()),
        LockState::Held(handle) => Style::new().yellow().bold().apply_to(format!(
            "running (pid {}, since {})",
            handle.holder_pid,
            handle.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        LockState::Stale(handle) => Style::new().red().apply_to(format!(
            "stale lock from pid {} (taken over on next run)",
            handle.holder_pid
        )),
        LockState::Unreadable => Style::new().red().apply_to("unreadable lock file".to_string()),
    };
    println!("  {category:<16} {text}");
}
