//! Interface de linha de comando do upkeep baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (update, cleanup,
//! certs, status) e flags globais (--config, --dry-run, --category,
//! --allow-unprivileged, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::job::JobKind;

/// upkeep — executor de jobs de manutenção com lock e verificações prévias.
#[derive(Debug, Parser)]
#[command(name = "upkeep", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Apenas simula: descreve o que seria feito sem alterar o sistema.
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// Categoria de lock a usar no lugar da padrão do job.
    #[arg(long, global = true)]
    pub category: Option<String>,

    /// Dispensa a verificação de privilégio elevado.
    #[arg(long, global = true, default_value_t = false)]
    pub allow_unprivileged: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Atualiza o índice de pacotes e aplica as atualizações pendentes.
    Update,

    /// Limpa o journal, logs rotacionados e logs de containers.
    Cleanup,

    /// Renova certificados perto do vencimento e recarrega os serviços.
    Certs,

    /// Mostra o estado dos locks de cada job.
    Status,
}

impl Command {
    /// Job correspondente ao subcomando; `None` para `status`.
    pub fn job_kind(self) -> Option<JobKind> {
        match self {
            Command::Update => Some(JobKind::Update),
            Command::Cleanup => Some(JobKind::Cleanup),
            Command::Certs => Some(JobKind::Certs),
            Command::Status => None,
        }
    }
}
