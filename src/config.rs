//! Configuração do upkeep carregada a partir de `upkeep.toml`.
//!
//! A struct [`UpkeepConfig`] agrupa as seções `[paths]`, `[runner]`,
//! `[telegram]`, `[preflight]`, `[update]`, `[cleanup]` e `[certs]`.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis `UPKEEP_TELEGRAM_BOT_TOKEN` e `UPKEEP_TELEGRAM_CHAT_ID`
//! têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::UpkeepError;
use crate::notify::client::API_URL;

/// Caminho global usado quando não há `upkeep.toml` no diretório atual.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/upkeep/upkeep.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpkeepConfig {
    pub paths: PathsConfig,
    pub runner: RunnerConfig,
    pub telegram: TelegramConfig,
    pub preflight: PreflightConfig,
    pub update: UpdateConfig,
    pub cleanup: CleanupConfig,
    pub certs: CertsConfig,
}

/// Diretórios de trabalho: locks, snapshots/relatórios e o log de manutenção.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub lock_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("/run/lock/upkeep"),
            state_dir: PathBuf::from("/var/lib/upkeep"),
            log_file: PathBuf::from("/var/log/upkeep.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Segundos durante os quais um lock de processo morto ainda bloqueia.
    pub stale_lock_grace_secs: u64,
    /// Exige root para jobs que alteram o sistema.
    pub require_elevated_privilege: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stale_lock_grace_secs: 0,
            require_elevated_privilege: true,
        }
    }
}

impl RunnerConfig {
    pub fn stale_lock_grace(&self) -> Duration {
        Duration::from_secs(self.stale_lock_grace_secs)
    }
}

/// Credenciais do bot. Token ou chat vazios desativam as notificações.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    pub disk_path: PathBuf,
    pub min_free_mb: u64,
    pub probe_timeout_secs: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            disk_path: PathBuf::from("/"),
            min_free_mb: 1024,
            probe_timeout_secs: 5,
        }
    }
}

impl PreflightConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Usa `dist-upgrade` em vez de `upgrade`.
    pub full_upgrade: bool,
    pub autoremove: bool,
    /// `host:porta` do espelho apt usado na verificação de rede.
    pub mirror_probe: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            full_upgrade: false,
            autoremove: true,
            mirror_probe: "deb.debian.org:80".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub log_dir: PathBuf,
    pub retention_days: u32,
    /// Tamanho máximo do journal no formato do `journalctl` (ex.: `500M`).
    pub journal_max_size: String,
    pub docker_containers_dir: PathBuf,
    pub docker_log_max_mb: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log"),
            retention_days: 14,
            journal_max_size: "500M".to_string(),
            docker_containers_dir: PathBuf::from("/var/lib/docker/containers"),
            docker_log_max_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertsConfig {
    /// Padrão glob dos certificados inspecionados.
    pub live_glob: String,
    pub renew_before_days: i64,
    /// Serviços recarregados após uma renovação.
    pub reload_services: Vec<String>,
    pub acme_probe: String,
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            live_glob: "/etc/letsencrypt/live/*/cert.pem".to_string(),
            renew_before_days: 30,
            reload_services: vec!["nginx".to_string()],
            acme_probe: "acme-v02.api.letsencrypt.org:443".to_string(),
        }
    }
}

impl UpkeepConfig {
    /// Carrega a configuração de `explicit`, ou de `upkeep.toml` no diretório
    /// atual, ou de [`SYSTEM_CONFIG_PATH`]. Usa valores padrão se nenhum
    /// arquivo existir. Um caminho explícito inexistente é erro.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => [Path::new("upkeep.toml"), Path::new(SYSTEM_CONFIG_PATH)]
                .into_iter()
                .find(|p| p.exists())
                .map(Path::to_path_buf),
        };

        let config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str::<UpkeepConfig>(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => Self::default(),
        };

        let config = config.with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejeita valores que deixariam um job sem sentido.
    fn validate(&self) -> Result<(), UpkeepError> {
        if self.cleanup.retention_days == 0 {
            return Err(UpkeepError::Config(
                "cleanup.retention_days must be at least 1".into(),
            ));
        }
        if self.certs.renew_before_days < 0 {
            return Err(UpkeepError::Config(
                "certs.renew_before_days must not be negative".into(),
            ));
        }
        if self.cleanup.journal_max_size.trim().is_empty() {
            return Err(UpkeepError::Config(
                "cleanup.journal_max_size must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo para as
    /// credenciais do Telegram.
    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup("UPKEEP_TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = lookup("UPKEEP_TELEGRAM_CHAT_ID").filter(|v| !v.is_empty()) {
            self.telegram.chat_id = chat;
        }
        self
    }
}
