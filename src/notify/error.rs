//! Tipos de erro para o envio de notificações ao Telegram.
//!
//! Nenhuma destas falhas interrompe um job: o runner apenas registra o erro
//! em nível `debug` e segue adiante.

use thiserror::Error;

/// Erros que podem ocorrer ao entregar uma notificação.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A API respondeu com status HTTP de erro (ex.: 401 token inválido).
    #[error("Telegram API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A API respondeu 200 mas com `"ok": false`.
    #[error("Telegram rejected message: {0}")]
    Rejected(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[source] reqwest::Error),
}

/// A URL do endpoint contém o token do bot, então ela é removida antes que o
/// erro possa chegar a qualquer log.
impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::NetworkError(err.without_url())
    }
}
