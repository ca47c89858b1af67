//! Tipos de dados das notificações e do endpoint `sendMessage` do Telegram.

use serde::{Deserialize, Serialize};

use crate::job::Severity;

/// Mensagem a ser entregue aos canais de notificação.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Texto final: ícone de severidade, host e mensagem.
    pub fn render(&self, host: &str) -> String {
        let icon = match self.severity {
            Severity::Debug | Severity::Info => "✅",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
        };
        format!("{icon} [{host}] {}", self.message)
    }
}

/// Corpo da requisição para `POST /bot<token>/sendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Identificador do chat (ou `@canal`) de destino.
    pub chat_id: String,
    /// Texto da mensagem.
    pub text: String,
    /// Entrega silenciosa, usada para mensagens informativas.
    pub disable_notification: bool,
}

/// Envelope de resposta comum a todos os métodos da Bot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramResponse {
    pub ok: bool,
    /// Presente quando `ok` é `false`.
    #[serde(default)]
    pub description: Option<String>,
}
