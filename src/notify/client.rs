use std::time::Duration;

use reqwest::Client;

use super::Notifier;
use super::error::NotifyError;
use super::types::{Notification, SendMessageRequest, TelegramResponse};
use crate::config::TelegramConfig;
use crate::job::Severity;

pub const API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: Client,
    base_url: String,
    host: String,
}

impl TelegramNotifier {
    /// Create a notifier pointing at a custom API base (useful for testing).
    pub fn with_base_url(
        token: String,
        chat_id: String,
        base_url: String,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            token,
            chat_id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            host: local_hostname(),
        })
    }

    /// `None` when the bot token or chat id is missing, which disables
    /// notification without error.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, NotifyError> {
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            return Ok(None);
        }
        Self::with_base_url(
            config.bot_token.clone(),
            config.chat_id.clone(),
            config.api_base.clone(),
        )
        .map(Some)
    }

    #[cfg(test)]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let req = SendMessageRequest {
            chat_id: self.chat_id.clone(),
            text: notification.render(&self.host),
            disable_notification: notification.severity < Severity::Warning,
        };

        let response = self.client.post(self.endpoint()).json(&req).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TelegramResponse>(&body)
                .ok()
                .and_then(|r| r.description)
                .unwrap_or(body);
            return Err(NotifyError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<TelegramResponse>().await?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn notifier_for(server: &MockServer) -> TelegramNotifier {
        TelegramNotifier::with_base_url("123:abc".into(), "-10042".into(), server.uri())
            .unwrap()
            .with_host("web-1")
    }

    #[tokio::test]
    async fn sends_message_to_bot_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-10042",
                "text": "❌ [web-1] system-update failed: disk full",
                "disable_notification": false,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"message_id": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server).await;
        notifier
            .notify(&Notification::new(
                Severity::Error,
                "system-update failed: disk full",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn info_messages_are_silent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"disable_notification": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server).await;
        notifier
            .notify(&Notification::new(Severity::Info, "all good"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn http_error_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let notifier = notifier_for(&server).await;
        let err = notifier
            .notify(&Notification::new(Severity::Error, "x"))
            .await
            .unwrap_err();
        match err {
            NotifyError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ok_false_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let notifier = notifier_for(&server).await;
        let err = notifier
            .notify(&Notification::new(Severity::Info, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(ref d) if d == "Bad Request: chat not found"));
    }

    #[tokio::test]
    async fn network_error_hides_bot_token() {
        // Bind then drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let notifier =
            TelegramNotifier::with_base_url("123456:SECRET-TOKEN".into(), "-100".into(), base)
                .unwrap();
        let err = notifier
            .notify(&Notification::new(Severity::Error, "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::NetworkError(_)));
        let text = format!("{err} {err:?}");
        assert!(!text.contains("SECRET-TOKEN"), "token leaked: {text}");
    }

    #[test]
    fn missing_credentials_disable_notifier() {
        let config = TelegramConfig {
            bot_token: String::new(),
            chat_id: "-100".into(),
            ..TelegramConfig::default()
        };
        assert!(TelegramNotifier::from_config(&config).unwrap().is_none());

        let config = TelegramConfig {
            bot_token: "t".into(),
            chat_id: "c".into(),
            ..TelegramConfig::default()
        };
        assert!(TelegramNotifier::from_config(&config).unwrap().is_some());
    }

    #[tokio::test]
    async fn absent_notifier_is_a_no_op() {
        let none: Option<TelegramNotifier> = None;
        none.notify(&Notification::new(Severity::Error, "x"))
            .await
            .unwrap();
    }
}
