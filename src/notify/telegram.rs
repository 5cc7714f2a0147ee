//! Telegram Bot API delivery channel.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

use super::{Delivery, DeliveryError};

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 200;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bot\d+:[A-Za-z0-9_-]+").expect("token pattern is valid"));

/// Replace bot tokens in `text` so they never reach the logs.
pub fn redact_token(text: &str) -> String {
    TOKEN_PATTERN.replace_all(text, "bot<redacted>").into_owned()
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts with `sendMessage`.
pub struct TelegramDelivery {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramDelivery {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, TELEGRAM_API.to_string())
    }

    /// Use a different API host, e.g. a local Bot API server.
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.send_url())
            .timeout(SEND_TIMEOUT)
            .json(&SendMessage {
                chat_id: recipient,
                text,
            })
            .send()
            .await
            .map_err(|e| DeliveryError::Http(redact_token(&e.to_string())))?;

        let status = response.status();
        if status.is_success() {
            // Unparseable 2xx bodies count as delivered
            return match response.json::<ApiReply>().await {
                Ok(ApiReply { ok: false, description }) => Err(DeliveryError::Other(
                    description.unwrap_or_else(|| "Bot API returned ok=false".to_string()),
                )),
                _ => Ok(()),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let body = crate::probe::truncate_excerpt(&redact_token(&body), MAX_ERROR_BODY);
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_redact_token() {
        let text = "error sending request for url (https://api.telegram.org/bot123456:AAH-x_yz/sendMessage)";
        let redacted = redact_token(text);
        assert!(!redacted.contains("AAH-x_yz"));
        assert!(redacted.contains("bot<redacted>/sendMessage"));
        assert_eq!(redact_token("nothing secret"), "nothing secret");
    }

    #[tokio::test]
    async fn test_deliver_posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot42:secret/sendMessage"))
            .and(body_json(serde_json::json!({"chat_id": "1001", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let delivery = TelegramDelivery::with_base_url("42:secret".to_string(), server.uri());
        delivery.deliver("1001", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bot was blocked by the user"))
            .mount(&server)
            .await;

        let delivery = TelegramDelivery::with_base_url("42:secret".to_string(), server.uri());
        let err = delivery.deliver("1001", "hello").await.unwrap_err();
        match err {
            DeliveryError::Rejected { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "bot was blocked by the user");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_deliver_ok_false_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "description": "chat not found"})),
            )
            .mount(&server)
            .await;

        let delivery = TelegramDelivery::with_base_url("42:secret".to_string(), server.uri());
        let err = delivery.deliver("1001", "hello").await.unwrap_err();
        assert_eq!(err.to_string(), "chat not found");
    }
}
