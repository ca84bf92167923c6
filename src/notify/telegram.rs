use super::{DeliveryError, Notifier};
use crate::config::TelegramConfig;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    disable_notification: bool,
}

#[derive(Deserialize)]
struct BotApiAck {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages to one chat through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
    parse_mode: String,
    disable_web_page_preview: bool,
    disable_notification: bool,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: String,
        chat_id: String,
        config: &TelegramConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            bot_token,
            chat_id,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            parse_mode: config.parse_mode.clone(),
            disable_web_page_preview: config.disable_web_page_preview,
            disable_notification: config.disable_notification,
            retry,
        })
    }

    /// Send `text`, retrying transport failures per the retry policy.
    pub async fn send_message(&self, text: &str) -> Result<(), DeliveryError> {
        if text.trim().is_empty() {
            return Err(DeliveryError::Empty);
        }
        self.retry
            .run("telegram", || self.send_once(text), DeliveryError::is_transient)
            .await
    }

    async fn send_once(&self, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessageBody {
            chat_id: &self.chat_id,
            text,
            parse_mode: &self.parse_mode,
            disable_web_page_preview: self.disable_web_page_preview,
            disable_notification: self.disable_notification,
        };
        tracing::debug!(chars = text.chars().count(), "sending message to Telegram");

        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // Error bodies carry a JSON description; fall back to the raw text
            let detail = serde_json::from_str::<BotApiAck>(&body)
                .ok()
                .and_then(|ack| ack.description)
                .unwrap_or(body);
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body: detail,
            });
        }

        let ack: BotApiAck = resp.json().await?;
        if !ack.ok {
            let reason = ack.description.unwrap_or_else(|| "unknown".to_string());
            return Err(DeliveryError::Rejected(reason));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&mut self, text: &str) -> bool {
        match self.send_message(text).await {
            Ok(()) => {
                tracing::debug!("message sent to Telegram");
                true
            }
            Err(DeliveryError::Empty) => {
                tracing::warn!("attempted to send empty message");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to send Telegram message");
                false
            }
        }
    }
}
