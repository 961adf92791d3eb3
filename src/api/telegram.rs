use crate::config::TelegramSettings;
use crate::pipeline::Notifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Status messages through a Telegram bot. Does nothing unless both token and chat id are set.
pub struct TelegramNotifier {
    client: Client,
    settings: TelegramSettings,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(client: Client, settings: TelegramSettings) -> Self {
        Self::with_api_base(client, settings, TELEGRAM_API)
    }

    pub fn with_api_base(
        client: Client,
        settings: TelegramSettings,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            settings,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.settings.bot_token, &self.settings.chat_id) else {
            debug!("telegram not configured; skipping notification");
            return Ok(());
        };
        if !self.settings.is_configured() {
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, token.trim());
        let body = serde_json::json!({
            "chat_id": chat_id.trim(),
            "text": message,
            "disable_web_page_preview": true,
        });

        // The token is part of the URL, keep it out of error messages.
        let resp = self
            .client
            .post(url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|err| err.without_url())
            .context("Telegram request failed")?;

        let status = resp.status();
        let reply: Option<ApiResponse> = resp.json().await.ok();
        match reply {
            Some(reply) if reply.ok => Ok(()),
            Some(reply) => anyhow::bail!(
                "Telegram rejected message (HTTP {}): {}",
                status.as_u16(),
                reply.description.unwrap_or_default()
            ),
            None => anyhow::bail!(
                "Telegram returned HTTP {} without a valid body",
                status.as_u16()
            ),
        }
    }
}
