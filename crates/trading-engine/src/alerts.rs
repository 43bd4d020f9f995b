//! Alert publishing to Redis and external notifiers.
//!
//! Delivery is fire-and-forget: every transport failure is logged and
//! swallowed so no caller ever aborts on a notification path.

use async_trait::async_trait;
use chrono::Utc;
use options_core::config::AlertsConfig;
use options_core::traits::{AlertLevel, Notifier};
use options_core::Result;
use redis::AsyncCommands;
use tracing::{debug, error, info, warn};

/// Redis channels for pub/sub.
pub mod channels {
    pub const ALERTS: &str = "engine:alerts";
}

/// Publishes engine alerts to Redis and configured webhook services.
pub struct AlertPublisher {
    redis: Option<redis::aio::ConnectionManager>,
    alerts_config: AlertsConfig,
    http_client: reqwest::Client,
}

impl AlertPublisher {
    /// Create a new alert publisher. Without a Redis URL only the webhook
    /// transports are used.
    pub async fn new(redis_url: Option<&str>, alerts_config: AlertsConfig) -> Result<Self> {
        let redis = match redis_url {
            Some(url) => {
                let client = redis::Client::open(url)?;
                Some(redis::aio::ConnectionManager::new(client).await?)
            }
            None => None,
        };
        Ok(Self {
            redis,
            alerts_config,
            http_client: reqwest::Client::new(),
        })
    }

    async fn publish_redis(&self, payload: &str) -> Result<()> {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let _: () = conn.publish(channels::ALERTS, payload).await?;
            debug!("Published alert to Redis");
        }
        Ok(())
    }

    async fn send_telegram(&self, token: &str, chat_id: &str, message: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);

        self.http_client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": message,
            }))
            .send()
            .await?;

        debug!("Sent Telegram alert");
        Ok(())
    }

    async fn send_discord(&self, webhook_url: &str, message: &str) -> Result<()> {
        self.http_client
            .post(webhook_url)
            .json(&serde_json::json!({
                "content": message
            }))
            .send()
            .await?;

        debug!("Sent Discord alert");
        Ok(())
    }
}

#[async_trait]
impl Notifier for AlertPublisher {
    async fn send_alert(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) {
        let payload = serde_json::json!({
            "level": level,
            "title": title,
            "message": message,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let Err(e) = self.publish_redis(&payload.to_string()).await {
            warn!(error = %e, "Failed to publish alert to Redis");
        }

        let text = format!("[{level:?}] {title}: {message}");

        if let (Some(token), Some(chat_id)) = (
            &self.alerts_config.telegram_bot_token,
            &self.alerts_config.telegram_chat_id,
        ) {
            if let Err(e) = self.send_telegram(token, chat_id, &text).await {
                warn!(error = %e, "Failed to send Telegram alert");
            }
        }

        if let Some(webhook_url) = &self.alerts_config.discord_webhook_url {
            if let Err(e) = self.send_discord(webhook_url, &text).await {
                warn!(error = %e, "Failed to send Discord alert");
            }
        }
    }
}

/// Notifier that only logs; used in tests and paper mode without Redis.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
        _data: Option<serde_json::Value>,
    ) {
        match level {
            AlertLevel::Info => info!(title, "{}", message),
            AlertLevel::Warning => warn!(title, "{}", message),
            AlertLevel::Critical => error!(title, "{}", message),
        }
    }
}
