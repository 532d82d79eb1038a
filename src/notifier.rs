use crate::error::NotifyError;
use crate::models::{ChannelTarget, EventKind, NotificationChannel, Service, TelegramConfig};
use crate::storage::ChannelStore;
use crate::transition::Transition;
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const WEBHOOK_USER_AGENT: &str = "404NotToday-Webhook-Bot/1.0";
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const TEST_MESSAGE: &str = "This is a test notification from 404 Not Today.";
const TELEGRAM_TEST_TEXT: &str =
    "🔔 *Test Notification*\n\nThis is a test message from 404 Not Today.";

/// Fans transitions out to every interested channel.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    channels: Arc<dyn ChannelStore>,
    telegram_api_base: String,
}

/// How many deliveries a dispatch attempted and how many of them failed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
struct ServiceRef<'a> {
    id: &'a str,
    name: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEnvelope<'a> {
    event: &'a str,
    service: ServiceRef<'a>,
    previous_status: &'a str,
    current_status: &'a str,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    versions: Option<VersionPair<'a>>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

// Transition payloads always carry both keys, null when unknown.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionPair<'a> {
    previous_version: Option<&'a str>,
    current_version: Option<&'a str>,
}

impl<'a> WebhookEnvelope<'a> {
    fn for_transition(service: &'a Service, transition: &'a Transition) -> Self {
        WebhookEnvelope {
            event: transition.event.as_str(),
            service: ServiceRef {
                id: &service.id,
                name: &service.name,
                url: &service.url,
            },
            previous_status: transition.previous_status.as_str(),
            current_status: transition.current_status.as_str(),
            versions: Some(VersionPair {
                previous_version: transition.previous_version.as_deref(),
                current_version: transition.current_version.as_deref(),
            }),
            timestamp: now_iso(),
            message: None,
        }
    }

    fn test() -> Self {
        WebhookEnvelope {
            event: "TEST_NOTIFICATION",
            service: ServiceRef {
                id: "test-service-id",
                name: "Test Service",
                url: "https://example.com",
            },
            previous_status: "UP",
            current_status: "UP",
            versions: None,
            timestamp: now_iso(),
            message: Some(TEST_MESSAGE),
        }
    }
}

#[derive(Debug, Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

impl Notifier {
    pub fn new(client: Client, channels: Arc<dyn ChannelStore>) -> Self {
        Self {
            client,
            channels,
            telegram_api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    pub fn with_telegram_api_base(mut self, base: impl Into<String>) -> Self {
        self.telegram_api_base = base.into();
        self
    }

    /// Delivers `transition` to every enabled channel subscribed to it.
    ///
    /// Deliveries run concurrently and fail independently; failures are
    /// logged per channel and only counted in the returned report.
    pub async fn dispatch(&self, service: &Service, transition: &Transition) -> DispatchReport {
        let candidates = transition.event.interest_set();

        let channels = match self.channels.list_enabled_channels() {
            Ok(channels) => channels,
            Err(err) => {
                error!("Failed to load notification channels: {err}");
                return DispatchReport::default();
            }
        };

        let matched = channels
            .into_iter()
            .filter(|channel| channel.enabled && channel.is_interested(&candidates))
            .collect::<Vec<_>>();
        if matched.is_empty() {
            return DispatchReport::default();
        }

        info!(
            "Sending {} notifications for {} (event: {})",
            matched.len(),
            service.name,
            transition.event
        );

        let envelope = WebhookEnvelope::for_transition(service, transition);
        let text = telegram_text(service, transition);
        let (envelope, text) = (&envelope, text.as_str());

        let results = join_all(matched.iter().map(|channel| async move {
            let result = match &channel.target {
                ChannelTarget::Webhook { url } => self.post_webhook(url, envelope).await,
                ChannelTarget::Telegram { config } => self.send_telegram(config, text).await,
            };
            (channel, result)
        }))
        .await;

        let mut report = DispatchReport {
            attempted: matched.len(),
            failed: 0,
        };
        for (channel, result) in results {
            if let Err(err) = result {
                report.failed += 1;
                log_delivery_failure(channel, &err);
            }
        }
        report
    }

    /// Sends a fixed test message to one channel, returning the failure.
    pub async fn send_test(&self, channel: &NotificationChannel) -> Result<(), NotifyError> {
        match &channel.target {
            ChannelTarget::Webhook { url } => {
                self.post_webhook(url, &WebhookEnvelope::test()).await
            }
            ChannelTarget::Telegram { config } => {
                self.send_telegram(config, TELEGRAM_TEST_TEXT).await
            }
        }
    }

    async fn post_webhook(
        &self,
        url: &str,
        envelope: &WebhookEnvelope<'_>,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .header(USER_AGENT, WEBHOOK_USER_AGENT)
            .header(CONTENT_TYPE, "application/json")
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        debug!("Webhook delivered to {url}");
        Ok(())
    }

    async fn send_telegram(&self, config: &TelegramConfig, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.telegram_api_base.trim_end_matches('/'),
            config.token
        );
        let response = self
            .client
            .post(url)
            .json(&TelegramMessage {
                chat_id: &config.chat_id,
                text,
                parse_mode: "Markdown",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        debug!("Telegram message delivered to chat {}", config.chat_id);
        Ok(())
    }
}

fn log_delivery_failure(channel: &NotificationChannel, err: &NotifyError) {
    match err {
        NotifyError::Rejected { .. } => warn!(
            "{} notification to {} ({}) not accepted: {err}",
            channel.target.type_name(),
            channel.name,
            channel.id
        ),
        NotifyError::Transport(_) => error!(
            "Error delivering notification to {} ({}): {err}",
            channel.name, channel.id
        ),
    }
}

/// Markdown body sent to Telegram for a transition.
pub fn telegram_text(service: &Service, transition: &Transition) -> String {
    match transition.event {
        EventKind::ServiceDown => format!(
            "🚨 *Service Down*\n\n*Service:* {}\n*URL:* {}\n*Status:* DOWN 🔴",
            service.name, service.url
        ),
        EventKind::ServiceUp => format!(
            "✅ *Service Recovered*\n\n*Service:* {}\n*URL:* {}\n*Status:* UP 🟢",
            service.name, service.url
        ),
        EventKind::VersionChange => format!(
            "ℹ️ *Version Change*\n\n*Service:* {}\n*From:* {}\n*To:* {}",
            service.name,
            transition.previous_version.as_deref().unwrap_or("Unknown"),
            transition.current_version.as_deref().unwrap_or("Unknown")
        ),
        EventKind::StatusChange => format!(
            "📢 *Status Change*\n\n*Service:* {}\n*Event:* {}\n*Status:* {}",
            service.name, transition.event, transition.current_status
        ),
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
