use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome classification of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
    Error,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Up => "UP",
            CheckStatus::Down => "DOWN",
            CheckStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "UP" => Ok(CheckStatus::Up),
            "DOWN" => Ok(CheckStatus::Down),
            "ERROR" => Ok(CheckStatus::Error),
            other => Err(other.to_string()),
        }
    }
}

/// Notifiable transition kinds. `StatusChange` is a subscription wildcard
/// matched by both `ServiceUp` and `ServiceDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ServiceDown,
    ServiceUp,
    VersionChange,
    StatusChange,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ServiceDown => "SERVICE_DOWN",
            EventKind::ServiceUp => "SERVICE_UP",
            EventKind::VersionChange => "VERSION_CHANGE",
            EventKind::StatusChange => "STATUS_CHANGE",
        }
    }

    /// Subscriptions that should receive this event.
    pub fn interest_set(self) -> Vec<EventKind> {
        match self {
            EventKind::ServiceUp | EventKind::ServiceDown => vec![self, EventKind::StatusChange],
            _ => vec![self],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "SERVICE_DOWN" => Ok(EventKind::ServiceDown),
            "SERVICE_UP" => Ok(EventKind::ServiceUp),
            "VERSION_CHANGE" => Ok(EventKind::VersionChange),
            "STATUS_CHANGE" => Ok(EventKind::StatusChange),
            other => Err(other.to_string()),
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub expected_version: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// The part of the most recent stored result used for transition detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastCheck {
    pub status: CheckStatus,
    pub detected_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceWithLastCheck {
    pub service: Service,
    pub last_check: Option<LastCheck>,
}

/// A check result ready to be appended to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckResult {
    pub service_id: String,
    pub status: CheckStatus,
    pub latency_ms: Option<u64>,
    pub detected_version: Option<String>,
    pub error_message: Option<String>,
}

/// A stored check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub id: i64,
    pub service_id: String,
    pub status: CheckStatus,
    pub latency: Option<u64>,
    pub detected_version: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One point of the recent-history strip in the status overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSample {
    pub status: CheckStatus,
    pub latency: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

/// Where and how a channel delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ChannelTarget {
    Webhook { url: String },
    Telegram { config: TelegramConfig },
}

impl ChannelTarget {
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelTarget::Webhook { .. } => "WEBHOOK",
            ChannelTarget::Telegram { .. } => "TELEGRAM",
        }
    }
}

/// A configured notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub events: BTreeSet<EventKind>,
    #[serde(flatten)]
    pub target: ChannelTarget,
}

impl NotificationChannel {
    pub fn is_interested(&self, candidates: &[EventKind]) -> bool {
        candidates.iter().any(|event| self.events.contains(event))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChannel {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub events: BTreeSet<EventKind>,
    #[serde(flatten)]
    pub target: ChannelTarget,
}

fn enabled_by_default() -> bool {
    true
}

impl NewChannel {
    /// Whether the name and the target's delivery fields are all filled in.
    pub fn is_complete(&self) -> bool {
        let target_ready = match &self.target {
            ChannelTarget::Webhook { url } => !url.trim().is_empty(),
            ChannelTarget::Telegram { config } => {
                !config.token.trim().is_empty() && !config.chat_id.trim().is_empty()
            }
        };
        !self.name.trim().is_empty() && target_ready
    }
}

/// Partial update of a channel; absent fields are left as stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub events: Option<BTreeSet<EventKind>>,
}

/// Rolling statistics for the status overview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_checks: u64,
    pub up_checks: u64,
    pub uptime_percentage: f64,
    #[serde(default)]
    pub avg_latency_ms: Option<f64>,
}

/// Per-service entry of `/api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub service: Service,
    pub latest_check: Option<CheckResult>,
    pub stats: ServiceStats,
    /// Newest first, capped at [`HISTORY_LIMIT`] entries.
    pub history: Vec<CheckSample>,
}

pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub services: Vec<ServiceStatus>,
    pub timestamp: DateTime<Utc>,
}
