use crate::types::contact::ContactChange;
use crate::types::message::InboundMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/login";
pub const SOLO_MESSAGE_PATH: &str = "/msg/solo";
pub const GROUP_MESSAGE_PATH: &str = "/msg/group";
pub const CONTACT_CHANGE_PATH: &str = "/contact/change";

pub const SOURCE_SESSION: &str = "Session";
pub const SOURCE_SYNC: &str = "Sync";
pub const SOURCE_SCHEDULE: &str = "Schedule";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoginStatus {
    Success,
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventPayload {
    LoginStatus(LoginStatus),
    InboundMessage(InboundMessage),
    ContactChange(ContactChange),
    TimerTick { count: u64 },
    TimingFire { time_of_day: String },
    /// Application-defined data injected through [`crate::EventBus::publish`].
    Raw(serde_json::Value),
}

/// Something that happened, addressed by a hierarchical path such as
/// `/msg/solo`. Subscribers receive it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub path: String,
    pub source: String,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(path: impl Into<String>, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn login(status: LoginStatus) -> Self {
        Self::new(LOGIN_PATH, SOURCE_SESSION, EventPayload::LoginStatus(status))
    }

    /// Direct and group messages go to different paths.
    pub fn message(message: InboundMessage) -> Self {
        let path = if message.is_group {
            GROUP_MESSAGE_PATH
        } else {
            SOLO_MESSAGE_PATH
        };
        Self::new(path, SOURCE_SYNC, EventPayload::InboundMessage(message))
    }

    pub fn contact_change(change: ContactChange) -> Self {
        Self::new(
            CONTACT_CHANGE_PATH,
            SOURCE_SYNC,
            EventPayload::ContactChange(change),
        )
    }

    pub fn as_message(&self) -> Option<&InboundMessage> {
        match &self.payload {
            EventPayload::InboundMessage(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_login(&self) -> Option<&LoginStatus> {
        match &self.payload {
            EventPayload::LoginStatus(s) => Some(s),
            _ => None,
        }
    }
}

pub fn timer_path(interval: Duration) -> String {
    format!("/timer/{}", format_interval(interval))
}

pub fn timing_path(time_of_day: &str) -> String {
    format!("/timing/{time_of_day}")
}

/// Compact duration text: `500ms`, `30s`, `5m`, `1h30m`, `1h0m5s`.
pub fn format_interval(interval: Duration) -> String {
    let total = interval.as_secs();
    let millis = interval.subsec_millis();
    if total == 0 {
        return format!("{millis}ms");
    }
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 || (h > 0 && s > 0) {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}
