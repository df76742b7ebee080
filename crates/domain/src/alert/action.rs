//! Action — the effect performed when an alert triggers.

use serde::{Deserialize, Serialize};

/// An operation to execute, in list order, when an alert becomes active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write the alert to the log.
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// POST the webhook payload to `url`.
    Webhook { url: String },
    /// Send an e-mail notification.
    Email { to: String },
    /// Send an SMS notification.
    Sms { to: String },
    /// Wait before continuing to the next action.
    Delay { seconds: u64 },
}

impl Action {
    /// Short tag naming the action kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Webhook { .. } => "webhook",
            Self::Email { .. } => "email",
            Self::Sms { .. } => "sms",
            Self::Delay { .. } => "delay",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log { .. } => f.write_str("log"),
            Self::Webhook { url } => write!(f, "webhook({url})"),
            Self::Email { to } => write!(f, "email({to})"),
            Self::Sms { to } => write!(f, "sms({to})"),
            Self::Delay { seconds } => write!(f, "delay({seconds}s)"),
        }
    }
}
