use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, Credential, MessageId};

pub const DEFAULT_DELAY_SECONDS: u64 = 10;

/// Lower bound on the tick period so a zero delay cannot busy-loop.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(500);

/// Minimum number of accounts before dispatch may start.
pub const MIN_DISPATCH_ACCOUNTS: usize = 2;

/// Largest explicit message id kept as-is: the top of the range a JSON number
/// represents exactly. Larger ids are treated as missing.
pub const MAX_MESSAGE_ID: u64 = (1 << 53) - 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Random ready account, random message.
    #[default]
    Random,
    /// Full pass over ready accounts, then the next message.
    Sequential,
    /// Only configured account→message assignments.
    Assigned,
}

impl DispatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Some(Self::Random),
            "sequential" | "order" => Some(Self::Sequential),
            "assigned" => Some(Self::Assigned),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Sequential => "sequential",
            Self::Assigned => "assigned",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub credential: Credential,
    pub message_id: MessageId,
}

/// Canonical dispatch configuration.
///
/// Only [`crate::dispatch::sanitize`] builds one, so every instance satisfies:
/// unique accounts, unique positive message ids with non-empty text, and at
/// most one assignment per account and per message, each referencing an
/// existing account and message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    pub(super) accounts: Vec<Credential>,
    pub(super) destination_channel_id: Option<ChannelId>,
    pub(super) delay_seconds: u64,
    pub(super) messages: Vec<Message>,
    pub(super) dispatch_mode: DispatchMode,
    pub(super) assignments: Vec<Assignment>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            destination_channel_id: None,
            delay_seconds: DEFAULT_DELAY_SECONDS,
            messages: Vec::new(),
            dispatch_mode: DispatchMode::default(),
            assignments: Vec::new(),
        }
    }
}

impl DispatchConfig {
    pub fn accounts(&self) -> &[Credential] {
        &self.accounts
    }

    pub fn destination_channel_id(&self) -> Option<&ChannelId> {
        self.destination_channel_id.as_ref()
    }

    pub fn delay_seconds(&self) -> u64 {
        self.delay_seconds
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Admission gate for starting dispatch.
    ///
    /// The delay is an unsigned integer after sanitizing, so it is always a
    /// finite non-negative number here.
    pub fn is_dispatchable(&self) -> bool {
        self.accounts.len() >= MIN_DISPATCH_ACCOUNTS
            && self.destination_channel_id.is_some()
            && !self.messages.is_empty()
    }

    /// `max(delay, 500ms)`.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.delay_seconds).max(MIN_TICK_PERIOD)
    }
}
