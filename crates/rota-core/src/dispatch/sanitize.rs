//! Normalization of untrusted dispatch settings.
//!
//! Persisted or hand-edited settings come in several shapes (bare-string
//! messages, legacy field names, millisecond intervals). They are parsed once
//! into [`RawDispatchConfig`] at the boundary and immediately canonicalized by
//! [`sanitize`]; nothing downstream sees the raw form.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::{
    dispatch::types::{
        Assignment, DispatchConfig, DispatchMode, Message, DEFAULT_DELAY_SECONDS, MAX_MESSAGE_ID,
    },
    domain::{ChannelId, Credential, MessageId},
};

/// A message entry as supplied by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawMessage {
    /// Bare string; receives an id during sanitizing.
    Text(String),
    /// Structured entry; `id` is `None` when missing or not a positive integer.
    Entry { id: Option<u64>, text: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RawMode {
    Named(String),
    /// Legacy boolean: `true` → random, `false` → sequential.
    Randomize(bool),
    #[default]
    Unset,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawAssignment {
    pub credential: Option<String>,
    pub message_id: Option<u64>,
}

/// Dispatch settings before canonicalization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDispatchConfig {
    pub accounts: Vec<String>,
    pub destination_channel_id: Option<String>,
    pub delay_seconds: Option<f64>,
    pub legacy_interval_ms: Option<f64>,
    pub messages: Vec<RawMessage>,
    /// Single free-text message; used only when `messages` yields nothing.
    pub legacy_message: Option<String>,
    pub mode: RawMode,
    pub assignments: Vec<RawAssignment>,
}

impl RawDispatchConfig {
    /// Parse any JSON value. Never fails: unusable fields fall back to empty.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let accounts = field(obj, &["accounts", "tokens"])
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(as_text).collect())
            .unwrap_or_default();

        let destination_channel_id =
            field(obj, &["destinationChannelId", "channelId"]).and_then(as_text);
        let delay_seconds = field(obj, &["delaySeconds", "messageDelaySec"]).and_then(as_number);
        let legacy_interval_ms = field(obj, &["interval", "intervalMs"]).and_then(as_number);

        let messages = field(obj, &["messages"])
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_message).collect())
            .unwrap_or_default();
        let legacy_message = field(obj, &["message"])
            .and_then(Value::as_str)
            .map(str::to_string);

        let mode = if let Some(s) = field(obj, &["dispatchMode"]).and_then(Value::as_str) {
            RawMode::Named(s.to_string())
        } else if let Some(b) = field(obj, &["randomize"]).and_then(Value::as_bool) {
            RawMode::Randomize(b)
        } else {
            RawMode::Unset
        };

        let assignments = field(obj, &["assignments"])
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_assignment).collect())
            .unwrap_or_default();

        Self {
            accounts,
            destination_channel_id,
            delay_seconds,
            legacy_interval_ms,
            messages,
            legacy_message,
            mode,
            assignments,
        }
    }
}

impl From<&DispatchConfig> for RawDispatchConfig {
    fn from(cfg: &DispatchConfig) -> Self {
        Self {
            accounts: cfg.accounts.iter().map(|c| c.expose().to_string()).collect(),
            destination_channel_id: cfg.destination_channel_id.as_ref().map(|c| c.0.clone()),
            delay_seconds: Some(cfg.delay_seconds as f64),
            legacy_interval_ms: None,
            messages: cfg
                .messages
                .iter()
                .map(|m| RawMessage::Entry {
                    id: Some(m.id.0),
                    text: m.text.clone(),
                })
                .collect(),
            legacy_message: None,
            mode: RawMode::Named(cfg.dispatch_mode.as_str().to_string()),
            assignments: cfg
                .assignments
                .iter()
                .map(|a| RawAssignment {
                    credential: Some(a.credential.expose().to_string()),
                    message_id: Some(a.message_id.0),
                })
                .collect(),
        }
    }
}

/// Canonicalize raw settings. Pure, total and idempotent.
pub fn sanitize(raw: &RawDispatchConfig) -> DispatchConfig {
    let accounts = sanitize_accounts(&raw.accounts);

    let destination_channel_id = raw
        .destination_channel_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| ChannelId(s.to_string()));

    let delay_seconds = sanitize_delay(raw.delay_seconds, raw.legacy_interval_ms);
    let messages = sanitize_messages(&raw.messages, raw.legacy_message.as_deref());

    let dispatch_mode = match &raw.mode {
        RawMode::Named(s) => DispatchMode::parse(s).unwrap_or_default(),
        RawMode::Randomize(true) => DispatchMode::Random,
        RawMode::Randomize(false) => DispatchMode::Sequential,
        RawMode::Unset => DispatchMode::default(),
    };

    let assignments = sanitize_assignments(&raw.assignments, &accounts, &messages);

    DispatchConfig {
        accounts,
        destination_channel_id,
        delay_seconds,
        messages,
        dispatch_mode,
        assignments,
    }
}

pub fn sanitize_value(value: &Value) -> DispatchConfig {
    sanitize(&RawDispatchConfig::from_value(value))
}

fn sanitize_accounts(raw: &[String]) -> Vec<Credential> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(Credential::new)
        .collect()
}

fn sanitize_delay(seconds: Option<f64>, legacy_ms: Option<f64>) -> u64 {
    let usable = |v: &f64| v.is_finite() && *v >= 0.0;
    if let Some(s) = seconds.filter(usable) {
        return s.round() as u64;
    }
    if let Some(ms) = legacy_ms.filter(usable) {
        return (ms / 1000.0).round() as u64;
    }
    DEFAULT_DELAY_SECONDS
}

fn sanitize_messages(raw: &[RawMessage], legacy: Option<&str>) -> Vec<Message> {
    let mut explicit = HashSet::new();
    let mut staged: Vec<(Option<u64>, String)> = Vec::new();

    for entry in raw {
        let (id, text) = match entry {
            RawMessage::Text(text) => (None, text),
            RawMessage::Entry { id, text } => (*id, text),
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        // Out-of-range or repeated explicit ids are treated as missing.
        let id = id.filter(|i| (1..=MAX_MESSAGE_ID).contains(i) && explicit.insert(*i));
        staged.push((id, text.to_string()));
    }

    if staged.is_empty() {
        if let Some(text) = legacy.map(str::trim).filter(|t| !t.is_empty()) {
            staged.push((None, text.to_string()));
        }
    }

    // Bounded by MAX_MESSAGE_ID + staged.len(), far below u64::MAX.
    let mut next_id = explicit.iter().max().copied().unwrap_or(0) + 1;
    staged
        .into_iter()
        .map(|(id, text)| {
            let id = id.unwrap_or_else(|| {
                let assigned = next_id;
                next_id += 1;
                assigned
            });
            Message {
                id: MessageId(id),
                text,
            }
        })
        .collect()
}

fn sanitize_assignments(
    raw: &[RawAssignment],
    accounts: &[Credential],
    messages: &[Message],
) -> Vec<Assignment> {
    let mut out: Vec<Assignment> = Vec::new();
    for entry in raw {
        let Some(credential) = entry
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(Credential::new)
        else {
            continue;
        };
        let Some(message_id) = entry.message_id.map(MessageId) else {
            continue;
        };

        if !accounts.contains(&credential) || !messages.iter().any(|m| m.id == message_id) {
            continue;
        }
        // First mapping wins, per account and per message.
        if out
            .iter()
            .any(|a| a.credential == credential || a.message_id == message_id)
        {
            continue;
        }
        out.push(Assignment {
            credential,
            message_id,
        });
    }
    out
}

// === raw JSON helpers ===

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_positive_id(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= 1.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}

fn parse_message(v: &Value) -> Option<RawMessage> {
    match v {
        Value::String(s) => Some(RawMessage::Text(s.clone())),
        Value::Object(obj) => {
            let text = obj.get("text").and_then(Value::as_str)?.to_string();
            let id = obj.get("id").and_then(as_positive_id);
            Some(RawMessage::Entry { id, text })
        }
        _ => None,
    }
}

fn parse_assignment(v: &Value) -> Option<RawAssignment> {
    let obj = v.as_object()?;
    let credential = field(obj, &["credential", "token"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let message_id =
        field(obj, &["messageId", "message_id", "message", "id"]).and_then(as_positive_id);
    Some(RawAssignment {
        credential,
        message_id,
    })
}
