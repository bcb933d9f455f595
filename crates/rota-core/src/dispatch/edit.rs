//! Edits applied to a working copy of the settings before re-sanitizing.
//!
//! Every edit mutates a [`RawDispatchConfig`]; callers feed the result back
//! through `sanitize` (directly or via `DispatchScheduler::reconfigure`), so an
//! edit never has to maintain the invariants itself.

use crate::{
    dispatch::{
        sanitize::{RawAssignment, RawDispatchConfig, RawMessage, RawMode},
        types::DispatchMode,
    },
    domain::MessageId,
};

/// Inputs that clear the destination channel.
const CLEAR_WORDS: [&str; 4] = ["clear", "none", "null", "0"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentEdit {
    Assigned,
    /// The exact pair existed and was removed.
    Unassigned,
    /// The message already belongs to another account; nothing changed.
    MessageTaken,
}

/// Parse a comma-separated list of 1-based indexes.
///
/// Invalid and out-of-range entries are ignored; the result is zero-based,
/// de-duplicated and sorted descending so it can be removed in order.
pub fn parse_selection(selection: &str, max: usize) -> Vec<usize> {
    let mut out: Vec<usize> = selection
        .split(',')
        .filter_map(|part| part.trim().parse::<usize>().ok())
        .filter(|n| *n >= 1 && *n <= max)
        .map(|n| n - 1)
        .collect();
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out
}

impl RawDispatchConfig {
    pub fn add_accounts<I, S>(&mut self, accounts: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for account in accounts {
            let account = account.into().trim().to_string();
            if account.is_empty() || self.accounts.iter().any(|a| a.trim() == account) {
                continue;
            }
            self.accounts.push(account);
            added += 1;
        }
        added
    }

    /// Remove accounts by zero-based index (as returned by [`parse_selection`]).
    pub fn remove_accounts(&mut self, indexes: &[usize]) -> usize {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        let mut removed = 0;
        for idx in sorted {
            if idx < self.accounts.len() {
                self.accounts.remove(idx);
                removed += 1;
            }
        }
        removed
    }

    /// Set the destination; one of the clear words (or blank) unsets it.
    pub fn set_destination(&mut self, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() || CLEAR_WORDS.contains(&trimmed.to_lowercase().as_str()) {
            self.destination_channel_id = None;
        } else {
            self.destination_channel_id = Some(trimmed.to_string());
        }
    }

    pub fn set_delay_seconds(&mut self, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds < 0.0 {
            return false;
        }
        self.delay_seconds = Some(seconds.round());
        self.legacy_interval_ms = None;
        true
    }

    pub fn set_mode(&mut self, mode: DispatchMode) {
        self.mode = RawMode::Named(mode.as_str().to_string());
    }

    /// Queue a new message; the sanitizer assigns its id.
    pub fn add_message(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.messages.push(RawMessage::Entry {
            id: None,
            text: text.to_string(),
        });
        true
    }

    pub fn remove_message(&mut self, id: MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(
            |m| !matches!(m, RawMessage::Entry { id: Some(existing), .. } if *existing == id.0),
        );
        before != self.messages.len()
    }

    /// Toggle an account→message mapping.
    pub fn toggle_assignment(&mut self, credential: &str, message_id: MessageId) -> AssignmentEdit {
        fn owner_of(a: &RawAssignment) -> Option<&str> {
            a.credential.as_deref().map(str::trim)
        }

        let credential = credential.trim();

        let taken = self
            .assignments
            .iter()
            .any(|a| a.message_id == Some(message_id.0) && owner_of(a) != Some(credential));
        if taken {
            return AssignmentEdit::MessageTaken;
        }

        let exact = self
            .assignments
            .iter()
            .position(|a| a.message_id == Some(message_id.0) && owner_of(a) == Some(credential));
        if let Some(idx) = exact {
            self.assignments.remove(idx);
            return AssignmentEdit::Unassigned;
        }

        self.assignments.retain(|a| owner_of(a) != Some(credential));
        self.assignments.push(RawAssignment {
            credential: Some(credential.to_string()),
            message_id: Some(message_id.0),
        });
        AssignmentEdit::Assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{sanitize, sanitize_value, DispatchConfig};
    use crate::domain::{ChannelId, Credential};
    use serde_json::json;

    fn base() -> DispatchConfig {
        sanitize_value(&json!({
            "accounts": ["A", "B", "C"],
            "channelId": "chan",
            "messages": [{"id": 1, "text": "x"}, {"id": 2, "text": "y"}],
            "assignments": [{"credential": "A", "messageId": 1}]
        }))
    }

    fn edit(cfg: &DispatchConfig, f: impl FnOnce(&mut RawDispatchConfig)) -> DispatchConfig {
        let mut raw = RawDispatchConfig::from(cfg);
        f(&mut raw);
        sanitize(&raw)
    }

    #[test]
    fn parse_selection_follows_menu_semantics() {
        assert_eq!(parse_selection("1, 3,3,x,9,0", 4), vec![2, 0]);
        assert!(parse_selection("", 4).is_empty());
    }

    #[test]
    fn removing_account_drops_its_assignment() {
        let cfg = edit(&base(), |raw| {
            raw.remove_accounts(&parse_selection("1", 3));
        });
        assert_eq!(cfg.accounts(), &[Credential::new("B"), Credential::new("C")]);
        assert!(cfg.assignments().is_empty());
    }

    #[test]
    fn added_message_gets_next_id() {
        let cfg = edit(&base(), |raw| {
            assert!(raw.add_message("  z "));
            assert!(!raw.add_message("   "));
        });
        let last = cfg.messages().last().map(|m| (m.id.0, m.text.as_str()));
        assert_eq!(last, Some((3, "z")));
    }

    #[test]
    fn removing_message_keeps_other_ids_stable() {
        let cfg = edit(&base(), |raw| {
            assert!(raw.remove_message(MessageId(1)));
            raw.add_message("new");
        });
        let ids: Vec<u64> = cfg.messages().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(cfg.assignments().is_empty());
    }

    #[test]
    fn toggle_assignment_rules() {
        let mut raw = RawDispatchConfig::from(&base());
        assert_eq!(raw.toggle_assignment("B", MessageId(1)), AssignmentEdit::MessageTaken);
        assert_eq!(raw.toggle_assignment("A", MessageId(2)), AssignmentEdit::Assigned);
        let cfg = sanitize(&raw);
        assert_eq!(cfg.assignments().len(), 1);
        assert_eq!(cfg.assignments()[0].message_id, MessageId(2));

        assert_eq!(raw.toggle_assignment("A", MessageId(2)), AssignmentEdit::Unassigned);
        assert!(sanitize(&raw).assignments().is_empty());
    }

    #[test]
    fn destination_clear_words() {
        let cfg = edit(&base(), |raw| raw.set_destination("NONE"));
        assert_eq!(cfg.destination_channel_id(), None);
        let cfg = edit(&base(), |raw| raw.set_destination(" 99 "));
        assert_eq!(cfg.destination_channel_id(), Some(&ChannelId("99".to_string())));
    }

    #[test]
    fn delay_and_mode_edits() {
        let cfg = edit(&base(), |raw| {
            assert!(!raw.set_delay_seconds(-2.0));
            assert!(raw.set_delay_seconds(2.6));
            raw.set_mode(DispatchMode::Assigned);
        });
        assert_eq!(cfg.delay_seconds(), 3);
        assert_eq!(cfg.dispatch_mode(), DispatchMode::Assigned);
    }

    #[test]
    fn add_accounts_skips_duplicates() {
        let mut raw = RawDispatchConfig::from(&base());
        assert_eq!(raw.add_accounts(["B", " D ", "", "D"]), 1);
        assert_eq!(sanitize(&raw).accounts().len(), 4);
    }
}
