//! Tick-level selection of which account sends which message.
//!
//! Pure: given the ready accounts, the canonical config and the persistent
//! cursors, produce the next pick or `None` to skip the tick. No I/O happens
//! here, so the policy is testable without a network.

use rand::Rng;

use crate::{
    dispatch::types::{Assignment, DispatchConfig, DispatchMode},
    domain::{Credential, MessageId},
};

/// Cursors that persist across ticks of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursors {
    pub assignment: usize,
    pub account: usize,
    pub message: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickSource {
    Assignment,
    Random,
    Sequential,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pick {
    pub credential: Credential,
    pub message_id: MessageId,
    pub source: PickSource,
}

/// Configured assignments whose account is ready and whose message exists.
pub fn active_assignments<'a>(
    cfg: &'a DispatchConfig,
    ready: &[Credential],
) -> Vec<&'a Assignment> {
    cfg.assignments()
        .iter()
        .filter(|a| cfg.message(a.message_id).is_some() && ready.contains(&a.credential))
        .collect()
}

/// Choose the next (account, message) pair.
///
/// Any usable assignment takes precedence over the configured mode, including
/// `random` and `sequential`. `assigned` with no usable assignment skips.
pub fn select<R: Rng>(
    cfg: &DispatchConfig,
    ready: &[Credential],
    cursors: &mut Cursors,
    rng: &mut R,
) -> Option<Pick> {
    if ready.is_empty() || cfg.messages().is_empty() {
        return None;
    }

    let active = active_assignments(cfg, ready);
    if !active.is_empty() {
        let current = active[cursors.assignment % active.len()];
        cursors.assignment = (cursors.assignment + 1) % active.len();
        return Some(Pick {
            credential: current.credential.clone(),
            message_id: current.message_id,
            source: PickSource::Assignment,
        });
    }

    match cfg.dispatch_mode() {
        DispatchMode::Assigned => None,
        DispatchMode::Random => {
            let credential = ready[rng.gen_range(0..ready.len())].clone();
            let message = &cfg.messages()[rng.gen_range(0..cfg.messages().len())];
            Some(Pick {
                credential,
                message_id: message.id,
                source: PickSource::Random,
            })
        }
        DispatchMode::Sequential => {
            let credential = ready[cursors.account % ready.len()].clone();
            let message = &cfg.messages()[cursors.message % cfg.messages().len()];
            cursors.account = (cursors.account + 1) % ready.len();
            if cursors.account == 0 {
                cursors.message = (cursors.message + 1) % cfg.messages().len();
            }
            Some(Pick {
                credential,
                message_id: message.id,
                source: PickSource::Sequential,
            })
        }
    }
}
