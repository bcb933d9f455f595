//! Voice channel presence for a set of accounts.
//!
//! Joining is fire-and-forget: once the voice-state frame is written to the
//! owning shard the session is considered `Joining` and nothing waits for the
//! platform to confirm it.

use std::sync::Arc;

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    client::types::GatewayCommand,
    domain::{ChannelId, Credential, GuildId},
    presence::PresenceController,
    session::{Session, SessionRegistry, VoicePhase, VoiceTarget},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceToggle {
    Started(usize),
    Stopped(usize),
    /// Accounts, guild or channel missing; nothing changed.
    Skipped,
}

#[derive(Clone)]
pub struct VoiceStateController {
    inner: Arc<VoiceInner>,
}

struct VoiceInner {
    registry: Arc<SessionRegistry>,
    presence: PresenceController,
    state: Mutex<VoiceState>,
}

#[derive(Default)]
struct VoiceState {
    active: bool,
    joins: Vec<JoinHandle<()>>,
}

impl VoiceStateController {
    pub fn new(registry: Arc<SessionRegistry>, presence: PresenceController) -> Self {
        Self {
            inner: Arc::new(VoiceInner {
                registry,
                presence,
                state: Mutex::new(VoiceState::default()),
            }),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    pub async fn toggle(
        &self,
        accounts: &[Credential],
        guild_id: Option<&GuildId>,
        channel_id: Option<&ChannelId>,
    ) -> VoiceToggle {
        if self.is_active().await {
            return VoiceToggle::Stopped(self.stop().await);
        }
        match (guild_id, channel_id) {
            (Some(guild_id), Some(channel_id)) if !accounts.is_empty() => {
                VoiceToggle::Started(self.start(accounts, guild_id, channel_id).await)
            }
            _ => {
                warn!(
                    accounts = accounts.len(),
                    guild_set = guild_id.is_some(),
                    channel_set = channel_id.is_some(),
                    "voice not started: accounts, guild and voice channel are required"
                );
                VoiceToggle::Skipped
            }
        }
    }

    /// Join `channel_id` with every account. Returns the number of sessions
    /// moved to `Connecting`.
    pub async fn start(
        &self,
        accounts: &[Credential],
        guild_id: &GuildId,
        channel_id: &ChannelId,
    ) -> usize {
        self.stop().await;

        let target = VoiceTarget {
            guild_id: guild_id.clone(),
            channel_id: channel_id.clone(),
        };

        let mut st = self.inner.state.lock().await;
        for credential in accounts {
            let session = self.inner.registry.create(credential).await;
            session.set_voice_target(Some(target.clone())).await;
            session.set_voice_phase(VoicePhase::Connecting).await;

            let presence = self.inner.presence.clone();
            let target = target.clone();
            st.joins.push(tokio::spawn(async move {
                if let Err(e) = session.authenticate().await {
                    warn!(account = %session.credential(), "voice login failed: {e}");
                    return;
                }
                join(&session, &target).await;
                presence.apply(&session).await;
            }));
        }
        st.active = true;

        info!(
            accounts = accounts.len(),
            guild = %guild_id,
            channel = %channel_id,
            "voice started"
        );
        accounts.len()
    }

    /// Leave voice on every non-idle session. Returns how many were reset.
    pub async fn stop(&self) -> usize {
        let was_active = {
            let mut st = self.inner.state.lock().await;
            for handle in st.joins.drain(..) {
                handle.abort();
            }
            std::mem::replace(&mut st.active, false)
        };

        let mut reset = 0;
        for session in self.inner.registry.list().await {
            if session.voice_phase().await == VoicePhase::Idle {
                continue;
            }
            if let Some(target) = session.voice_target().await {
                leave(&session, &target).await;
            }
            session.set_voice_phase(VoicePhase::Idle).await;
            session.set_voice_target(None).await;
            reset += 1;
        }

        if was_active || reset > 0 {
            info!(sessions = reset, "voice stopped");
        }
        reset
    }

    /// Start voice at shutdown unless it is already running or unconfigured.
    pub async fn ensure_on_exit(
        &self,
        accounts: &[Credential],
        guild_id: Option<&GuildId>,
        channel_id: Option<&ChannelId>,
    ) -> bool {
        if self.is_active().await {
            return false;
        }
        let (Some(guild_id), Some(channel_id)) = (guild_id, channel_id) else {
            return false;
        };
        if accounts.is_empty() {
            return false;
        }
        self.start(accounts, guild_id, channel_id).await > 0
    }
}

async fn join(session: &Session, target: &VoiceTarget) {
    let account = session.label().await;
    let guild = match session.cached_guild(&target.guild_id).await {
        Ok(Some(guild)) => guild,
        Ok(None) => {
            warn!(
                account = %account,
                guild = %target.guild_id,
                "guild not cached; voice join skipped"
            );
            return;
        }
        Err(e) => {
            warn!(account = %account, "voice join skipped: {e}");
            return;
        }
    };
    if !guild.has_channel(&target.channel_id) {
        warn!(
            account = %account,
            channel = %target.channel_id,
            "voice channel not cached; voice join skipped"
        );
        return;
    }

    session.set_voice_phase(VoicePhase::Joining).await;
    let command =
        GatewayCommand::voice_state(target.guild_id.clone(), Some(target.channel_id.clone()));
    match session.send_gateway(&guild, &command).await {
        Ok(()) => info!(account = %account, channel = %target.channel_id, "voice join sent"),
        Err(e) => warn!(account = %account, "voice join failed: {e}"),
    }
}

async fn leave(session: &Session, target: &VoiceTarget) {
    let guild = match session.cached_guild(&target.guild_id).await {
        Ok(Some(guild)) => guild,
        _ => return,
    };
    let command = GatewayCommand::voice_state(target.guild_id.clone(), None);
    if let Err(e) = session.send_gateway(&guild, &command).await {
        let account = session.label().await;
        warn!(account = %account, "voice leave failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        client::{loopback::LoopbackNetwork, types::CachedGuild, types::OP_VOICE_STATE_UPDATE},
        domain::PresenceStatus,
    };

    fn cred(s: &str) -> Credential {
        Credential::new(s)
    }

    fn guild() -> GuildId {
        GuildId("g1".to_string())
    }

    fn channel() -> ChannelId {
        ChannelId("v1".to_string())
    }

    type Fixture = (LoopbackNetwork, Arc<SessionRegistry>, VoiceStateController);

    fn setup(shard_id: Option<u32>) -> Fixture {
        let network = LoopbackNetwork::new();
        network.add_guild(CachedGuild {
            id: guild(),
            shard_id,
            channels: vec![channel()],
        });
        let registry = Arc::new(SessionRegistry::new(network.factory()));
        let presence = PresenceController::new(registry.clone(), PresenceStatus::Dnd);
        let voice = VoiceStateController::new(registry.clone(), presence);
        (network, registry, voice)
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_joins_on_owning_shard() {
        let (network, registry, voice) = setup(Some(3));
        assert_eq!(voice.start(&[cred("A"), cred("B")], &guild(), &channel()).await, 2);
        settle().await;

        let frames = network.frames();
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.shard_id, 3);
            assert_eq!(frame.command.op, OP_VOICE_STATE_UPDATE);
            assert_eq!(frame.command.d.channel_id, Some(channel()));
            assert!(!frame.command.d.self_mute && !frame.command.d.self_deaf);
        }
        for session in registry.list().await {
            assert_eq!(session.voice_phase().await, VoicePhase::Joining);
        }
        assert_eq!(network.status_of(&cred("A")), Some(PresenceStatus::Dnd));
        assert!(voice.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_shard_falls_back_to_first() {
        let (network, _registry, voice) = setup(None);
        voice.start(&[cred("A")], &guild(), &channel()).await;
        settle().await;
        assert_eq!(network.frames()[0].shard_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_miss_leaves_session_connecting() {
        let (network, registry, voice) = setup(Some(0));
        voice
            .start(&[cred("A")], &GuildId("other".to_string()), &channel())
            .await;
        voice
            .start(&[cred("B")], &guild(), &ChannelId("missing".to_string()))
            .await;
        settle().await;

        assert!(network.frames().is_empty());
        let b = registry.get(&cred("B")).await.unwrap();
        assert_eq!(b.voice_phase().await, VoicePhase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_stays_connecting_without_frames() {
        let (network, registry, voice) = setup(Some(0));
        network.reject_login(&cred("A"));
        voice.start(&[cred("A")], &guild(), &channel()).await;
        settle().await;

        assert!(network.frames().is_empty());
        let a = registry.get(&cred("A")).await.unwrap();
        assert_eq!(a.voice_phase().await, VoicePhase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_sends_leave_and_resets_phases() {
        let (network, registry, voice) = setup(Some(1));
        voice.start(&[cred("A"), cred("B")], &guild(), &channel()).await;
        settle().await;

        assert_eq!(voice.stop().await, 2);
        let leaves: Vec<_> = network
            .frames()
            .into_iter()
            .filter(|f| f.command.is_leave())
            .collect();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|f| f.shard_id == 1 && f.command.d.guild_id == guild()));
        for session in registry.list().await {
            assert_eq!(session.voice_phase().await, VoicePhase::Idle);
        }
        assert!(!voice.is_active().await);
        assert_eq!(voice.stop().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_alternates_and_skips_without_target() {
        let (network, registry, voice) = setup(Some(0));
        let accounts = [cred("A")];

        assert_eq!(voice.toggle(&accounts, None, Some(&channel())).await, VoiceToggle::Skipped);
        assert_eq!(voice.toggle(&[], Some(&guild()), Some(&channel())).await, VoiceToggle::Skipped);
        assert!(registry.is_empty().await);

        assert_eq!(
            voice.toggle(&accounts, Some(&guild()), Some(&channel())).await,
            VoiceToggle::Started(1)
        );
        settle().await;
        assert_eq!(
            voice.toggle(&accounts, Some(&guild()), Some(&channel())).await,
            VoiceToggle::Stopped(1)
        );
        assert_eq!(network.frames().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_on_exit_only_starts_when_idle_and_configured() {
        let (_network, _registry, voice) = setup(Some(0));
        let accounts = [cred("A")];

        assert!(!voice.ensure_on_exit(&accounts, Some(&guild()), None).await);
        assert!(voice.ensure_on_exit(&accounts, Some(&guild()), Some(&channel())).await);
        assert!(!voice.ensure_on_exit(&accounts, Some(&guild()), Some(&channel())).await);
    }

    fn require_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn spawned_futures_are_send() {
        let (_network, registry, voice) = setup(Some(0));
        let session = registry.create(&cred("A")).await;
        let target = VoiceTarget {
            guild_id: guild(),
            channel_id: channel(),
        };
        require_send(join(&session, &target));
        require_send(leave(&session, &target));
        require_send(voice.start(&[cred("A")], &guild(), &channel()));
        require_send(voice.stop());
    }
}
