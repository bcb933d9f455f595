//! Per-account sessions and the registry that owns them.
//!
//! The registry is the only owner of connection handles. Components get an
//! `Arc<Session>` back, but every operation on a session fails with
//! `Error::SessionClosed` once the registry has destroyed it.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    client::{
        port::{ChatClient, ClientFactory, TextChannel},
        types::{AccountProfile, CachedGuild, GatewayCommand},
    },
    domain::{ChannelId, Credential, GuildId, PresenceStatus},
    errors::Error,
    Result,
};

/// Login progress of the underlying connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

/// Dispatch view of a session.
///
/// `Ready` means authenticated with a resolved destination channel. `Failed`
/// sessions are excluded from the dispatch pool and never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPhase {
    Unauthenticated,
    Authenticating,
    Ready,
    Failed,
}

/// Voice sub-state. There is no "joined" confirmation; `Joining` is terminal
/// until a leave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VoicePhase {
    #[default]
    Idle,
    Connecting,
    Joining,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceTarget {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

#[derive(Default)]
enum Destination {
    #[default]
    Unresolved,
    Resolved(Arc<dyn TextChannel>),
    Failed,
}

#[derive(Default)]
struct SessionState {
    link: LinkState,
    profile: Option<AccountProfile>,
    destination: Destination,
    voice: VoicePhase,
    voice_target: Option<VoiceTarget>,
    closed: bool,
}

/// One account's connection plus its readiness and sub-states.
pub struct Session {
    credential: Credential,
    client: Arc<dyn ChatClient>,
    state: Mutex<SessionState>,
    // Serializes logins so concurrent callers share one attempt.
    login_gate: Mutex<()>,
}

impl Session {
    fn new(credential: Credential, client: Arc<dyn ChatClient>) -> Self {
        Self {
            credential,
            client,
            state: Mutex::new(SessionState::default()),
            login_gate: Mutex::new(()),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Account tag once known, masked credential before that.
    pub async fn label(&self) -> String {
        let st = self.state.lock().await;
        st.profile
            .as_ref()
            .map(|p| p.tag.clone())
            .unwrap_or_else(|| self.credential.masked())
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(Error::SessionClosed(self.credential.masked()));
        }
        Ok(())
    }

    /// Log in unless the connection is already authenticated.
    pub async fn authenticate(&self) -> Result<()> {
        let _gate = self.login_gate.lock().await;
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(Error::SessionClosed(self.credential.masked()));
            }
            if st.link == LinkState::Authenticated && self.client.is_connected() {
                return Ok(());
            }
            st.link = LinkState::Authenticating;
        }

        let res = self.client.login(&self.credential).await;

        let mut st = self.state.lock().await;
        if st.closed {
            return Err(Error::SessionClosed(self.credential.masked()));
        }
        match res {
            Ok(profile) => {
                debug!(account = %profile.tag, "session authenticated");
                st.link = LinkState::Authenticated;
                st.profile = Some(profile);
                Ok(())
            }
            Err(e) => {
                st.link = LinkState::Failed;
                Err(e)
            }
        }
    }

    pub async fn link_state(&self) -> LinkState {
        self.state.lock().await.link
    }

    pub async fn is_authenticated(&self) -> bool {
        let st = self.state.lock().await;
        !st.closed && st.link == LinkState::Authenticated && self.client.is_connected()
    }

    /// Fetch the dispatch destination. A failure marks the session `Failed`.
    pub async fn resolve_destination(&self, channel_id: &ChannelId) -> Result<()> {
        self.ensure_open().await?;
        let res = self.client.fetch_channel(channel_id).await;

        let mut st = self.state.lock().await;
        if st.closed {
            return Err(Error::SessionClosed(self.credential.masked()));
        }
        match res {
            Ok(channel) => {
                st.destination = Destination::Resolved(channel);
                Ok(())
            }
            Err(e) => {
                st.destination = Destination::Failed;
                Err(e)
            }
        }
    }

    pub async fn dispatch_phase(&self) -> DispatchPhase {
        let st = self.state.lock().await;
        match (&st.link, &st.destination) {
            (LinkState::Failed, _) | (_, Destination::Failed) => DispatchPhase::Failed,
            (LinkState::Authenticated, Destination::Resolved(_)) => DispatchPhase::Ready,
            (LinkState::Authenticating, _) => DispatchPhase::Authenticating,
            (LinkState::Authenticated, Destination::Unresolved) => DispatchPhase::Authenticating,
            (LinkState::Unauthenticated, _) => DispatchPhase::Unauthenticated,
        }
    }

    /// Ready for dispatch and still connected. A dropped connection simply
    /// stops being ready; nothing reconnects it.
    pub async fn is_dispatch_ready(&self) -> bool {
        let st = self.state.lock().await;
        !st.closed
            && st.link == LinkState::Authenticated
            && matches!(st.destination, Destination::Resolved(_))
            && self.client.is_connected()
    }

    pub async fn send_to_destination(&self, text: &str) -> Result<()> {
        let channel = {
            let st = self.state.lock().await;
            if st.closed {
                return Err(Error::SessionClosed(self.credential.masked()));
            }
            match &st.destination {
                Destination::Resolved(ch) => ch.clone(),
                _ => {
                    return Err(Error::External(format!(
                        "{} has no resolved destination",
                        self.credential
                    )))
                }
            }
        };
        channel.send(text).await
    }

    pub async fn set_status(&self, status: PresenceStatus) -> Result<()> {
        self.ensure_open().await?;
        self.client.set_status(status).await
    }

    pub async fn cached_guild(&self, guild_id: &GuildId) -> Result<Option<CachedGuild>> {
        self.ensure_open().await?;
        Ok(self.client.cached_guild(guild_id))
    }

    /// Write a gateway frame on the shard owning `guild` for this account.
    pub async fn send_gateway(&self, guild: &CachedGuild, command: &GatewayCommand) -> Result<()> {
        self.ensure_open().await?;
        let shard = guild
            .shard_id
            .and_then(|id| self.client.shard(id))
            .or_else(|| self.client.first_shard())
            .ok_or_else(|| Error::NotCached(format!("no shard available for {}", guild.id)))?;
        shard.send(command)
    }

    pub async fn voice_phase(&self) -> VoicePhase {
        self.state.lock().await.voice
    }

    pub async fn set_voice_phase(&self, phase: VoicePhase) {
        self.state.lock().await.voice = phase;
    }

    pub async fn voice_target(&self) -> Option<VoiceTarget> {
        self.state.lock().await.voice_target.clone()
    }

    pub async fn set_voice_target(&self, target: Option<VoiceTarget>) {
        self.state.lock().await.voice_target = target;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Mark closed, then log out. Only the registry calls this.
    async fn close(&self) -> Result<()> {
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return Ok(());
            }
            st.closed = true;
            st.destination = Destination::Unresolved;
            st.voice = VoicePhase::Idle;
        }
        self.client.logout().await
    }
}

/// Owns one session per credential.
pub struct SessionRegistry {
    factory: Arc<dyn ClientFactory>,
    // Insertion order is the account order callers see from `list()`.
    sessions: Mutex<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Return the session for `credential`, creating it on first use.
    pub async fn create(&self, credential: &Credential) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.iter().find(|s| &s.credential == credential) {
            return existing.clone();
        }
        let client = self.factory.create(credential);
        let session = Arc::new(Session::new(credential.clone(), client));
        sessions.push(session.clone());
        debug!(account = %credential, "session created");
        session
    }

    pub async fn get(&self, credential: &Credential) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|s| &s.credential == credential)
            .cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remove and log out one session. Logout failures are logged, never returned.
    pub async fn destroy(&self, credential: &Credential) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            let idx = sessions.iter().position(|s| &s.credential == credential);
            idx.map(|i| sessions.remove(i))
        };
        let Some(session) = removed else {
            return false;
        };
        close_all(vec![session]).await;
        true
    }

    /// Remove the given sessions and log them out concurrently.
    pub async fn destroy_many(&self, credentials: &[Credential]) -> usize {
        let removed: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let mut out = Vec::new();
            sessions.retain(|s| {
                if credentials.contains(&s.credential) {
                    out.push(s.clone());
                    false
                } else {
                    true
                }
            });
            out
        };
        close_all(removed).await
    }

    pub async fn destroy_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.sessions.lock().await);
        close_all(removed).await
    }
}

async fn close_quietly(session: Arc<Session>) {
    if let Err(e) = session.close().await {
        warn!(account = %session.credential, "logout failed (ignored): {e}");
    }
}

/// How long teardown waits for logouts before leaving them to finish alone.
pub const LOGOUT_GRACE: Duration = Duration::from_secs(2);

/// Close sessions concurrently. Each close runs in its own task; a logout
/// still pending after [`LOGOUT_GRACE`] keeps running detached.
async fn close_all(sessions: Vec<Arc<Session>>) -> usize {
    let count = sessions.len();
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|session| tokio::spawn(close_quietly(session)))
        .collect();

    let settled = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(LOGOUT_GRACE, settled).await.is_err() {
        warn!(count, "logouts still pending; continuing without them");
    }
    if count > 0 {
        info!(count, "sessions destroyed");
    }
    count
}
