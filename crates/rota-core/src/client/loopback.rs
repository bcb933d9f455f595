//! In-memory chat platform.
//!
//! Every client created from a [`LoopbackNetwork`] shares one recorded state:
//! sent messages, gateway frames, statuses and logouts. Failure knobs let a
//! caller reject logins, deny channel access, fail sends or drop connections
//! per account.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use crate::{
    client::{
        port::{ChatClient, ClientFactory, GatewayShard, TextChannel},
        types::{AccountProfile, CachedGuild, GatewayCommand},
    },
    domain::{ChannelId, Credential, GuildId, PresenceStatus},
    errors::Error,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub credential: Credential,
    pub channel_id: ChannelId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayFrame {
    pub credential: Credential,
    pub shard_id: u32,
    pub command: GatewayCommand,
}

#[derive(Default)]
struct NetworkState {
    channels: HashSet<ChannelId>,
    guilds: HashMap<GuildId, CachedGuild>,

    rejected_logins: HashSet<Credential>,
    denied_channels: HashSet<Credential>,
    failing_sends: HashSet<Credential>,
    failing_status: HashSet<Credential>,
    dropped: HashSet<Credential>,
    failing_logout: bool,
    hanging_logout: bool,

    clients_created: usize,
    logins: Vec<Credential>,
    sent: Vec<SentMessage>,
    frames: Vec<GatewayFrame>,
    statuses: HashMap<Credential, PresenceStatus>,
    logouts: Vec<Credential>,
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(self.clone())
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === setup ===

    pub fn add_channel(&self, channel_id: ChannelId) {
        self.state().channels.insert(channel_id);
    }

    pub fn add_guild(&self, guild: CachedGuild) {
        self.state().guilds.insert(guild.id.clone(), guild);
    }

    pub fn reject_login(&self, credential: &Credential) {
        self.state().rejected_logins.insert(credential.clone());
    }

    pub fn deny_channels(&self, credential: &Credential) {
        self.state().denied_channels.insert(credential.clone());
    }

    pub fn fail_sends(&self, credential: &Credential) {
        self.state().failing_sends.insert(credential.clone());
    }

    pub fn fail_status(&self, credential: &Credential) {
        self.state().failing_status.insert(credential.clone());
    }

    pub fn fail_logouts(&self) {
        self.state().failing_logout = true;
    }

    /// Logouts are recorded but never complete.
    pub fn hang_logouts(&self) {
        self.state().hanging_logout = true;
    }

    /// Simulate the platform closing this account's connection.
    pub fn drop_connection(&self, credential: &Credential) {
        self.state().dropped.insert(credential.clone());
    }

    // === observations ===

    pub fn clients_created(&self) -> usize {
        self.state().clients_created
    }

    pub fn logins(&self) -> Vec<Credential> {
        self.state().logins.clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn frames(&self) -> Vec<GatewayFrame> {
        self.state().frames.clone()
    }

    pub fn status_of(&self, credential: &Credential) -> Option<PresenceStatus> {
        self.state().statuses.get(credential).copied()
    }

    pub fn logouts(&self) -> Vec<Credential> {
        self.state().logouts.clone()
    }
}

impl ClientFactory for LoopbackNetwork {
    fn create(&self, credential: &Credential) -> Arc<dyn ChatClient> {
        self.state().clients_created += 1;
        Arc::new(LoopbackClient {
            network: self.clone(),
            credential: credential.clone(),
            logged_in: AtomicBool::new(false),
        })
    }
}

pub struct LoopbackClient {
    network: LoopbackNetwork,
    credential: Credential,
    logged_in: AtomicBool,
}

impl LoopbackClient {
    fn require_login(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::External(format!(
                "{} is not connected",
                self.credential
            )))
        }
    }
}

#[async_trait]
impl ChatClient for LoopbackClient {
    async fn login(&self, credential: &Credential) -> Result<AccountProfile> {
        tokio::task::yield_now().await;

        let mut st = self.network.state();
        st.logins.push(credential.clone());
        if st.rejected_logins.contains(credential) {
            return Err(Error::External("login rejected: invalid credential".to_string()));
        }
        drop(st);

        self.logged_in.store(true, Ordering::SeqCst);
        Ok(AccountProfile {
            tag: format!("loopback:{}", credential.masked()),
        })
    }

    fn is_connected(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
            && !self.network.state().dropped.contains(&self.credential)
    }

    async fn fetch_channel(&self, channel_id: &ChannelId) -> Result<Arc<dyn TextChannel>> {
        tokio::task::yield_now().await;
        self.require_login()?;

        let st = self.network.state();
        if st.denied_channels.contains(&self.credential) {
            return Err(Error::External(format!("missing access to {channel_id}")));
        }
        if !st.channels.contains(channel_id) {
            return Err(Error::External(format!("unknown channel {channel_id}")));
        }
        drop(st);

        Ok(Arc::new(LoopbackChannel {
            network: self.network.clone(),
            credential: self.credential.clone(),
            id: channel_id.clone(),
        }))
    }

    fn cached_guild(&self, guild_id: &GuildId) -> Option<CachedGuild> {
        if !self.is_connected() {
            return None;
        }
        self.network.state().guilds.get(guild_id).cloned()
    }

    fn shard(&self, shard_id: u32) -> Option<Arc<dyn GatewayShard>> {
        if !self.is_connected() {
            return None;
        }
        Some(Arc::new(LoopbackShard {
            network: self.network.clone(),
            credential: self.credential.clone(),
            id: shard_id,
        }))
    }

    fn first_shard(&self) -> Option<Arc<dyn GatewayShard>> {
        self.shard(0)
    }

    async fn set_status(&self, status: PresenceStatus) -> Result<()> {
        self.require_login()?;
        let mut st = self.network.state();
        if st.failing_status.contains(&self.credential) {
            return Err(Error::External("presence update rejected".to_string()));
        }
        st.statuses.insert(self.credential.clone(), status);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logged_in.store(false, Ordering::SeqCst);
        let (failing, hanging) = {
            let mut st = self.network.state();
            st.logouts.push(self.credential.clone());
            (st.failing_logout, st.hanging_logout)
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if failing {
            return Err(Error::External("logout failed".to_string()));
        }
        Ok(())
    }
}

struct LoopbackChannel {
    network: LoopbackNetwork,
    credential: Credential,
    id: ChannelId,
}

#[async_trait]
impl TextChannel for LoopbackChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn send(&self, text: &str) -> Result<()> {
        tokio::task::yield_now().await;

        let mut st = self.network.state();
        if st.dropped.contains(&self.credential) {
            return Err(Error::External("connection closed".to_string()));
        }
        if st.failing_sends.contains(&self.credential) {
            return Err(Error::External("send rejected".to_string()));
        }
        st.sent.push(SentMessage {
            credential: self.credential.clone(),
            channel_id: self.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

struct LoopbackShard {
    network: LoopbackNetwork,
    credential: Credential,
    id: u32,
}

impl GatewayShard for LoopbackShard {
    fn id(&self) -> u32 {
        self.id
    }

    fn send(&self, command: &GatewayCommand) -> Result<()> {
        self.network.state().frames.push(GatewayFrame {
            credential: self.credential.clone(),
            shard_id: self.id,
            command: command.clone(),
        });
        Ok(())
    }
}
