use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    client::types::{AccountProfile, CachedGuild, GatewayCommand},
    domain::{ChannelId, Credential, GuildId, PresenceStatus},
    Result,
};

/// A resolved text channel that messages can be sent into.
#[async_trait]
pub trait TextChannel: Send + Sync {
    fn id(&self) -> &ChannelId;

    async fn send(&self, text: &str) -> Result<()>;
}

/// One partition of a client's gateway connection.
///
/// Writes are queued by the connection, so sending does not suspend.
pub trait GatewayShard: Send + Sync {
    fn id(&self) -> u32;

    fn send(&self, command: &GatewayCommand) -> Result<()>;
}

/// One account's connection to the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn login(&self, credential: &Credential) -> Result<AccountProfile>;

    /// False before login, after logout, and once the connection drops.
    fn is_connected(&self) -> bool;

    async fn fetch_channel(&self, channel_id: &ChannelId) -> Result<Arc<dyn TextChannel>>;

    fn cached_guild(&self, guild_id: &GuildId) -> Option<CachedGuild>;

    fn shard(&self, shard_id: u32) -> Option<Arc<dyn GatewayShard>>;

    fn first_shard(&self) -> Option<Arc<dyn GatewayShard>>;

    async fn set_status(&self, status: PresenceStatus) -> Result<()>;

    async fn logout(&self) -> Result<()>;
}

/// Creates a fresh, unauthenticated client for an account.
pub trait ClientFactory: Send + Sync {
    fn create(&self, credential: &Credential) -> Arc<dyn ChatClient>;
}
