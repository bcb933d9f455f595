use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, GuildId};

/// Gateway opcode for a voice state update.
pub const OP_VOICE_STATE_UPDATE: u8 = 4;

/// Who the platform says we are after login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountProfile {
    pub tag: String,
}

/// A guild as seen in a client's local cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedGuild {
    pub id: GuildId,
    /// Shard that owns this guild for the client; `None` means "first shard".
    pub shard_id: Option<u32>,
    pub channels: Vec<ChannelId>,
}

impl CachedGuild {
    pub fn has_channel(&self, channel_id: &ChannelId) -> bool {
        self.channels.iter().any(|c| c == channel_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    /// `None` serializes as `null`, which leaves the current voice channel.
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// A control frame written directly to a gateway shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCommand {
    pub op: u8,
    pub d: VoiceStateUpdate,
}

impl GatewayCommand {
    pub fn voice_state(guild_id: GuildId, channel_id: Option<ChannelId>) -> Self {
        Self {
            op: OP_VOICE_STATE_UPDATE,
            d: VoiceStateUpdate {
                guild_id,
                channel_id,
                self_mute: false,
                self_deaf: false,
            },
        }
    }

    pub fn is_leave(&self) -> bool {
        self.d.channel_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn voice_state_update_wire_shape() {
        let join = GatewayCommand::voice_state(
            GuildId("10".to_string()),
            Some(ChannelId("20".to_string())),
        );
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({
                "op": 4,
                "d": {"guild_id": "10", "channel_id": "20", "self_mute": false, "self_deaf": false}
            })
        );

        let leave = GatewayCommand::voice_state(GuildId("10".to_string()), None);
        assert!(leave.is_leave());
        assert_eq!(serde_json::to_value(&leave).unwrap()["d"]["channel_id"], json!(null));
    }
}
