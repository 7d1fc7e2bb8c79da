use serde::{Deserialize, Serialize};

use crate::api::MessageResponse;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: String, name: String },

    /// Full newest page of a watched channel, ascending by timestamp.
    /// Replaces whatever the client holds for that window.
    ChannelSnapshot {
        channel_id: String,
        messages: Vec<MessageResponse>,
    },

    /// The crew roster changed (profile saved, heartbeat, removal)
    RosterChanged,

    /// A profile was removed by moderation
    ProfileRemoved { user_id: String },

    /// Retention sweep summary, e.g. "3 old messages cleared"
    CleanupNotice { text: String },
}

impl GatewayEvent {
    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` are global and should be delivered to all clients.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::ChannelSnapshot { channel_id, .. } => Some(channel_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start watching the conversation with a peer. Replaces any previous
    /// watch; the server answers with an immediate snapshot.
    Watch { peer_id: String },

    /// Stop watching any conversation
    Unwatch,
}
