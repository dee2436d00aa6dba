use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for all gateway messages (both client→server and server→client).
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: GatewayOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    pub fn dispatch(event_type: &str, data: Value) -> Self {
        Self {
            op: GatewayOp::Dispatch,
            t: Some(event_type.to_owned()),
            d: Some(data),
        }
    }

    pub fn heartbeat_ack() -> Self {
        Self {
            op: GatewayOp::HeartbeatAck,
            t: None,
            d: None,
        }
    }

    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Opcode discriminator for the gateway protocol.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOp {
    /// Server → client: a named event with a payload.
    Dispatch,
    /// Client → server: keepalive ping.
    Heartbeat,
    /// Server → client: reply to a HEARTBEAT.
    HeartbeatAck,
    /// Client → server: subscribe to a conversation's room.
    JoinConversation,
    /// Client → server: unsubscribe from a conversation's room.
    LeaveConversation,
    /// Client → server: the user started typing in a conversation.
    TypingStart,
    /// Client → server: the user stopped typing in a conversation.
    TypingStop,
}

// ── Server-to-client event type strings ──────────────────────────────────────

pub const EVENT_READY: &str = "READY";
pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_MESSAGE_EDITED: &str = "message:edited";
pub const EVENT_MESSAGE_DELETED: &str = "message:deleted";
pub const EVENT_MESSAGE_STATUS: &str = "message:status";
pub const EVENT_REACTION_ADDED: &str = "reaction:added";
pub const EVENT_REACTION_REMOVED: &str = "reaction:removed";
pub const EVENT_USER_TYPING: &str = "user_typing";
pub const EVENT_USER_ONLINE: &str = "user:online";
pub const EVENT_USER_OFFLINE: &str = "user:offline";
pub const EVENT_CONVERSATION_UPDATED: &str = "conversation_updated";
pub const EVENT_MEMBER_ADDED: &str = "member_added";
pub const EVENT_MEMBER_REMOVED: &str = "member_removed";
pub const EVENT_MEMBER_LEFT: &str = "member_left";
pub const EVENT_NEW_POLL: &str = "new_poll";
pub const EVENT_POLL_VOTE: &str = "poll_vote";
pub const EVENT_POLL_CLOSED: &str = "poll_closed";
pub const EVENT_SENDER_KEY_DISTRIBUTION: &str = "sender_key_distribution";
