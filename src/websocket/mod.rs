pub mod connection_manager;
pub mod events;
pub mod handler;

pub use connection_manager::ConnectionManager;
pub use handler::websocket_handler;

use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;

/// Broadcast a gateway DISPATCH event to every session currently subscribed
/// to a conversation's room. Used for events whose audience is exactly "who
/// is currently looking at this conversation" — new messages, edits,
/// deletes, status changes, reactions, typing, and poll activity.
pub async fn broadcast_to_conversation(
    state: &AppState,
    conversation_id: Uuid,
    event_type: &str,
    data: Value,
) {
    let event = events::GatewayMessage::dispatch(event_type, data);
    match event.to_json() {
        Some(json) => {
            state
                .connections
                .broadcast_to_conversation(conversation_id, &json)
                .await;
        }
        None => {
            tracing::error!(
                conversation_id = %conversation_id,
                event_type = %event_type,
                "Failed to serialize gateway event; this is a programming error"
            );
        }
    }
}

/// Broadcast a gateway DISPATCH event directly to a set of user ids across
/// every device they have connected, regardless of conversation-room
/// membership. Used for events that change room membership itself (a member
/// being added needs the event before they could plausibly have joined the
/// room) and for conversation-level metadata updates.
pub async fn broadcast_to_members(
    state: &AppState,
    member_ids: &[Uuid],
    event_type: &str,
    data: Value,
) {
    let event = events::GatewayMessage::dispatch(event_type, data);
    match event.to_json() {
        Some(json) => {
            state.connections.broadcast_to_users(member_ids, &json).await;
        }
        None => {
            tracing::error!(
                event_type = %event_type,
                "Failed to serialize gateway event; this is a programming error"
            );
        }
    }
}

/// Send a gateway DISPATCH event to a single user across every device.
pub async fn send_to_user(state: &AppState, user_id: Uuid, event_type: &str, data: Value) {
    let event = events::GatewayMessage::dispatch(event_type, data);
    match event.to_json() {
        Some(json) => {
            state.connections.send_to_user(user_id, &json).await;
        }
        None => {
            tracing::error!(
                user_id = %user_id,
                event_type = %event_type,
                "Failed to serialize gateway event; this is a programming error"
            );
        }
    }
}
