use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{
    GatewayMessage, GatewayOp, EVENT_MESSAGE_STATUS, EVENT_READY, EVENT_USER_OFFLINE,
    EVENT_USER_ONLINE, EVENT_USER_TYPING,
};
use crate::{
    auth::validate_token,
    cache::online_presence_key,
    models::{Conversation, User, UserDto},
    services::delivery_service,
    state::AppState,
};

/// Online presence entries are refreshed on every heartbeat and expire if a
/// client goes silent without a clean disconnect (e.g. a dropped TCP
/// connection the server hasn't noticed yet).
const PRESENCE_TTL: Duration = Duration::from_secs(45);

// ============================================================================
// Query params
// ============================================================================

/// The bearer token is passed as a query parameter because WebSocket upgrade
/// requests are plain GET requests and cannot reliably carry an Authorization
/// header across every client runtime (browsers in particular).
///
/// Note: query-parameter tokens appear in server and proxy access logs; use
/// short-lived access tokens to limit exposure.
#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    pub token: String,
}

// ============================================================================
// Upgrade handler
// ============================================================================

/// GET /ws?token=<bearer_token> — upgrade to a WebSocket connection.
///
/// The token is validated locally before the upgrade is accepted (no
/// identity-provider round-trip per connection); invalid tokens get a plain
/// 401 without an upgrade attempt.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let claims = match validate_token(&params.token, &state.jwt_secret) {
        Ok(c) => c,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response();
        }
    };

    let user = match crate::auth::upsert_user_from_claims(&state.pool, &claims).await {
        Ok(u) => u,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "Failed to resolve user identity").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user.id, state))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Build and send READY before registering so the client receives user
    // context before any events can arrive.
    let ready_json = match build_ready(&state, user_id).await {
        Some(json) => json,
        None => {
            tracing::warn!(
                user_id = %user_id,
                "Failed to build READY payload; closing connection"
            );
            return;
        }
    };

    if ws_sender.send(Message::Text(ready_json)).await.is_err() {
        // Client disconnected before READY could be sent.
        return;
    }

    // Register connection and go online *after* READY is delivered, so no
    // broadcast events can arrive before the client has its initial state.
    let session_id = state.connections.add(user_id, tx).await;
    auto_join_conversations(&state, session_id, user_id).await;
    set_presence(&state, user_id, true).await;
    promote_pending_deliveries(&state, user_id).await;

    // Forward outbound events from the mpsc channel to the WebSocket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Handle inbound messages from the client.
    let state_clone = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        handle_client_message(session_id, user_id, &text, &state_clone).await;
                    }
                    Message::Close(_) => break,
                    // Axum handles Pong frames automatically; Ping frames are
                    // echoed back transparently by the underlying library.
                    _ => {}
                },
                Some(Err(e)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        error = ?e,
                        "WebSocket receive error; closing connection"
                    );
                    break;
                }
                None => break,
            }
        }
    });

    // Wait for either task to finish — then abort the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Clean up on disconnect.
    let was_last_session = state.connections.remove(user_id, session_id).await;
    if was_last_session {
        set_presence(&state, user_id, false).await;
    }
}

// ============================================================================
// Inbound message handling
// ============================================================================

/// Process a text frame received from the client.
async fn handle_client_message(session_id: Uuid, user_id: Uuid, text: &str, state: &AppState) {
    let Ok(msg) = serde_json::from_str::<GatewayMessage>(text) else {
        // Ignore unparseable frames — don't disconnect for bad JSON.
        return;
    };

    match msg.op {
        GatewayOp::Heartbeat => {
            // Every heartbeat refreshes the presence TTL so silently dead
            // connections age out of the online set.
            state
                .cache
                .mark_present(online_presence_key(user_id), PRESENCE_TTL)
                .await;
            let ack = GatewayMessage::heartbeat_ack();
            if let Some(json) = ack.to_json() {
                state.connections.send_to_user(user_id, &json).await;
            }
        }
        GatewayOp::JoinConversation => {
            if let Some(conversation_id) = msg.d.as_ref().and_then(parse_conversation_id) {
                if is_member(state, conversation_id, user_id).await {
                    state
                        .connections
                        .join_conversation(session_id, conversation_id)
                        .await;
                }
            }
        }
        GatewayOp::LeaveConversation => {
            if let Some(conversation_id) = msg.d.as_ref().and_then(parse_conversation_id) {
                state
                    .connections
                    .leave_conversation(session_id, conversation_id)
                    .await;
            }
        }
        GatewayOp::TypingStart => {
            handle_typing(state, user_id, msg.d.as_ref(), true).await;
        }
        GatewayOp::TypingStop => {
            handle_typing(state, user_id, msg.d.as_ref(), false).await;
        }
        // Client should not send Dispatch or HeartbeatAck — silently ignore.
        _ => {}
    }
}

fn parse_conversation_id(data: &serde_json::Value) -> Option<Uuid> {
    data.get("conversation_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

async fn is_member(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(&state.pool)
    .await
    .unwrap_or(false)
}

async fn handle_typing(state: &AppState, user_id: Uuid, data: Option<&serde_json::Value>, is_typing: bool) {
    let Some(conversation_id) = data.and_then(parse_conversation_id) else {
        return;
    };
    if !is_member(state, conversation_id, user_id).await {
        return;
    }
    super::broadcast_to_conversation(
        state,
        conversation_id,
        EVENT_USER_TYPING,
        json!({ "conversation_id": conversation_id, "user_id": user_id, "is_typing": is_typing }),
    )
    .await;
}

/// Subscribe a freshly connected session to every conversation room the user
/// is currently a member of, so message/status/reaction events reach them
/// without requiring the client to issue an explicit join for each.
async fn auto_join_conversations(state: &AppState, session_id: Uuid, user_id: Uuid) {
    let conversation_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT conversation_id FROM conversation_members WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    .unwrap_or_default();

    for conversation_id in conversation_ids {
        state
            .connections
            .join_conversation(session_id, conversation_id)
            .await;
    }
}

/// Flip every message still marked `sent` for this user to `delivered` now
/// that they have an active connection, and tell each affected conversation
/// so senders see the receipt without waiting on a poll.
async fn promote_pending_deliveries(state: &AppState, user_id: Uuid) {
    let promoted = match delivery_service::promote_all_on_connect(state, user_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = ?e,
                "Failed to promote pending deliveries on connect"
            );
            return;
        }
    };

    for (message_id, conversation_id) in promoted {
        super::broadcast_to_conversation(
            state,
            conversation_id,
            EVENT_MESSAGE_STATUS,
            json!({ "message_id": message_id, "user_id": user_id, "status": "delivered" }),
        )
        .await;
    }
}

// ============================================================================
// READY event
// ============================================================================

/// Build the READY event payload for the connecting user.
///
/// Returns `None` if the user no longer exists in the database or if a
/// database error occurs. Either case is treated as fatal for this
/// connection's READY handshake.
async fn build_ready(state: &AppState, user_id: Uuid) -> Option<String> {
    let user: UserDto = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        .ok()??
        .into();

    let conversations = sqlx::query_as::<_, Conversation>(
        "SELECT c.* FROM conversations c
         JOIN conversation_members cm ON c.id = cm.conversation_id
         WHERE cm.user_id = $1
         ORDER BY c.updated_at DESC",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    .unwrap_or_default();

    let payload = GatewayMessage::dispatch(
        EVENT_READY,
        json!({ "user": user, "conversations": conversations }),
    );

    payload.to_json()
}

// ============================================================================
// Presence
// ============================================================================

/// Mark a user online/offline in the shared presence cache and broadcast the
/// transition to everyone who shares a conversation with them. Co-members
/// without an active WebSocket connection are silently skipped by
/// `broadcast_to_members`.
pub async fn set_presence(state: &AppState, user_id: Uuid, online: bool) {
    let key = online_presence_key(user_id);
    if online {
        state.cache.mark_present(key, PRESENCE_TTL).await;
    } else {
        state.cache.clear_present(&key).await;
    }

    let co_member_ids: Vec<Uuid> = match sqlx::query_scalar(
        "SELECT DISTINCT cm2.user_id
         FROM conversation_members cm1
         JOIN conversation_members cm2 ON cm1.conversation_id = cm2.conversation_id
         WHERE cm1.user_id = $1 AND cm2.user_id != $1",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = ?e,
                "Failed to fetch co-members for presence broadcast; update will not be delivered"
            );
            return;
        }
    };

    let event_type = if online { EVENT_USER_ONLINE } else { EVENT_USER_OFFLINE };
    super::broadcast_to_members(
        state,
        &co_member_ids,
        event_type,
        json!({ "user_id": user_id }),
    )
    .await;
}
