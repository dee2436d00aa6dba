use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Mutating commands processed one at a time by the connection-manager actor.
///
/// All state mutation for the fanout plane happens inside the actor's loop,
/// never through a mutex shared across arbitrary tasks — handlers and the
/// WebSocket tasks only ever hold a cloneable handle that sends commands down
/// a channel.
enum Command {
    AddSession {
        session_id: Uuid,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<String>,
    },
    /// Returns the owning user id and whether this was their last session.
    RemoveSession {
        session_id: Uuid,
        reply: oneshot::Sender<Option<(Uuid, bool)>>,
    },
    JoinConversation {
        session_id: Uuid,
        conversation_id: Uuid,
    },
    LeaveConversation {
        session_id: Uuid,
        conversation_id: Uuid,
    },
    SendToUser {
        user_id: Uuid,
        message: String,
    },
    SendToUsers {
        user_ids: Vec<Uuid>,
        message: String,
    },
    SendToConversation {
        conversation_id: Uuid,
        message: String,
    },
    IsUserOnline {
        user_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    SessionCount {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Default)]
struct ActorState {
    /// session_id -> (user_id, outbound sender)
    sessions: HashMap<Uuid, (Uuid, mpsc::UnboundedSender<String>)>,
    /// user_id -> set of session_ids (multi-device)
    user_sessions: HashMap<Uuid, HashSet<Uuid>>,
    /// conversation_id -> set of session_ids subscribed to that room
    conversation_sessions: HashMap<Uuid, HashSet<Uuid>>,
    /// session_id -> set of conversation_ids it has joined, for O(1) cleanup on disconnect
    session_conversations: HashMap<Uuid, HashSet<Uuid>>,
}

impl ActorState {
    fn add_session(&mut self, session_id: Uuid, user_id: Uuid, tx: mpsc::UnboundedSender<String>) {
        self.sessions.insert(session_id, (user_id, tx));
        self.user_sessions.entry(user_id).or_default().insert(session_id);
    }

    fn remove_session(&mut self, session_id: Uuid) -> Option<(Uuid, bool)> {
        let (user_id, _) = self.sessions.remove(&session_id)?;

        if let Some(set) = self.user_sessions.get_mut(&user_id) {
            set.remove(&session_id);
            if set.is_empty() {
                self.user_sessions.remove(&user_id);
            }
        }

        if let Some(conversations) = self.session_conversations.remove(&session_id) {
            for conv in conversations {
                if let Some(set) = self.conversation_sessions.get_mut(&conv) {
                    set.remove(&session_id);
                    if set.is_empty() {
                        self.conversation_sessions.remove(&conv);
                    }
                }
            }
        }

        let was_last = !self.user_sessions.contains_key(&user_id);
        Some((user_id, was_last))
    }

    fn join_conversation(&mut self, session_id: Uuid, conversation_id: Uuid) {
        if !self.sessions.contains_key(&session_id) {
            return;
        }
        self.conversation_sessions
            .entry(conversation_id)
            .or_default()
            .insert(session_id);
        self.session_conversations
            .entry(session_id)
            .or_default()
            .insert(conversation_id);
    }

    fn leave_conversation(&mut self, session_id: Uuid, conversation_id: Uuid) {
        if let Some(set) = self.conversation_sessions.get_mut(&conversation_id) {
            set.remove(&session_id);
            if set.is_empty() {
                self.conversation_sessions.remove(&conversation_id);
            }
        }
        if let Some(set) = self.session_conversations.get_mut(&session_id) {
            set.remove(&conversation_id);
        }
    }

    fn send_to_user(&self, user_id: Uuid, message: &str) {
        if let Some(sessions) = self.user_sessions.get(&user_id) {
            for session_id in sessions {
                if let Some((_, tx)) = self.sessions.get(session_id) {
                    let _ = tx.send(message.to_owned());
                }
            }
        }
    }

    fn send_to_users(&self, user_ids: &[Uuid], message: &str) {
        for user_id in user_ids {
            self.send_to_user(*user_id, message);
        }
    }

    fn send_to_conversation(&self, conversation_id: Uuid, message: &str) {
        if let Some(sessions) = self.conversation_sessions.get(&conversation_id) {
            for session_id in sessions {
                if let Some((_, tx)) = self.sessions.get(session_id) {
                    let _ = tx.send(message.to_owned());
                }
            }
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = ActorState::default();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::AddSession { session_id, user_id, tx } => {
                state.add_session(session_id, user_id, tx);
            }
            Command::RemoveSession { session_id, reply } => {
                let _ = reply.send(state.remove_session(session_id));
            }
            Command::JoinConversation { session_id, conversation_id } => {
                state.join_conversation(session_id, conversation_id);
            }
            Command::LeaveConversation { session_id, conversation_id } => {
                state.leave_conversation(session_id, conversation_id);
            }
            Command::SendToUser { user_id, message } => {
                state.send_to_user(user_id, &message);
            }
            Command::SendToUsers { user_ids, message } => {
                state.send_to_users(&user_ids, &message);
            }
            Command::SendToConversation { conversation_id, message } => {
                state.send_to_conversation(conversation_id, &message);
            }
            Command::IsUserOnline { user_id, reply } => {
                let _ = reply.send(state.user_sessions.contains_key(&user_id));
            }
            Command::SessionCount { reply } => {
                let _ = reply.send(state.sessions.len());
            }
        }
    }
}

/// Handle to the connection-manager actor. Cheaply cloneable — all clones
/// send commands to the same underlying task.
#[derive(Clone)]
pub struct ConnectionManager {
    tx: mpsc::UnboundedSender<Command>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Register a new session for `user_id`. Returns a fresh `session_id` the
    /// caller uses for subsequent join/leave/remove calls.
    pub async fn add(&self, user_id: Uuid, outbound: mpsc::UnboundedSender<String>) -> Uuid {
        let session_id = Uuid::new_v4();
        let _ = self.tx.send(Command::AddSession {
            session_id,
            user_id,
            tx: outbound,
        });
        session_id
    }

    /// Remove a session (on disconnect). Returns `true` if this was the
    /// user's last open session (i.e. they are now fully offline).
    pub async fn remove(&self, _user_id: Uuid, session_id: Uuid) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::RemoveSession {
                session_id,
                reply: reply_tx,
            })
            .is_err()
        {
            return true;
        }
        matches!(reply_rx.await, Ok(Some((_, was_last))) if was_last)
    }

    pub async fn join_conversation(&self, session_id: Uuid, conversation_id: Uuid) {
        let _ = self.tx.send(Command::JoinConversation {
            session_id,
            conversation_id,
        });
    }

    pub async fn leave_conversation(&self, session_id: Uuid, conversation_id: Uuid) {
        let _ = self.tx.send(Command::LeaveConversation {
            session_id,
            conversation_id,
        });
    }

    /// Send a JSON-serialized message to every live session of `user_id`.
    /// Silently a no-op if the user has no open sessions.
    pub async fn send_to_user(&self, user_id: Uuid, message: &str) {
        let _ = self.tx.send(Command::SendToUser {
            user_id,
            message: message.to_owned(),
        });
    }

    pub async fn broadcast_to_users(&self, user_ids: &[Uuid], message: &str) {
        let _ = self.tx.send(Command::SendToUsers {
            user_ids: user_ids.to_vec(),
            message: message.to_owned(),
        });
    }

    /// Send to every session currently subscribed to `conversation_id`'s room.
    pub async fn broadcast_to_conversation(&self, conversation_id: Uuid, message: &str) {
        let _ = self.tx.send(Command::SendToConversation {
            conversation_id,
            message: message.to_owned(),
        });
    }

    pub async fn is_user_online(&self, user_id: Uuid) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::IsUserOnline {
                user_id,
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    #[allow(dead_code)]
    pub async fn session_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::SessionCount { reply: reply_tx }).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn add_and_is_user_online() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx, _rx) = make_channel();

        assert!(!mgr.is_user_online(user).await);
        mgr.add(user, tx).await;
        assert!(mgr.is_user_online(user).await);
    }

    #[tokio::test]
    async fn remove_last_session_reports_offline() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx, _rx) = make_channel();

        let session = mgr.add(user, tx).await;
        let was_last = mgr.remove(user, session).await;
        assert!(was_last);
        assert!(!mgr.is_user_online(user).await);
    }

    #[tokio::test]
    async fn multi_device_stays_online_until_last_session_removed() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let s1 = mgr.add(user, tx1).await;
        let s2 = mgr.add(user, tx2).await;

        let was_last = mgr.remove(user, s1).await;
        assert!(!was_last, "user still has a second session");
        assert!(mgr.is_user_online(user).await);

        let was_last = mgr.remove(user, s2).await;
        assert!(was_last);
        assert!(!mgr.is_user_online(user).await);
    }

    #[tokio::test]
    async fn send_to_user_reaches_all_sessions() {
        let mgr = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = make_channel();
        let (tx2, mut rx2) = make_channel();

        mgr.add(user, tx1).await;
        mgr.add(user, tx2).await;
        mgr.send_to_user(user, "hello").await;

        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_to_disconnected_user_is_noop() {
        let mgr = ConnectionManager::new();
        mgr.send_to_user(Uuid::new_v4(), "dropped").await;
    }

    #[tokio::test]
    async fn broadcast_to_users_sends_to_all_connected() {
        let mgr = ConnectionManager::new();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let u3 = Uuid::new_v4(); // not connected

        let (tx1, mut rx1) = make_channel();
        let (tx2, mut rx2) = make_channel();
        mgr.add(u1, tx1).await;
        mgr.add(u2, tx2).await;

        mgr.broadcast_to_users(&[u1, u2, u3], "broadcast").await;

        assert_eq!(rx1.recv().await.unwrap(), "broadcast");
        assert_eq!(rx2.recv().await.unwrap(), "broadcast");
    }

    #[tokio::test]
    async fn conversation_room_receives_only_joined_sessions() {
        let mgr = ConnectionManager::new();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let conv = Uuid::new_v4();

        let (tx1, mut rx1) = make_channel();
        let (tx2, mut rx2) = make_channel();
        let s1 = mgr.add(u1, tx1).await;
        let _s2 = mgr.add(u2, tx2).await;

        mgr.join_conversation(s1, conv).await;
        mgr.broadcast_to_conversation(conv, "room-event").await;

        assert_eq!(rx1.recv().await.unwrap(), "room-event");
        assert!(rx2.try_recv().is_err(), "u2 never joined the room");
    }

    #[tokio::test]
    async fn leave_conversation_stops_further_delivery() {
        let mgr = ConnectionManager::new();
        let u1 = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let (tx1, mut rx1) = make_channel();
        let s1 = mgr.add(u1, tx1).await;

        mgr.join_conversation(s1, conv).await;
        mgr.leave_conversation(s1, conv).await;
        mgr.broadcast_to_conversation(conv, "should-not-arrive").await;

        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_cleans_up_room_membership() {
        let mgr = ConnectionManager::new();
        let u1 = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let (tx1, _rx1) = make_channel();
        let s1 = mgr.add(u1, tx1).await;

        mgr.join_conversation(s1, conv).await;
        mgr.remove(u1, s1).await;

        // Room membership is gone; broadcasting must not panic and reaches no one.
        mgr.broadcast_to_conversation(conv, "anything").await;
        assert_eq!(mgr.session_count().await, 0);
    }

    #[tokio::test]
    async fn session_count_tracks_adds_and_removes() {
        let mgr = ConnectionManager::new();
        assert_eq!(mgr.session_count().await, 0);

        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let s1 = mgr.add(u1, tx1).await;
        assert_eq!(mgr.session_count().await, 1);

        mgr.add(u2, tx2).await;
        assert_eq!(mgr.session_count().await, 2);

        mgr.remove(u1, s1).await;
        assert_eq!(mgr.session_count().await, 1);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let mgr = ConnectionManager::new();
        let clone = mgr.clone();

        let user = Uuid::new_v4();
        let (tx, _rx) = make_channel();

        mgr.add(user, tx).await;
        assert!(clone.is_user_online(user).await);
    }
}
