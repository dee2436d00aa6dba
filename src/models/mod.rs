use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub is_leader: bool,
    pub settings: serde_json::Value,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDto {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: String,
    pub is_active: bool,
}

impl From<User> for UserDto {
    fn from(u: User) -> Self {
        UserDto {
            id: u.id,
            email: u.email,
            name: u.name,
            image: u.image,
            role: u.role,
            is_active: u.is_active,
        }
    }
}

// ============================================================================
// Conversations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Dm,
    Group,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_object_key: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_muted: bool,
    pub mute_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDto {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub display_name: Option<String>,
    pub display_avatar: Option<String>,
    pub members: Vec<UserDto>,
    pub unread_count: i64,
    pub last_message: Option<MessageDto>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConversationDto {
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[validate(length(min = 1, max = 64))]
    pub member_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateConversationDto {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    File,
    Voice,
    Poll,
    Call,
    System,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub metadata: serde_json::Value,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub sequence_number: i64,
    pub encrypted: bool,
    pub encryption_version: Option<i32>,
    pub sender_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender: Option<UserDto>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub metadata: MessageMetadata,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub sequence_number: i64,
    pub encrypted: bool,
    pub status: Option<DeliveryStatus>,
    pub reactions: Vec<ReactionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageDto {
    pub conversation_id: Uuid,
    #[validate(length(max = 8192))]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub encrypted: bool,
    pub encryption_version: Option<i32>,
    pub sender_key_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageDto {
    #[validate(length(min = 1, max = 8192))]
    pub content: String,
}

// ============================================================================
// Message metadata (wire layer)
// ============================================================================
//
// Storage keeps `Message.metadata` as an untyped `JSONB` bag (see `Message`
// above) since its shape depends on `message_type` and postgres has no sum
// type. The wire layer re-expresses it as a real discriminated union so
// clients never have to sniff a `serde_json::Value` to know what they're
// looking at.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextMeta {
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: i64,
    pub file_url: String,
    pub mime_type: String,
    pub object_key: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<i64>,
    pub encryption: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollMeta {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMeta {
    pub event: String,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageMetadata {
    Text(TextMeta),
    File(FileMeta),
    Poll(PollMeta),
    System(SystemMeta),
    /// `CALL` carries no structured metadata today, and any row whose stored
    /// metadata doesn't match its type's expected shape falls back here
    /// rather than dropping the payload.
    Raw(serde_json::Value),
}

impl MessageMetadata {
    /// Reconstruct the wire-layer union from a message's stored metadata bag.
    pub fn from_stored(message_type: MessageType, raw: serde_json::Value) -> MessageMetadata {
        match message_type {
            MessageType::Text => serde_json::from_value(raw.clone())
                .map(MessageMetadata::Text)
                .unwrap_or_else(|_| MessageMetadata::Text(TextMeta::default())),
            MessageType::Image | MessageType::File | MessageType::Voice => {
                serde_json::from_value(raw.clone())
                    .map(MessageMetadata::File)
                    .unwrap_or(MessageMetadata::Raw(raw))
            }
            MessageType::Poll => serde_json::from_value(raw.clone())
                .map(MessageMetadata::Poll)
                .unwrap_or(MessageMetadata::Raw(raw)),
            MessageType::System => serde_json::from_value(raw.clone())
                .map(MessageMetadata::System)
                .unwrap_or(MessageMetadata::Raw(raw)),
            MessageType::Call => MessageMetadata::Raw(raw),
        }
    }
}

// ============================================================================
// Delivery status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageStatus {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Reactions
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageReaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: i64,
    pub me: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddReactionDto {
    #[validate(length(min = 1, max = 64))]
    pub emoji: String,
}

// ============================================================================
// Per-user deletion
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDeletedMessage {
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

// ============================================================================
// Polls
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub message_id: Uuid,
    pub question: String,
    pub multiple_choice: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_text: String,
    pub position: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PollVote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollOptionDto {
    pub id: Uuid,
    pub option_text: String,
    pub position: i32,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollDto {
    pub id: Uuid,
    pub message_id: Uuid,
    pub question: String,
    pub multiple_choice: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub options: Vec<PollOptionDto>,
    pub my_option_ids: Vec<Uuid>,
    pub total_votes: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePollDto {
    pub conversation_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub question: String,
    #[validate(length(min = 2, max = 20))]
    pub options: Vec<String>,
    #[serde(default)]
    pub multiple_choice: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VotePollDto {
    #[validate(length(min = 1, max = 20))]
    pub option_ids: Vec<Uuid>,
}

// ============================================================================
// Encryption
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserKeyBundle {
    pub user_id: Uuid,
    pub identity_key: String,
    pub signed_prekey: String,
    pub signed_prekey_signature: String,
    pub signed_prekey_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub prekey_id: i32,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyBundleDto {
    pub user_id: Uuid,
    pub identity_key: String,
    pub signed_prekey: String,
    pub signed_prekey_signature: String,
    pub signed_prekey_id: i32,
    pub one_time_prekey: Option<OneTimePreKeyDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OneTimePreKeyDto {
    pub prekey_id: i32,
    pub public_key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UploadKeyBundleDto {
    #[validate(length(min = 1))]
    pub identity_key: String,
    #[validate(length(min = 1))]
    pub signed_prekey: String,
    #[validate(length(min = 1))]
    pub signed_prekey_signature: String,
    pub signed_prekey_id: i32,
    #[serde(default)]
    pub one_time_prekeys: Vec<OneTimePreKeyUpload>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OneTimePreKeyUpload {
    pub prekey_id: i32,
    #[validate(length(min = 1))]
    pub public_key: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddPreKeysDto {
    #[validate(length(min = 1, max = 200))]
    pub prekeys: Vec<OneTimePreKeyUpload>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupSenderKey {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_key_id: String,
    pub public_key: String,
    pub chain_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DistributeSenderKeyDto {
    pub conversation_id: Uuid,
    #[validate(length(min = 1))]
    pub sender_key_id: String,
    #[validate(length(min = 1))]
    pub public_key: String,
    pub chain_key: Option<String>,
    #[validate(length(min = 1, max = 512))]
    pub recipient_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KeyBackup {
    pub user_id: Uuid,
    pub encrypted_data: String,
    pub nonce: String,
    pub salt: String,
    pub kdf_name: String,
    pub version: i32,
    pub identity_key_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UploadKeyBackupDto {
    #[validate(length(min = 1))]
    pub encrypted_data: String,
    #[validate(length(min = 1))]
    pub nonce: String,
    #[validate(length(min = 1))]
    pub salt: String,
    #[validate(length(min = 1))]
    pub kdf_name: String,
    #[validate(length(min = 1))]
    pub identity_key_hash: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConversationKeyBackup {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub encrypted_key: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UploadConversationKeyBackupDto {
    pub conversation_id: Uuid,
    #[validate(length(min = 1))]
    pub encrypted_key: String,
    #[validate(length(min = 1))]
    pub nonce: String,
}

// ============================================================================
// Notifications / mute
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub mention_only: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateNotificationPreferencesDto {
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub mention_only: Option<bool>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MutedConversation {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub muted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MuteConversationDto {
    pub until: Option<DateTime<Utc>>,
}

// ============================================================================
// Blocking
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserBlock {
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Pagination envelope
// ============================================================================

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl PageParams {
    pub fn limit_or_default(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }
}
