use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{conversation_participants, conversations, messages, users};

/// Longest message body accepted, counted in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Normalised key for a two-party conversation, smaller id first.
pub fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

// --- Conversation ---

#[derive(Debug, Queryable, Identifiable, Selectable, Serialize, Clone, PartialEq)]
#[diesel(table_name = conversations)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    #[serde(skip)]
    pub user_low: i64,
    #[serde(skip)]
    pub user_high: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub user_low: i64,
    pub user_high: i64,
}

impl NewConversation {
    pub fn between(a: i64, b: i64) -> Self {
        let (user_low, user_high) = pair_key(a, b);
        Self { user_low, user_high }
    }
}

// --- ConversationParticipant ---

#[derive(Debug, Queryable, Identifiable, Selectable, Serialize, Clone, PartialEq)]
#[diesel(table_name = conversation_participants)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParticipant {
    pub id: i64,
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversation_participants)]
pub struct NewConversationParticipant {
    pub conversation_id: i64,
    pub user_id: i64,
}

// --- Message ---

#[derive(Debug, Queryable, Identifiable, Selectable, Serialize, Clone, PartialEq)]
#[diesel(table_name = messages)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// --- User (owned by the identity service, read-only here) ---

#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub profile_image: Option<String>,
}

// --- Views ---

/// A message joined with its sender's public profile.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<UserProfile>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<UserProfile>,
}

/// Outcome of resolving the conversation between two users.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConversation {
    #[serde(flatten)]
    pub conversation: ConversationDetail,
    pub is_new: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: Option<UserProfile>,
}

/// One row of a user's inbox.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub other_user: Option<UserProfile>,
    pub other_user_online: bool,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: i64,
    pub read_by: i64,
    pub read_at: DateTime<Utc>,
    pub marked: u64,
}
