//! Persistence seams for the conversation core.
//!
//! [`ChatStore`] owns conversations, participants and messages.
//! [`UserDirectory`] is the read-only view onto the identity service's users.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use plaza_shared::errors::AppResult;

use crate::models::{Conversation, ConversationParticipant, Message, UserProfile};

pub mod pg;
#[cfg(test)]
pub mod memory;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChatStore: Send + Sync {
    /// Cheap round-trip used by the health check.
    fn ping(&self) -> BoxFuture<'_, AppResult<()>>;

    /// Conversation whose participant set is exactly `{a, b}`.
    fn find_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Option<Conversation>>>;

    /// Atomically create a conversation and both participant rows.
    /// Fails with `ErrorCode::Conflict` when the pair already has one.
    fn create_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Conversation>>;

    fn get_conversation(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Conversation>>>;

    /// Conversations the user participates in, most recently updated first.
    fn list_conversations_for_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Vec<Conversation>>>;

    fn list_participants(
        &self,
        conversation_id: i64,
    ) -> BoxFuture<'_, AppResult<Vec<ConversationParticipant>>>;

    fn get_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, AppResult<Option<ConversationParticipant>>>;

    /// Append a message stamped `sent_at` and bump the conversation's
    /// `updated_at` to the same instant.
    ///
    /// Callers stamp `sent_at` from the clock that also writes read markers,
    /// so unread counting never compares two different clocks.
    fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: String,
        sent_at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<Message>>;

    fn last_message(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Message>>>;

    fn count_messages(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<u64>>;

    /// Messages not sent by `user_id` created strictly after `since`
    /// (all of them when `since` is `None`).
    fn count_unread(
        &self,
        conversation_id: i64,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, AppResult<u64>>;

    /// Page of messages, newest first.
    fn list_messages_desc(
        &self,
        conversation_id: i64,
        offset: u64,
        limit: u64,
    ) -> BoxFuture<'_, AppResult<Vec<Message>>>;

    /// Returns whether a participant row was updated.
    fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<bool>>;

    /// Flag every unread message not sent by `reader_id` as read.
    fn mark_messages_read(&self, conversation_id: i64, reader_id: i64) -> BoxFuture<'_, AppResult<u64>>;
}

pub trait UserDirectory: Send + Sync {
    fn find_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Option<UserProfile>>>;

    fn find_users(&self, user_ids: Vec<i64>) -> BoxFuture<'_, AppResult<Vec<UserProfile>>>;
}
