use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use plaza_shared::errors::{AppError, AppResult, ErrorCode};
use plaza_shared::types::pagination::{Pagination, PaginationParams};

use crate::models::{
    Conversation, ConversationDetail, ConversationParticipant, ConversationSummary, LastMessage,
    Message, MessageWithSender, ReadReceipt, ResolvedConversation, UserProfile, MAX_MESSAGE_CHARS,
};
use crate::store::{ChatStore, UserDirectory};
use crate::telemetry;

/// Conversation resolution, message history and read state.
///
/// Shared by the REST API and the realtime gateway so both paths apply the
/// same membership checks against the same store.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    users: Arc<dyn UserDirectory>,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    /// Find the two-party conversation between `caller_id` and `other_id`,
    /// creating it when absent.
    pub async fn get_or_create(&self, caller_id: i64, other_id: i64) -> AppResult<ResolvedConversation> {
        if caller_id == other_id {
            return Err(AppError::new(
                ErrorCode::CannotMessageSelf,
                "you cannot start a conversation with yourself",
            ));
        }

        if self.users.find_user(other_id).await?.is_none() {
            return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
        }

        if let Some(existing) = self.store.find_direct_conversation(caller_id, other_id).await? {
            return self.resolved(existing, false).await;
        }

        match self.store.create_direct_conversation(caller_id, other_id).await {
            Ok(created) => {
                counter!(telemetry::CONVERSATIONS_CREATED).increment(1);
                tracing::info!(
                    conversation_id = created.id,
                    caller_id,
                    other_id,
                    "conversation created"
                );
                self.resolved(created, true).await
            }
            // Lost a creation race: the pair constraint fired, so the winner's row exists.
            Err(e) if e.is_conflict() => {
                tracing::debug!(caller_id, other_id, "conversation create raced, re-resolving");
                let existing = self
                    .store
                    .find_direct_conversation(caller_id, other_id)
                    .await?
                    .ok_or(e)?;
                self.resolved(existing, false).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolved(&self, conversation: Conversation, is_new: bool) -> AppResult<ResolvedConversation> {
        let participants = self.store.list_participants(conversation.id).await?;
        Ok(ResolvedConversation {
            conversation: self.detail(conversation, &participants).await?,
            is_new,
        })
    }

    async fn detail(
        &self,
        conversation: Conversation,
        participants: &[ConversationParticipant],
    ) -> AppResult<ConversationDetail> {
        let ids = participants.iter().map(|p| p.user_id).collect();
        let profiles = self.users.find_users(ids).await?;
        Ok(ConversationDetail {
            id: conversation.id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            participants: profiles,
        })
    }

    /// Participant-checked conversation detail.
    pub async fn get_conversation(&self, conversation_id: i64, caller_id: i64) -> AppResult<ConversationDetail> {
        self.ensure_participant(conversation_id, caller_id).await?;
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;
        let participants = self.store.list_participants(conversation_id).await?;
        self.detail(conversation, &participants).await
    }

    /// The caller's inbox, most recently active conversation first.
    pub async fn list_for_user(&self, user_id: i64) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self.store.list_conversations_for_user(user_id).await?;

        let mut rows = Vec::with_capacity(conversations.len());
        let mut profile_ids = vec![user_id];
        for conversation in conversations {
            let participants = self.store.list_participants(conversation.id).await?;
            let last_read = participants
                .iter()
                .find(|p| p.user_id == user_id)
                .and_then(|p| p.last_read);
            let other_id = participants.iter().map(|p| p.user_id).find(|id| *id != user_id);
            let last_message = self.store.last_message(conversation.id).await?;
            let unread = self.store.count_unread(conversation.id, user_id, last_read).await?;

            if let Some(id) = other_id {
                profile_ids.push(id);
            }
            rows.push((conversation, other_id, last_message, unread));
        }

        profile_ids.sort_unstable();
        profile_ids.dedup();
        let profiles = self.profile_map(profile_ids).await?;

        Ok(rows
            .into_iter()
            .map(|(conversation, other_id, last_message, unread)| ConversationSummary {
                id: conversation.id,
                other_user: other_id.and_then(|id| profiles.get(&id).cloned()),
                other_user_online: false,
                last_message: last_message.map(|m| LastMessage {
                    id: m.id,
                    sender: profiles.get(&m.sender_id).cloned(),
                    content: m.content,
                    created_at: m.created_at,
                }),
                unread_count: unread as i64,
                updated_at: conversation.updated_at,
            })
            .collect())
    }

    /// Total unread messages across all of the user's conversations.
    pub async fn unread_total(&self, user_id: i64) -> AppResult<u64> {
        let conversations = self.store.list_conversations_for_user(user_id).await?;
        let mut total = 0;
        for conversation in conversations {
            let last_read = self
                .store
                .get_participant(conversation.id, user_id)
                .await?
                .and_then(|p| p.last_read);
            total += self.store.count_unread(conversation.id, user_id, last_read).await?;
        }
        Ok(total)
    }

    pub async fn ensure_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<ConversationParticipant> {
        self.store
            .get_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::new(
                    ErrorCode::NotConversationMember,
                    "you are not a member of this conversation",
                )
            })
    }

    /// Append a message from `sender_id`, returned joined with the sender profile.
    pub async fn append(&self, conversation_id: i64, sender_id: i64, content: &str) -> AppResult<MessageWithSender> {
        let content = validate_content(content)?;

        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(AppError::new(ErrorCode::ConversationNotFound, "conversation not found"));
        }
        self.ensure_participant(conversation_id, sender_id).await?;

        let message = self
            .store
            .insert_message(conversation_id, sender_id, content, Utc::now())
            .await?;
        counter!(telemetry::MESSAGES_APPENDED).increment(1);
        tracing::debug!(message_id = message.id, conversation_id, sender_id, "message appended");

        let sender = self.users.find_user(sender_id).await?;
        Ok(MessageWithSender { message, sender })
    }

    /// One page of history, oldest first within the page. Reading history
    /// moves the caller's read marker.
    pub async fn list_by_conversation(
        &self,
        conversation_id: i64,
        caller_id: i64,
        params: &PaginationParams,
    ) -> AppResult<(Vec<MessageWithSender>, Pagination)> {
        self.ensure_participant(conversation_id, caller_id).await?;

        let total = self.store.count_messages(conversation_id).await?;
        let mut page = self
            .store
            .list_messages_desc(conversation_id, params.offset(), params.limit())
            .await?;
        page.reverse();

        self.store.set_last_read(conversation_id, caller_id, Utc::now()).await?;

        let items = self.with_senders(page).await?;
        Ok((items, Pagination::new(total, params)))
    }

    /// Move the caller's read marker to now and flag the other side's
    /// messages as read. Safe to repeat.
    pub async fn mark_read(&self, conversation_id: i64, caller_id: i64) -> AppResult<ReadReceipt> {
        self.ensure_participant(conversation_id, caller_id).await?;

        let read_at = Utc::now();
        self.store.set_last_read(conversation_id, caller_id, read_at).await?;
        let marked = self.store.mark_messages_read(conversation_id, caller_id).await?;

        tracing::debug!(conversation_id, caller_id, marked, "conversation marked read");
        Ok(ReadReceipt {
            conversation_id,
            read_by: caller_id,
            read_at,
            marked,
        })
    }

    /// Unread count for one conversation from `user_id`'s point of view.
    pub async fn unread_count(&self, conversation_id: i64, user_id: i64) -> AppResult<u64> {
        let participant = self.ensure_participant(conversation_id, user_id).await?;
        self.store
            .count_unread(conversation_id, user_id, participant.last_read)
            .await
    }

    async fn with_senders(&self, messages: Vec<Message>) -> AppResult<Vec<MessageWithSender>> {
        let mut ids: Vec<i64> = messages.iter().map(|m| m.sender_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let profiles = self.profile_map(ids).await?;

        Ok(messages
            .into_iter()
            .map(|message| MessageWithSender {
                sender: profiles.get(&message.sender_id).cloned(),
                message,
            })
            .collect())
    }

    async fn profile_map(&self, ids: Vec<i64>) -> AppResult<HashMap<i64, UserProfile>> {
        let profiles = self.users.find_users(ids).await?;
        Ok(profiles.into_iter().map(|p| (p.id, p)).collect())
    }
}

/// Trimmed message body, 1 to [`MAX_MESSAGE_CHARS`] characters.
pub fn validate_content(content: &str) -> AppResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(ErrorCode::MessageEmpty, "message content is required"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::with_details(
            ErrorCode::MessageTooLong,
            format!("message cannot exceed {MAX_MESSAGE_CHARS} characters"),
            serde_json::json!({ "max": MAX_MESSAGE_CHARS }),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryChatStore;

    fn user(id: i64, name: &str) -> UserProfile {
        UserProfile { id, username: name.into(), profile_image: None }
    }

    fn setup() -> (ChatService, Arc<InMemoryChatStore>) {
        let store = Arc::new(InMemoryChatStore::with_users([
            user(1, "ana"),
            user(2, "bruno"),
            user(3, "carla"),
        ]));
        (ChatService::new(store.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let (chat, _) = setup();

        let first = chat.get_or_create(1, 2).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.conversation.participants.len(), 2);

        let second = chat.get_or_create(1, 2).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.conversation.id, first.conversation.id);

        let reversed = chat.get_or_create(2, 1).await.unwrap();
        assert!(!reversed.is_new);
        assert_eq!(reversed.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn get_or_create_rejects_self() {
        let (chat, _) = setup();
        let err = chat.get_or_create(1, 1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotMessageSelf);

        chat.get_or_create(1, 2).await.unwrap();
        let err = chat.get_or_create(1, 1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotMessageSelf);
    }

    #[tokio::test]
    async fn get_or_create_requires_existing_user() {
        let (chat, store) = setup();
        let err = chat.get_or_create(1, 99).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotFound);
        assert_eq!(store.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_resolution_yields_one_conversation() {
        let (chat, store) = setup();
        let (a, b) = tokio::join!(chat.get_or_create(1, 2), chat.get_or_create(2, 1));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.conversation.id, b.conversation.id);
        assert_eq!([a.is_new, b.is_new].iter().filter(|n| **n).count(), 1);
        assert_eq!(store.conversation_count().await, 1);
    }

    #[tokio::test]
    async fn append_by_non_participant_is_forbidden() {
        let (chat, store) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;

        let err = chat.append(conv.id, 3, "let me in").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConversationMember);
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let (chat, _) = setup();
        let err = chat.append(404, 1, "hello?").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversationNotFound);
    }

    #[tokio::test]
    async fn append_enforces_content_bounds() {
        let (chat, store) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;

        let err = chat.append(conv.id, 1, "   ").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MessageEmpty);

        let err = chat.append(conv.id, 1, &"x".repeat(1001)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MessageTooLong);
        assert_eq!(store.message_count().await, 0);

        chat.append(conv.id, 1, "x").await.unwrap();
        chat.append(conv.id, 1, &"é".repeat(1000)).await.unwrap();
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn append_trims_and_bumps_updated_at() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;

        let sent = chat.append(conv.id, 1, "  hi  ").await.unwrap();
        assert_eq!(sent.message.content, "hi");
        assert_eq!(sent.message.sender_id, 1);
        assert!(!sent.message.is_read);
        assert_eq!(sent.sender.as_ref().map(|s| s.username.as_str()), Some("ana"));

        let detail = chat.get_conversation(conv.id, 2).await.unwrap();
        assert_eq!(detail.updated_at, sent.message.created_at);
    }

    #[tokio::test]
    async fn rejected_append_leaves_conversation_untouched() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;

        chat.append(conv.id, 1, "").await.unwrap_err();
        let detail = chat.get_conversation(conv.id, 1).await.unwrap();
        assert_eq!(detail.updated_at, conv.updated_at);
    }

    #[tokio::test]
    async fn message_stamp_and_read_marker_come_from_the_service_clock() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;

        let before = Utc::now();
        let sent = chat.append(conv.id, 1, "stamped").await.unwrap();
        let after = Utc::now();
        assert!(before <= sent.message.created_at && sent.message.created_at <= after);

        let receipt = chat.mark_read(conv.id, 2).await.unwrap();
        assert!(receipt.read_at >= sent.message.created_at);
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_is_oldest_first_and_paged_from_newest() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        for i in 1..=5 {
            chat.append(conv.id, 1, &format!("m{i}")).await.unwrap();
        }

        let (page1, meta) = chat
            .list_by_conversation(conv.id, 2, &PaginationParams::new(1, 2))
            .await
            .unwrap();
        let contents: Vec<_> = page1.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, ["m4", "m5"]);
        assert_eq!(meta.total, 5);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_more);

        let (page3, meta) = chat
            .list_by_conversation(conv.id, 2, &PaginationParams::new(3, 2))
            .await
            .unwrap();
        let contents: Vec<_> = page3.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(contents, ["m1"]);
        assert!(!meta.has_more);
    }

    #[tokio::test]
    async fn history_pages_are_repeatable() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        for i in 0..7 {
            chat.append(conv.id, if i % 2 == 0 { 1 } else { 2 }, &format!("m{i}")).await.unwrap();
        }

        let params = PaginationParams::new(2, 3);
        let (first, _) = chat.list_by_conversation(conv.id, 1, &params).await.unwrap();
        let (second, _) = chat.list_by_conversation(conv.id, 1, &params).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn history_requires_membership() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        chat.append(conv.id, 1, "secret").await.unwrap();

        let err = chat
            .list_by_conversation(conv.id, 3, &PaginationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConversationMember);
    }

    #[tokio::test]
    async fn reading_history_moves_read_marker() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        chat.append(conv.id, 1, "hi").await.unwrap();
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 1);

        chat.list_by_conversation(conv.id, 2, &PaginationParams::default()).await.unwrap();
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 0);
        assert!(chat.ensure_participant(conv.id, 2).await.unwrap().last_read.is_some());
    }

    #[tokio::test]
    async fn mark_read_zeroes_unread_until_next_message() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        chat.append(conv.id, 1, "one").await.unwrap();
        chat.append(conv.id, 1, "two").await.unwrap();
        chat.append(conv.id, 2, "mine").await.unwrap();
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 2);

        let receipt = chat.mark_read(conv.id, 2).await.unwrap();
        assert_eq!(receipt.marked, 2);
        assert_eq!(receipt.read_by, 2);
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 0);

        // Own messages never count, and repeating is harmless.
        chat.append(conv.id, 2, "still mine").await.unwrap();
        let again = chat.mark_read(conv.id, 2).await.unwrap();
        assert_eq!(again.marked, 0);
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        chat.append(conv.id, 1, "three").await.unwrap();
        assert_eq!(chat.unread_count(conv.id, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_read_flags_only_the_other_side() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        chat.append(conv.id, 1, "from ana").await.unwrap();
        chat.append(conv.id, 2, "from bruno").await.unwrap();

        chat.mark_read(conv.id, 2).await.unwrap();
        let (items, _) = chat
            .list_by_conversation(conv.id, 1, &PaginationParams::default())
            .await
            .unwrap();
        let flags: Vec<_> = items.iter().map(|m| (m.message.sender_id, m.message.is_read)).collect();
        assert_eq!(flags, [(1, true), (2, false)]);
    }

    #[tokio::test]
    async fn mark_read_requires_membership() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        let err = chat.mark_read(conv.id, 3).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConversationMember);
    }

    #[tokio::test]
    async fn inbox_lists_recent_first_with_unread() {
        let (chat, _) = setup();
        let with_bruno = chat.get_or_create(1, 2).await.unwrap().conversation;
        let with_carla = chat.get_or_create(1, 3).await.unwrap().conversation;

        chat.append(with_carla.id, 3, "hola").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        chat.append(with_bruno.id, 2, "oi").await.unwrap();
        chat.append(with_bruno.id, 2, "tudo bem?").await.unwrap();

        let inbox = chat.list_for_user(1).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].id, with_bruno.id);
        assert_eq!(inbox[0].other_user.as_ref().unwrap().username, "bruno");
        assert_eq!(inbox[0].unread_count, 2);
        assert_eq!(inbox[0].last_message.as_ref().unwrap().content, "tudo bem?");
        assert_eq!(inbox[1].id, with_carla.id);
        assert_eq!(inbox[1].unread_count, 1);

        assert_eq!(chat.unread_total(1).await.unwrap(), 3);
        assert!(chat.list_for_user(3).await.unwrap()[0].last_message.is_some());
    }

    #[tokio::test]
    async fn conversation_detail_requires_membership() {
        let (chat, _) = setup();
        let conv = chat.get_or_create(1, 2).await.unwrap().conversation;
        assert_eq!(chat.get_conversation(conv.id, 2).await.unwrap().participants.len(), 2);

        let err = chat.get_conversation(conv.id, 3).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConversationMember);
    }

    #[test]
    fn content_validation_counts_characters() {
        assert_eq!(validate_content("  ok \n").unwrap(), "ok");
        assert!(validate_content(&"ñ".repeat(1000)).is_ok());
        assert_eq!(
            validate_content(&"ñ".repeat(1001)).unwrap_err().code(),
            ErrorCode::MessageTooLong
        );
    }
}
