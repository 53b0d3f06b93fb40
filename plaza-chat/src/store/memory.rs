use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use plaza_shared::errors::{AppError, AppResult, ErrorCode};
use tokio::sync::RwLock;

use crate::models::{pair_key, Conversation, ConversationParticipant, Message, UserProfile};
use crate::store::{BoxFuture, ChatStore, UserDirectory};

#[derive(Default)]
struct State {
    next_conversation_id: i64,
    next_participant_id: i64,
    next_message_id: i64,
    conversations: BTreeMap<i64, Conversation>,
    pairs: HashMap<(i64, i64), i64>,
    participants: Vec<ConversationParticipant>,
    messages: Vec<Message>,
    users: HashMap<i64, UserProfile>,
}

impl State {
    fn member_ids(&self, conversation_id: i64) -> Vec<i64> {
        self.participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(|p| p.user_id)
            .collect()
    }
}

/// Store with the same contract as the Postgres one, held in process memory.
#[derive(Default)]
pub struct InMemoryChatStore {
    state: RwLock<State>,
}

impl InMemoryChatStore {
    pub fn with_users(users: impl IntoIterator<Item = UserProfile>) -> Self {
        let state = State {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            ..State::default()
        };
        Self { state: RwLock::new(state) }
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.conversations.len()
    }
}

impl ChatStore for InMemoryChatStore {
    fn ping(&self) -> BoxFuture<'_, AppResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn find_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Option<Conversation>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let found = state.conversations.values().find(|c| {
                let members = state.member_ids(c.id);
                members.len() == 2 && members.contains(&a) && members.contains(&b)
            });
            Ok(found.cloned())
        })
    }

    fn create_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Conversation>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let key = pair_key(a, b);
            if state.pairs.contains_key(&key) {
                return Err(AppError::conflict("a conversation already exists for this pair"));
            }

            let now = Utc::now();
            state.next_conversation_id += 1;
            let conversation = Conversation {
                id: state.next_conversation_id,
                user_low: key.0,
                user_high: key.1,
                created_at: now,
                updated_at: now,
            };

            for user_id in [a, b] {
                state.next_participant_id += 1;
                let participant = ConversationParticipant {
                    id: state.next_participant_id,
                    conversation_id: conversation.id,
                    user_id,
                    last_read: None,
                    created_at: now,
                };
                state.participants.push(participant);
            }
            state.pairs.insert(key, conversation.id);
            state.conversations.insert(conversation.id, conversation.clone());
            Ok(conversation)
        })
    }

    fn get_conversation(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Conversation>>> {
        Box::pin(async move {
            Ok(self.state.read().await.conversations.get(&conversation_id).cloned())
        })
    }

    fn list_conversations_for_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Vec<Conversation>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut items: Vec<Conversation> = state
                .participants
                .iter()
                .filter(|p| p.user_id == user_id)
                .filter_map(|p| state.conversations.get(&p.conversation_id).cloned())
                .collect();
            items.sort_by(|x, y| y.updated_at.cmp(&x.updated_at).then(y.id.cmp(&x.id)));
            Ok(items)
        })
    }

    fn list_participants(
        &self,
        conversation_id: i64,
    ) -> BoxFuture<'_, AppResult<Vec<ConversationParticipant>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .participants
                .iter()
                .filter(|p| p.conversation_id == conversation_id)
                .cloned()
                .collect())
        })
    }

    fn get_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, AppResult<Option<ConversationParticipant>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .participants
                .iter()
                .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
                .cloned())
        })
    }

    fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: String,
        sent_at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<Message>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
                return Err(AppError::new(ErrorCode::ConversationNotFound, "conversation not found"));
            };
            conversation.updated_at = sent_at;

            state.next_message_id += 1;
            let message = Message {
                id: state.next_message_id,
                conversation_id,
                sender_id,
                content,
                is_read: false,
                created_at: sent_at,
            };
            state.messages.push(message.clone());
            Ok(message)
        })
    }

    fn last_message(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Message>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .max_by(|x, y| x.created_at.cmp(&y.created_at).then(x.id.cmp(&y.id)))
                .cloned())
        })
    }

    fn count_messages(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<u64>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.messages.iter().filter(|m| m.conversation_id == conversation_id).count() as u64)
        })
    }

    fn count_unread(
        &self,
        conversation_id: i64,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, AppResult<u64>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id && m.sender_id != user_id)
                .filter(|m| since.map_or(true, |since| m.created_at > since))
                .count() as u64)
        })
    }

    fn list_messages_desc(
        &self,
        conversation_id: i64,
        offset: u64,
        limit: u64,
    ) -> BoxFuture<'_, AppResult<Vec<Message>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut items: Vec<Message> = state
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            items.sort_by(|x, y| y.created_at.cmp(&x.created_at).then(y.id.cmp(&x.id)));
            Ok(items
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        })
    }

    fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<bool>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let participant = state
                .participants
                .iter_mut()
                .find(|p| p.conversation_id == conversation_id && p.user_id == user_id);
            Ok(match participant {
                Some(p) => {
                    p.last_read = Some(at);
                    true
                }
                None => false,
            })
        })
    }

    fn mark_messages_read(&self, conversation_id: i64, reader_id: i64) -> BoxFuture<'_, AppResult<u64>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let mut marked = 0;
            for message in state.messages.iter_mut().filter(|m| {
                m.conversation_id == conversation_id && m.sender_id != reader_id && !m.is_read
            }) {
                message.is_read = true;
                marked += 1;
            }
            Ok(marked)
        })
    }
}

impl UserDirectory for InMemoryChatStore {
    fn find_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Option<UserProfile>>> {
        Box::pin(async move { Ok(self.state.read().await.users.get(&user_id).cloned()) })
    }

    fn find_users(&self, user_ids: Vec<i64>) -> BoxFuture<'_, AppResult<Vec<UserProfile>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(user_ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn messages_keep_the_supplied_timestamp() {
        let store = InMemoryChatStore::default();
        let conv = store.create_direct_conversation(1, 2).await.unwrap();
        let sent_at = Utc::now() - Duration::seconds(30);

        let message = store.insert_message(conv.id, 1, "late".into(), sent_at).await.unwrap();
        assert_eq!(message.created_at, sent_at);
        let conv = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.updated_at, sent_at);

        // A read marker from the same clock just after the stamp clears it.
        assert_eq!(store.count_unread(conv.id, 2, Some(sent_at)).await.unwrap(), 0);
        let before = sent_at - Duration::milliseconds(1);
        assert_eq!(store.count_unread(conv.id, 2, Some(before)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_pair_is_a_conflict() {
        let store = InMemoryChatStore::default();
        store.create_direct_conversation(1, 2).await.unwrap();
        let err = store.create_direct_conversation(2, 1).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
