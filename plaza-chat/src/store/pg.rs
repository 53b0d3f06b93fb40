use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use plaza_shared::clients::db::DbPool;
use plaza_shared::errors::{AppError, AppResult};

use crate::models::{
    Conversation, ConversationParticipant, Message, NewConversation, NewConversationParticipant,
    NewMessage, UserProfile,
};
use crate::schema::{conversation_participants, conversations, messages, users};
use crate::store::{BoxFuture, ChatStore, UserDirectory};

/// Diesel-backed store. Every query runs on the blocking pool so handlers
/// never stall the runtime while waiting on Postgres.
#[derive(Clone)]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn run<T, F>(&self, f: F) -> BoxFuture<'static, AppResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().map_err(|e| AppError::Internal(e.into()))?;
                f(&mut conn)
            })
            .await
            .map_err(|e| AppError::Internal(e.into()))?
        })
    }
}

impl ChatStore for PgChatStore {
    fn ping(&self) -> BoxFuture<'_, AppResult<()>> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
    }

    fn find_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Option<Conversation>>> {
        self.run(move |conn| {
            let mine: Vec<i64> = conversation_participants::table
                .filter(conversation_participants::user_id.eq(a))
                .select(conversation_participants::conversation_id)
                .load(conn)?;

            if mine.is_empty() {
                return Ok(None);
            }

            let shared: Vec<i64> = conversation_participants::table
                .filter(conversation_participants::user_id.eq(b))
                .filter(conversation_participants::conversation_id.eq_any(&mine))
                .select(conversation_participants::conversation_id)
                .order(conversation_participants::conversation_id.asc())
                .load(conn)?;

            // Only an exact two-member set counts as the direct conversation.
            for conversation_id in shared {
                let members: i64 = conversation_participants::table
                    .filter(conversation_participants::conversation_id.eq(conversation_id))
                    .select(count_star())
                    .first(conn)?;

                if members == 2 {
                    let conversation = conversations::table
                        .find(conversation_id)
                        .first::<Conversation>(conn)?;
                    return Ok(Some(conversation));
                }
            }

            Ok(None)
        })
    }

    fn create_direct_conversation(
        &self,
        a: i64,
        b: i64,
    ) -> BoxFuture<'_, AppResult<Conversation>> {
        self.run(move |conn| {
            let created = conn.transaction::<Conversation, DieselError, _>(|conn| {
                let conversation: Conversation = diesel::insert_into(conversations::table)
                    .values(&NewConversation::between(a, b))
                    .get_result(conn)?;

                let participants = vec![
                    NewConversationParticipant { conversation_id: conversation.id, user_id: a },
                    NewConversationParticipant { conversation_id: conversation.id, user_id: b },
                ];
                diesel::insert_into(conversation_participants::table)
                    .values(&participants)
                    .execute(conn)?;

                Ok(conversation)
            });

            match created {
                Ok(conversation) => Ok(conversation),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    Err(AppError::conflict("a conversation already exists for this pair"))
                }
                Err(e) => Err(AppError::Database(e)),
            }
        })
    }

    fn get_conversation(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Conversation>>> {
        self.run(move |conn| {
            let conversation = conversations::table
                .find(conversation_id)
                .first::<Conversation>(conn)
                .optional()?;
            Ok(conversation)
        })
    }

    fn list_conversations_for_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Vec<Conversation>>> {
        self.run(move |conn| {
            let ids: Vec<i64> = conversation_participants::table
                .filter(conversation_participants::user_id.eq(user_id))
                .select(conversation_participants::conversation_id)
                .load(conn)?;

            if ids.is_empty() {
                return Ok(vec![]);
            }

            let items = conversations::table
                .filter(conversations::id.eq_any(&ids))
                .order((conversations::updated_at.desc(), conversations::id.desc()))
                .load::<Conversation>(conn)?;
            Ok(items)
        })
    }

    fn list_participants(
        &self,
        conversation_id: i64,
    ) -> BoxFuture<'_, AppResult<Vec<ConversationParticipant>>> {
        self.run(move |conn| {
            let items = conversation_participants::table
                .filter(conversation_participants::conversation_id.eq(conversation_id))
                .order(conversation_participants::id.asc())
                .load::<ConversationParticipant>(conn)?;
            Ok(items)
        })
    }

    fn get_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, AppResult<Option<ConversationParticipant>>> {
        self.run(move |conn| {
            let participant = conversation_participants::table
                .filter(conversation_participants::conversation_id.eq(conversation_id))
                .filter(conversation_participants::user_id.eq(user_id))
                .first::<ConversationParticipant>(conn)
                .optional()?;
            Ok(participant)
        })
    }

    fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: String,
        sent_at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<Message>> {
        self.run(move |conn| {
            let message = conn.transaction::<Message, DieselError, _>(|conn| {
                let message: Message = diesel::insert_into(messages::table)
                    .values(&NewMessage { conversation_id, sender_id, content, created_at: sent_at })
                    .get_result(conn)?;

                diesel::update(conversations::table.find(conversation_id))
                    .set(conversations::updated_at.eq(message.created_at))
                    .execute(conn)?;

                Ok(message)
            })?;
            Ok(message)
        })
    }

    fn last_message(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<Option<Message>>> {
        self.run(move |conn| {
            let message = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order((messages::created_at.desc(), messages::id.desc()))
                .first::<Message>(conn)
                .optional()?;
            Ok(message)
        })
    }

    fn count_messages(&self, conversation_id: i64) -> BoxFuture<'_, AppResult<u64>> {
        self.run(move |conn| {
            let total: i64 = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .select(count_star())
                .first(conn)?;
            Ok(total as u64)
        })
    }

    fn count_unread(
        &self,
        conversation_id: i64,
        user_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, AppResult<u64>> {
        self.run(move |conn| {
            let mut query = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .filter(messages::sender_id.ne(user_id))
                .select(count_star())
                .into_boxed();

            if let Some(since) = since {
                query = query.filter(messages::created_at.gt(since));
            }

            let unread: i64 = query.first(conn)?;
            Ok(unread as u64)
        })
    }

    fn list_messages_desc(
        &self,
        conversation_id: i64,
        offset: u64,
        limit: u64,
    ) -> BoxFuture<'_, AppResult<Vec<Message>>> {
        self.run(move |conn| {
            let items = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order((messages::created_at.desc(), messages::id.desc()))
                .offset(offset as i64)
                .limit(limit as i64)
                .load::<Message>(conn)?;
            Ok(items)
        })
    }

    fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, AppResult<bool>> {
        self.run(move |conn| {
            let updated = diesel::update(
                conversation_participants::table
                    .filter(conversation_participants::conversation_id.eq(conversation_id))
                    .filter(conversation_participants::user_id.eq(user_id)),
            )
            .set(conversation_participants::last_read.eq(Some(at)))
            .execute(conn)?;
            Ok(updated > 0)
        })
    }

    fn mark_messages_read(&self, conversation_id: i64, reader_id: i64) -> BoxFuture<'_, AppResult<u64>> {
        self.run(move |conn| {
            let updated = diesel::update(
                messages::table
                    .filter(messages::conversation_id.eq(conversation_id))
                    .filter(messages::sender_id.ne(reader_id))
                    .filter(messages::is_read.eq(false)),
            )
            .set(messages::is_read.eq(true))
            .execute(conn)?;
            Ok(updated as u64)
        })
    }
}

impl UserDirectory for PgChatStore {
    fn find_user(&self, user_id: i64) -> BoxFuture<'_, AppResult<Option<UserProfile>>> {
        self.run(move |conn| {
            let user = users::table
                .find(user_id)
                .select(UserProfile::as_select())
                .first(conn)
                .optional()?;
            Ok(user)
        })
    }

    fn find_users(&self, user_ids: Vec<i64>) -> BoxFuture<'_, AppResult<Vec<UserProfile>>> {
        self.run(move |conn| {
            if user_ids.is_empty() {
                return Ok(vec![]);
            }
            let items = users::table
                .filter(users::id.eq_any(&user_ids))
                .select(UserProfile::as_select())
                .load(conn)?;
            Ok(items)
        })
    }
}
