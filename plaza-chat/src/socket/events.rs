//! Wire types for the realtime channel.
//!
//! Inbound payloads are parsed into [`ClientEvent`] up front; anything that
//! does not match its event's shape is rejected with `ValidationError`
//! before a handler runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use plaza_shared::errors::{AppError, AppResult};

use crate::models::MessageWithSender;

pub const JOIN_CONVERSATION: &str = "join_conversation";
pub const LEAVE_CONVERSATION: &str = "leave_conversation";
pub const SEND_MESSAGE: &str = "send_message";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop_typing";
pub const MARK_AS_READ: &str = "mark_as_read";

/// Broadcast group for one conversation.
pub fn room_name(conversation_id: i64) -> String {
    format!("conversation_{conversation_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinConversation { conversation_id: i64 },
    LeaveConversation { conversation_id: i64 },
    SendMessage { conversation_id: i64, content: String },
    Typing { conversation_id: i64 },
    StopTyping { conversation_id: i64 },
    MarkAsRead { conversation_id: i64 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoomTarget {
    Id(i64),
    Object {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
    },
}

impl From<RoomTarget> for i64 {
    fn from(target: RoomTarget) -> Self {
        match target {
            RoomTarget::Id(id) | RoomTarget::Object { conversation_id: id } => id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRef {
    conversation_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    conversation_id: i64,
    content: String,
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> AppResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("invalid {event} payload: {e}")))
}

impl ClientEvent {
    pub fn parse(event: &str, payload: Value) -> AppResult<Self> {
        let parsed = match event {
            JOIN_CONVERSATION => Self::JoinConversation {
                conversation_id: decode::<RoomTarget>(event, payload)?.into(),
            },
            LEAVE_CONVERSATION => Self::LeaveConversation {
                conversation_id: decode::<RoomTarget>(event, payload)?.into(),
            },
            SEND_MESSAGE => {
                let p: SendMessagePayload = decode(event, payload)?;
                Self::SendMessage { conversation_id: p.conversation_id, content: p.content }
            }
            TYPING => Self::Typing {
                conversation_id: decode::<ConversationRef>(event, payload)?.conversation_id,
            },
            STOP_TYPING => Self::StopTyping {
                conversation_id: decode::<ConversationRef>(event, payload)?.conversation_id,
            },
            MARK_AS_READ => Self::MarkAsRead {
                conversation_id: decode::<ConversationRef>(event, payload)?.conversation_id,
            },
            other => return Err(AppError::Validation(format!("unknown event: {other}"))),
        };
        Ok(parsed)
    }

    pub fn conversation_id(&self) -> i64 {
        match self {
            Self::JoinConversation { conversation_id }
            | Self::LeaveConversation { conversation_id }
            | Self::SendMessage { conversation_id, .. }
            | Self::Typing { conversation_id }
            | Self::StopTyping { conversation_id }
            | Self::MarkAsRead { conversation_id } => *conversation_id,
        }
    }
}

// --- Outbound payloads ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    pub conversation_id: i64,
    pub read_by: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

/// Server to client events. Serialises to the bare payload; the event name
/// travels separately via [`ServerEvent::name`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServerEvent {
    NewMessage(MessageWithSender),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
    MessagesRead(ReadPayload),
    UserOnline(PresencePayload),
    UserOffline(PresencePayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::UserTyping(_) => "user_typing",
            Self::UserStopTyping(_) => "user_stop_typing",
            Self::MessagesRead(_) => "messages_read",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::Error(_) => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { message: message.into() })
    }
}
