//! Event handling with the transport taken out.
//!
//! Each inbound event turns into a list of [`Effect`]s that the socket layer
//! applies in order. Keeping socketioxide out of here lets the gateway rules
//! be exercised directly against a store.

use serde_json::Value;

use plaza_shared::errors::AppError;

use crate::service::ChatService;
use crate::socket::events::{
    room_name, ClientEvent, PresencePayload, ReadPayload, ServerEvent, TypingPayload,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    /// The originating connection only.
    Caller,
    /// Everyone subscribed to the conversation, the caller included.
    Room(i64),
    /// Everyone subscribed to the conversation except the caller.
    RoomPeers(i64),
    /// Every connection except the caller.
    Others,
    /// Every connection.
    Everyone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Join(String),
    Leave(String),
    Emit { audience: Audience, event: ServerEvent },
}

impl Effect {
    fn emit(audience: Audience, event: ServerEvent) -> Self {
        Self::Emit { audience, event }
    }
}

pub fn connected(user_id: i64) -> Vec<Effect> {
    vec![Effect::emit(
        Audience::Others,
        ServerEvent::UserOnline(PresencePayload { user_id }),
    )]
}

pub fn disconnected(user_id: i64) -> Vec<Effect> {
    vec![Effect::emit(
        Audience::Everyone,
        ServerEvent::UserOffline(PresencePayload { user_id }),
    )]
}

/// Parse and handle one raw inbound event.
pub async fn dispatch_raw(
    chat: &ChatService,
    user_id: i64,
    name: &str,
    payload: Value,
) -> Vec<Effect> {
    match ClientEvent::parse(name, payload) {
        Ok(event) => dispatch(chat, user_id, event).await,
        Err(e) => {
            tracing::warn!(user_id, event = name, error = %e, "rejected socket payload");
            vec![error_effect(&e)]
        }
    }
}

pub async fn dispatch(chat: &ChatService, user_id: i64, event: ClientEvent) -> Vec<Effect> {
    let conversation_id = event.conversation_id();
    match handle(chat, user_id, event).await {
        Ok(effects) => effects,
        Err(e) => {
            tracing::warn!(user_id, conversation_id, error = %e, "socket event failed");
            vec![error_effect(&e)]
        }
    }
}

fn error_effect(e: &AppError) -> Effect {
    Effect::emit(Audience::Caller, ServerEvent::error(e.public_message()))
}

async fn handle(chat: &ChatService, user_id: i64, event: ClientEvent) -> Result<Vec<Effect>, AppError> {
    let effects = match event {
        // Membership is enforced when sending, not when subscribing.
        ClientEvent::JoinConversation { conversation_id } => {
            tracing::debug!(user_id, conversation_id, "joined conversation room");
            vec![Effect::Join(room_name(conversation_id))]
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            tracing::debug!(user_id, conversation_id, "left conversation room");
            vec![Effect::Leave(room_name(conversation_id))]
        }
        ClientEvent::SendMessage { conversation_id, content } => {
            chat.ensure_participant(conversation_id, user_id).await?;
            let message = chat.append(conversation_id, user_id, &content).await?;
            vec![Effect::emit(
                Audience::Room(conversation_id),
                ServerEvent::NewMessage(message),
            )]
        }
        ClientEvent::Typing { conversation_id } => vec![Effect::emit(
            Audience::RoomPeers(conversation_id),
            ServerEvent::UserTyping(TypingPayload { user_id, conversation_id }),
        )],
        ClientEvent::StopTyping { conversation_id } => vec![Effect::emit(
            Audience::RoomPeers(conversation_id),
            ServerEvent::UserStopTyping(TypingPayload { user_id, conversation_id }),
        )],
        ClientEvent::MarkAsRead { conversation_id } => {
            let receipt = chat.mark_read(conversation_id, user_id).await?;
            vec![Effect::emit(
                Audience::RoomPeers(conversation_id),
                ServerEvent::MessagesRead(ReadPayload {
                    conversation_id: receipt.conversation_id,
                    read_by: receipt.read_by,
                }),
            )]
        }
    };
    Ok(effects)
}
