use std::sync::Arc;

use axum::http::{HeaderMap, Uri};
use serde_json::Value;
use socketioxide::extract::{SocketRef, TryData};
use socketioxide::SocketIo;
use tokio::sync::mpsc;
use url::form_urlencoded;

use plaza_shared::middleware::extract_bearer_token;

use crate::socket::connection::{self, EffectSink, Inbound};
use crate::socket::dispatch::{Audience, Effect};
use crate::socket::events::{
    room_name, JOIN_CONVERSATION, LEAVE_CONVERSATION, MARK_AS_READ, SEND_MESSAGE, STOP_TYPING,
    TYPING,
};
use crate::AppState;

const CLIENT_EVENTS: [&str; 6] = [
    JOIN_CONVERSATION,
    LEAVE_CONVERSATION,
    SEND_MESSAGE,
    TYPING,
    STOP_TYPING,
    MARK_AS_READ,
];

/// Delivers effects through socketioxide.
struct SocketSink {
    socket: SocketRef,
    io: SocketIo,
}

impl EffectSink for SocketSink {
    fn apply(&self, effects: Vec<Effect>) {
        let socket = &self.socket;
        for effect in effects {
            match effect {
                Effect::Join(room) => {
                    socket.join(room).ok();
                }
                Effect::Leave(room) => {
                    socket.leave(room).ok();
                }
                Effect::Emit { audience, event } => {
                    let name = event.name();
                    let sent = match audience {
                        Audience::Caller => socket.emit(name, &event).map_err(|e| e.to_string()),
                        Audience::Room(id) => socket
                            .within(room_name(id))
                            .emit(name, &event)
                            .map_err(|e| e.to_string()),
                        Audience::RoomPeers(id) => socket
                            .to(room_name(id))
                            .emit(name, &event)
                            .map_err(|e| e.to_string()),
                        Audience::Others => socket.broadcast().emit(name, &event).map_err(|e| e.to_string()),
                        Audience::Everyone => self.io.emit(name, &event).map_err(|e| e.to_string()),
                    };
                    if let Err(e) = sent {
                        tracing::warn!(sid = %socket.id, event = name, error = %e, "socket emit failed");
                    }
                }
            }
        }
    }

    fn close(&self) {
        self.socket.clone().disconnect().ok();
    }
}

pub async fn on_connect_with_state(socket: SocketRef, auth: Option<Value>, state: Arc<AppState>) {
    let sink = SocketSink { socket: socket.clone(), io: state.io.clone() };
    let credential = {
        let parts = socket.req_parts();
        handshake_token(auth.as_ref(), &parts.uri, &parts.headers)
    };
    let Some(user_id) = connection::open(
        &state.sessions,
        &state.verifier,
        credential.as_deref(),
        socket.id,
        &sink,
    ) else {
        return;
    };

    // Events from one connection are handled strictly in arrival order by a
    // single worker; the disconnect is queued behind whatever is pending.
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn({
        let state = state.clone();
        let sid = socket.id;
        async move {
            connection::run(&state.chat, &state.sessions, user_id, sid, &sink, rx).await;
        }
    });

    for name in CLIENT_EVENTS {
        let tx = tx.clone();
        socket.on(name, move |_socket: SocketRef, TryData::<Value>(payload)| {
            let tx = tx.clone();
            async move {
                let payload = payload.unwrap_or(Value::Null);
                tx.send(Inbound::Event { name, payload }).ok();
            }
        });
    }

    socket.on_disconnect(move |_socket: SocketRef| {
        let tx = tx.clone();
        async move {
            tx.send(Inbound::Disconnect).ok();
        }
    });
}

/// Credential from the handshake auth payload `{token}`, the `token` query
/// parameter, or an `Authorization: Bearer` header, in that order.
pub fn handshake_token(auth: Option<&Value>, uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let from_auth = auth
        .and_then(|a| a.get("token"))
        .and_then(Value::as_str)
        .map(|t| t.strip_prefix("Bearer ").unwrap_or(t));
    if let Some(token) = from_auth.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let from_query = uri.query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "token" && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    });
    if from_query.is_some() {
        return from_query;
    }

    extract_bearer_token(headers).ok().map(str::to_string)
}
