//! Lifecycle of one realtime connection: handshake, ordered event loop and
//! teardown. The socket itself sits behind [`EffectSink`].

use std::fmt::Debug;
use std::hash::Hash;

use serde_json::Value;
use tokio::sync::mpsc;

use plaza_shared::errors::AppError;
use plaza_shared::types::auth::TokenVerifier;

use crate::presence::SessionRegistry;
use crate::service::ChatService;
use crate::socket::dispatch::{self, Audience, Effect};
use crate::socket::events::ServerEvent;

/// Where a connection's effects are delivered.
pub trait EffectSink: Send + Sync {
    fn apply(&self, effects: Vec<Effect>);

    /// Drop the underlying connection.
    fn close(&self);
}

#[derive(Debug)]
pub enum Inbound {
    Event { name: &'static str, payload: Value },
    Disconnect,
}

/// Verify the handshake credential, track the connection and announce the
/// user. A refused handshake gets a private `error` and is closed.
pub fn open<C, S>(
    sessions: &SessionRegistry<C>,
    verifier: &TokenVerifier,
    credential: Option<&str>,
    conn: C,
    sink: &S,
) -> Option<i64>
where
    C: Copy + Eq + Hash + Debug,
    S: EffectSink,
{
    let verified = credential
        .ok_or_else(|| AppError::unauthorized("missing authentication token"))
        .and_then(|token| verifier.verify(token));

    let user_id = match verified {
        Ok(user) => user.id,
        Err(e) => {
            tracing::warn!(conn = ?conn, error = %e, "chat socket auth failed");
            sink.apply(vec![Effect::Emit {
                audience: Audience::Caller,
                event: ServerEvent::error(e.public_message()),
            }]);
            sink.close();
            return None;
        }
    };

    if let Some(previous) = sessions.register(user_id, conn) {
        tracing::info!(user_id, conn = ?conn, previous = ?previous, "newer connection replaces tracked session");
    }
    tracing::info!(user_id, conn = ?conn, "chat socket connected");

    sink.apply(dispatch::connected(user_id));
    Some(user_id)
}

/// Drain `rx` one event at a time until the disconnect arrives. Anything
/// queued after the disconnect is dropped.
pub async fn run<C, S>(
    chat: &ChatService,
    sessions: &SessionRegistry<C>,
    user_id: i64,
    conn: C,
    sink: &S,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
) where
    C: Copy + Eq + Hash + Debug,
    S: EffectSink,
{
    while let Some(inbound) = rx.recv().await {
        match inbound {
            Inbound::Event { name, payload } => {
                let effects = dispatch::dispatch_raw(chat, user_id, name, payload).await;
                sink.apply(effects);
            }
            Inbound::Disconnect => {
                // A stale socket closing after a newer one registered must not
                // take the user offline.
                if sessions.unregister(user_id, conn) {
                    sink.apply(dispatch::disconnected(user_id));
                }
                tracing::info!(user_id, conn = ?conn, "chat socket disconnected");
                break;
            }
        }
    }
}
