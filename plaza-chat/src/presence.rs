use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::gauge;
use socketioxide::socket::Sid;

use crate::telemetry;

/// Process-wide `user id -> connection` map.
///
/// Only the newest connection per user is tracked. Registration is
/// last-write-wins; removal only happens for the connection currently held.
pub struct SessionRegistry<C = Sid> {
    sessions: DashMap<i64, C>,
}

impl<C> Default for SessionRegistry<C>
where
    C: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self { sessions: DashMap::new() }
    }
}

impl<C> SessionRegistry<C>
where
    C: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `conn` for `user_id`, returning the connection it replaced.
    pub fn register(&self, user_id: i64, conn: C) -> Option<C> {
        let previous = self.sessions.insert(user_id, conn);
        self.record_gauge();
        previous
    }

    /// Forget `user_id` if `conn` is still its tracked connection.
    ///
    /// Returns `false` when a newer connection has since taken over or the
    /// user was already gone, so repeated disconnects are no-ops.
    pub fn unregister(&self, user_id: i64, conn: C) -> bool {
        let removed = match self.sessions.entry(user_id) {
            Entry::Occupied(entry) if *entry.get() == conn => {
                entry.remove();
                true
            }
            _ => false,
        };
        if removed {
            self.record_gauge();
        }
        removed
    }

    pub fn lookup(&self, user_id: i64) -> Option<C> {
        self.sessions.get(&user_id).map(|entry| *entry.value())
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    fn record_gauge(&self) {
        gauge!(telemetry::SESSIONS_ONLINE).set(self.sessions.len() as f64);
    }
}
