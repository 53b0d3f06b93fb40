//! Chat service metric names and their descriptions.

use metrics::{describe_counter, describe_gauge, Unit};

pub const MESSAGES_APPENDED: &str = "chat_messages_appended_total";
pub const CONVERSATIONS_CREATED: &str = "chat_conversations_created_total";
pub const SESSIONS_ONLINE: &str = "chat_sessions_online";

/// Register descriptions with the installed recorder. Call once after
/// `init_metrics`.
pub fn describe() {
    describe_counter!(
        MESSAGES_APPENDED,
        Unit::Count,
        "Messages stored, from REST and the realtime gateway"
    );
    describe_counter!(
        CONVERSATIONS_CREATED,
        Unit::Count,
        "Direct conversations created; concurrent-create races are not counted twice"
    );
    describe_gauge!(
        SESSIONS_ONLINE,
        Unit::Count,
        "Users with a tracked realtime connection"
    );
}
