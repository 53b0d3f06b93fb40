pub mod connection;
pub mod dispatch;
pub mod events;
pub mod handlers;
