//! WebSocket layer: live notification push.
//!
//! `GET /api/v1/notifications/ws/{user_id}` upgrades to a connection that
//! receives an `init` frame followed by one `notification` frame per
//! delivered message. Pings are sent on the keepalive period.

pub mod connection;
pub mod handler;
pub mod messages;
