//! Frames sent to live notification clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::LivePush;

/// Server → client frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveFrame {
    /// First frame of every connection.
    Init {
        /// Unread notifications at connect time.
        unread_count: u64,
        /// When the server accepted the connection.
        connected_at: DateTime<Utc>,
    },
    /// A pushed notification.
    Notification {
        /// Rendered notification text.
        message: String,
        /// When the notification was produced.
        time: DateTime<Utc>,
    },
}

impl From<LivePush> for LiveFrame {
    fn from(push: LivePush) -> Self {
        Self::Notification {
            message: push.message,
            time: push.time,
        }
    }
}

impl LiveFrame {
    /// JSON text of the frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; cannot happen for these field types.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn init_frame_shape() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        let frame = LiveFrame::Init {
            unread_count: 4,
            connected_at: at,
        };
        let value = serde_json::to_value(&frame).unwrap_or_default();
        assert_eq!(value["type"], "init");
        assert_eq!(value["unread_count"], 4);
        assert_eq!(value["connected_at"], "2026-03-01T12:00:00Z");
    }

    #[test]
    fn push_becomes_notification_frame() {
        let push = LivePush {
            message: "Price dropped".to_string(),
            time: Utc::now(),
        };
        let value = serde_json::to_value(LiveFrame::from(push)).unwrap_or_default();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["message"], "Price dropped");
    }
}
