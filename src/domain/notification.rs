//! Durable per-user notification records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Retention window applied by the daily cleanup.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct NotificationRecord {
    /// Row id.
    pub id: i64,
    /// Recipient.
    pub user_id: i64,
    /// Item the notification is about (row id).
    pub item_id: i64,
    /// Rendered text.
    pub message: String,
    /// Read flag.
    pub is_read: bool,
    /// When the notification was created.
    pub delivered_at: DateTime<Utc>,
}

/// A notification about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    /// Recipient.
    pub user_id: i64,
    /// Item row id.
    pub item_id: i64,
    /// Rendered text.
    pub message: String,
    /// Creation timestamp.
    pub delivered_at: DateTime<Utc>,
}

/// Renders the user-facing text of a price-drop alert.
#[must_use]
pub fn render_price_drop(
    item_name: &str,
    new_price: f64,
    previous_price: f64,
    discount_percent: f64,
) -> String {
    format!(
        "Price drop alert: {item_name} is now {new_price:.2} (was {previous_price:.2}, {discount_percent:.1}% discount)"
    )
}
