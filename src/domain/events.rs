//! Broker message payloads.
//!
//! Events carry identifiers and deltas only; consumers re-read the store
//! for anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published on `item_changed` after a reconciliation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChanged {
    /// Upstream identifier of the reconciled item.
    pub external_id: String,
    /// Commit time.
    pub changed_at: DateTime<Utc>,
}

/// Published on `priority_update` to move an item between cohorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityUpdate {
    /// Upstream identifier of the item.
    pub item_id: String,
    /// Requested band; validated by the consumer.
    pub priority: i64,
}

/// Published on `notify_user` when an alert rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyUser {
    /// Recipient.
    pub user_id: i64,
    /// Item row id.
    pub item_id: i64,
    /// Item display name.
    pub item_name: String,
    /// Item product page.
    pub item_url: String,
    /// Variant row id whose price dropped.
    pub variant_id: i64,
    /// Price before the drop.
    pub previous_price: f64,
    /// Price after the drop.
    pub new_price: f64,
    /// Size of the drop as a positive percentage.
    pub discount_percent: f64,
}
