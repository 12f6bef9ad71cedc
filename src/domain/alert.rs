//! Per-user price-drop alert rules and their in-memory index.
//!
//! Matching is a pure function of a rule, the item's recent change records
//! and the current time, so the suppression window can be exercised without
//! a clock.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use super::change::PriceChangeRecord;

/// Threshold installed for favorited items that have no explicit rule.
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 10.0;

/// Minimum quiet period between two notifications of the same rule.
pub const NOTIFY_COOLDOWN_HOURS: i64 = 24;

/// A user's discount threshold on one item (optionally one variant).
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AlertRule {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: i64,
    /// Watched item row id.
    pub item_id: i64,
    /// Restricts matching to one variant when set.
    pub variant_id: Option<i64>,
    /// Minimum drop, in percent, that triggers a notification.
    pub threshold_percent: f64,
    /// Last successful notification.
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields of a rule before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlertRule {
    /// Owner.
    pub user_id: i64,
    /// Watched item row id.
    pub item_id: i64,
    /// Optional variant restriction.
    pub variant_id: Option<i64>,
    /// Minimum drop in percent.
    pub threshold_percent: f64,
}

impl AlertRule {
    /// Returns `true` while the rule is inside its cooldown window.
    #[must_use]
    pub fn is_suppressed(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_notified_at
            .is_some_and(|last| now.signed_duration_since(last) <= cooldown)
    }

    /// Returns `true` if `change` is a drop at or beyond the threshold on a
    /// variant this rule watches.
    #[must_use]
    pub fn accepts(&self, change: &PriceChangeRecord) -> bool {
        if self.variant_id.is_some_and(|v| v != change.variant_id) {
            return false;
        }
        change.change_percent <= -self.threshold_percent
    }

    /// Returns the first qualifying change, or `None` when the rule is
    /// suppressed or nothing qualifies.
    ///
    /// Only one change is returned because the cooldown is keyed per rule:
    /// once it fires, every further drop inside the window is swallowed.
    #[must_use]
    pub fn first_match<'a>(
        &self,
        changes: &'a [PriceChangeRecord],
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<&'a PriceChangeRecord> {
        if self.is_suppressed(now, cooldown) {
            return None;
        }
        changes.iter().find(|change| self.accepts(change))
    }
}

/// Item row id → rules, guarded by a single read/write lock.
#[derive(Debug, Default)]
pub struct AlertBook {
    rules: RwLock<HashMap<i64, Vec<AlertRule>>>,
}

impl AlertBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    pub async fn insert(&self, rule: AlertRule) {
        self.rules
            .write()
            .await
            .entry(rule.item_id)
            .or_default()
            .push(rule);
    }

    /// Returns `true` if the (user, item) pair already has a rule.
    pub async fn contains(&self, user_id: i64, item_id: i64) -> bool {
        self.rules
            .read()
            .await
            .get(&item_id)
            .is_some_and(|rules| rules.iter().any(|r| r.user_id == user_id))
    }

    /// Removes and returns the first rule for the (user, item) pair.
    pub async fn remove_first(&self, user_id: i64, item_id: i64) -> Option<AlertRule> {
        let mut map = self.rules.write().await;
        let rules = map.get_mut(&item_id)?;
        let pos = rules.iter().position(|r| r.user_id == user_id)?;
        let removed = rules.remove(pos);
        if rules.is_empty() {
            map.remove(&item_id);
        }
        Some(removed)
    }

    /// Snapshot of the rules watching an item.
    pub async fn for_item(&self, item_id: i64) -> Vec<AlertRule> {
        self.rules
            .read()
            .await
            .get(&item_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of a user's rules, ordered by item.
    pub async fn for_user(&self, user_id: i64) -> Vec<AlertRule> {
        let map = self.rules.read().await;
        let mut rules: Vec<AlertRule> = map
            .values()
            .flatten()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        drop(map);
        rules.sort_by_key(|r| (r.item_id, r.id));
        rules
    }

    /// Records a successful notification for the rule with `rule_id`.
    pub async fn mark_notified(&self, item_id: i64, rule_id: i64, at: DateTime<Utc>) {
        let mut map = self.rules.write().await;
        if let Some(rule) = map
            .get_mut(&item_id)
            .and_then(|rules| rules.iter_mut().find(|r| r.id == rule_id))
        {
            rule.last_notified_at = Some(at);
        }
    }

    /// Total number of rules.
    pub async fn len(&self) -> usize {
        self.rules.read().await.values().map(Vec::len).sum()
    }

    /// Returns `true` if no rules are installed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
