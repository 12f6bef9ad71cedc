//! In-memory priority table driving the re-fetch cadence.
//!
//! [`PriorityTable`] maps item external identifiers to a band in `0..=10`.
//! Bands at or above [`HIGH_BAND_THRESHOLD`] belong to the high cohort,
//! refreshed on the fast timer; everything else is the low cohort.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PipelineError;

/// Lowest valid band.
pub const MIN_PRIORITY: u8 = 0;
/// Highest valid band.
pub const MAX_PRIORITY: u8 = 10;
/// Band assigned to items that are known but have no explicit entry.
pub const DEFAULT_PRIORITY: u8 = 1;
/// Band assigned to items that some user has favorited.
pub const FAVORITE_PRIORITY: u8 = 10;
/// Band published by the analyzer for trending items.
pub const BOOST_PRIORITY: u8 = 8;
/// Bands at or above this value are in the high cohort.
pub const HIGH_BAND_THRESHOLD: u8 = 5;

/// Refresh cohort selected by a scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    /// Band `>= 5`, refreshed on the fast timer.
    High,
    /// Band `< 5`, refreshed on the slow timer with a capped batch.
    Low,
}

impl Cohort {
    /// Returns the cohort a band belongs to.
    #[must_use]
    pub const fn of(band: u8) -> Self {
        if band >= HIGH_BAND_THRESHOLD {
            Self::High
        } else {
            Self::Low
        }
    }

    /// Returns the cohort name as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Validates a raw band value.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPriority`] when `raw` is outside `0..=10`.
pub fn validate_band(raw: i64) -> Result<u8, PipelineError> {
    u8::try_from(raw)
        .ok()
        .filter(|band| (MIN_PRIORITY..=MAX_PRIORITY).contains(band))
        .ok_or(PipelineError::InvalidPriority(raw))
}

/// Item identifier → band, guarded by a single read/write lock.
///
/// Readers are the periodic cohort scans; writers are API calls, broker
/// priority updates, and the discovery pass.
#[derive(Debug, Default)]
pub struct PriorityTable {
    entries: RwLock<HashMap<String, u8>>,
}

impl PriorityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the band for an item, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPriority`] when `band > 10`.
    pub async fn set(&self, item_id: &str, band: u8) -> Result<(), PipelineError> {
        if band > MAX_PRIORITY {
            return Err(PipelineError::InvalidPriority(i64::from(band)));
        }
        self.entries.write().await.insert(item_id.to_string(), band);
        Ok(())
    }

    /// Inserts the default band unless an entry already exists.
    ///
    /// Returns `true` if an entry was created.
    pub async fn ensure_default(&self, item_id: &str) -> bool {
        let mut map = self.entries.write().await;
        if map.contains_key(item_id) {
            return false;
        }
        map.insert(item_id.to_string(), DEFAULT_PRIORITY);
        true
    }

    /// Returns the band for an item, if it has an entry.
    pub async fn get(&self, item_id: &str) -> Option<u8> {
        self.entries.read().await.get(item_id).copied()
    }

    /// Point-in-time snapshot of the identifiers in `cohort`, sorted.
    pub async fn select(&self, cohort: Cohort) -> Vec<String> {
        let map = self.entries.read().await;
        let mut ids: Vec<String> = map
            .iter()
            .filter(|(_, band)| Cohort::of(**band) == cohort)
            .map(|(id, _)| id.clone())
            .collect();
        drop(map);
        ids.sort_unstable();
        ids
    }

    /// Returns the number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the table has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Takes up to `max` identifiers from `ids` starting at `cursor`, wrapping
/// around. Returns the batch and the cursor for the next call.
#[must_use]
pub fn rotate_batch(ids: &[String], cursor: usize, max: usize) -> (Vec<String>, usize) {
    if ids.is_empty() || max == 0 {
        return (Vec::new(), 0);
    }
    if ids.len() <= max {
        return (ids.to_vec(), 0);
    }
    let start = cursor % ids.len();
    let batch = ids
        .iter()
        .cycle()
        .skip(start)
        .take(max)
        .cloned()
        .collect();
    (batch, (start + max) % ids.len())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn band_seven_is_high_only() {
        let table = PriorityTable::new();
        let Ok(()) = table.set("sku-7", 7).await else {
            panic!("valid band");
        };
        assert_eq!(table.select(Cohort::High).await, vec!["sku-7".to_string()]);
        assert!(table.select(Cohort::Low).await.is_empty());
    }

    #[tokio::test]
    async fn band_three_is_low_only() {
        let table = PriorityTable::new();
        let Ok(()) = table.set("sku-3", 3).await else {
            panic!("valid band");
        };
        assert_eq!(table.select(Cohort::Low).await, vec!["sku-3".to_string()]);
        assert!(table.select(Cohort::High).await.is_empty());
    }

    #[tokio::test]
    async fn set_overwrites_and_moves_cohort() {
        let table = PriorityTable::new();
        let _ = table.set("sku", 2).await;
        let _ = table.set("sku", 9).await;
        assert_eq!(table.len().await, 1);
        assert_eq!(table.get("sku").await, Some(9));
        assert_eq!(table.select(Cohort::High).await.len(), 1);
    }

    #[tokio::test]
    async fn set_rejects_out_of_range() {
        let table = PriorityTable::new();
        assert!(table.set("sku", 11).await.is_err());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn ensure_default_keeps_existing_band() {
        let table = PriorityTable::new();
        let _ = table.set("fav", FAVORITE_PRIORITY).await;
        assert!(!table.ensure_default("fav").await);
        assert!(table.ensure_default("new").await);
        assert_eq!(table.get("fav").await, Some(FAVORITE_PRIORITY));
        assert_eq!(table.get("new").await, Some(DEFAULT_PRIORITY));
        assert_eq!(table.get("absent").await, None);
    }

    #[test]
    fn validate_band_bounds() {
        assert_eq!(validate_band(0).ok(), Some(0));
        assert_eq!(validate_band(10).ok(), Some(10));
        assert!(validate_band(-1).is_err());
        assert!(validate_band(11).is_err());
        assert!(validate_band(300).is_err());
    }

    #[test]
    fn rotate_batch_wraps_around() {
        let ids: Vec<String> = (0..5).map(|i| format!("id-{i}")).collect();
        let (first, cursor) = rotate_batch(&ids, 0, 3);
        assert_eq!(first, vec!["id-0", "id-1", "id-2"]);
        assert_eq!(cursor, 3);
        let (second, cursor) = rotate_batch(&ids, cursor, 3);
        assert_eq!(second, vec!["id-3", "id-4", "id-0"]);
        assert_eq!(cursor, 1);
    }

    #[test]
    fn rotate_batch_under_cap_returns_all() {
        let ids: Vec<String> = vec!["a".to_string(), "b".to_string()];
        let (batch, cursor) = rotate_batch(&ids, 7, 100);
        assert_eq!(batch.len(), 2);
        assert_eq!(cursor, 0);
    }
}
