//! Persistence layer: relational store seams and their adapters.
//!
//! The [`Store`] trait is the union of three narrower traits, one per
//! service concern. Reconciliation goes through a [`CatalogTx`] obtained
//! from [`CatalogStore::begin`] so that item, variant and change-record
//! writes land atomically.
//!
//! Adapters: [`PostgresStore`] (sqlx, embedded migrations) and
//! [`MemoryStore`] for development and tests.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{
    AlertRule, Category, Favorite, Item, ItemUpsert, NewAlertRule, NewNotification,
    NewPriceChange, NewStockChange, NotificationRecord, PriceChangeRecord, StockChangeRecord,
    Variant,
};
use crate::error::PipelineError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Page number, starting at 1.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl Page {
    /// Rows to skip.
    #[must_use]
    pub const fn offset(self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.limit as u64
    }
}

/// Item listing filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only items with this active flag, when set.
    pub active: Option<bool>,
}

/// Minimal reference to an item returned by aggregate queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemRef {
    /// Row id.
    pub id: i64,
    /// Upstream identifier.
    pub external_id: String,
}

/// Catalog-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemStats {
    /// Number of stored items.
    pub total_items: i64,
    /// Number of active items.
    pub active_items: i64,
    /// Items first stored inside the window.
    pub new_items: i64,
    /// Items re-reconciled inside the window, excluding their first insert.
    pub updated_items: i64,
    /// Number of stored variants.
    pub total_variants: i64,
    /// Number of price change records.
    pub price_changes: i64,
    /// Number of stock change records.
    pub stock_changes: i64,
}

/// One of the largest recent price drops.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriceDrop {
    /// Item row id.
    pub item_id: i64,
    /// Item display name.
    pub item_name: String,
    /// Variant row id.
    pub variant_id: i64,
    /// Price before the drop.
    pub previous_price: f64,
    /// Price after the drop.
    pub new_price: f64,
    /// Negative percentage.
    pub change_percent: f64,
}

/// Aggregates over every recorded price change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct PriceStats {
    /// Mean `change_percent`; zero when nothing is recorded.
    pub avg_change: f64,
    /// Changes with a positive percentage.
    pub increases: i64,
    /// Changes with a negative percentage.
    pub decreases: i64,
    /// Largest drops inside the window, steepest first.
    pub biggest_drops: Vec<PriceDrop>,
}

/// An item and how many users favorited it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FavoriteCount {
    /// Item row id.
    pub item_id: i64,
    /// Item display name.
    pub name: String,
    /// Number of users.
    pub count: i64,
}

/// User favorite aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct FavoriteStats {
    /// Number of (user, item) favorites.
    pub total_favorites: i64,
    /// Distinct users with at least one favorite.
    pub users_with_favorites: i64,
    /// Most favorited items, most popular first.
    pub popular_items: Vec<FavoriteCount>,
}

/// Change records of one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DailyTrend {
    /// UTC calendar day.
    pub date: NaiveDate,
    /// Mean change (percent for prices, units for stock).
    pub avg_change: f64,
    /// Positive changes.
    pub increases: i64,
    /// Negative changes.
    pub decreases: i64,
    /// Zero changes.
    pub no_change: i64,
    /// Every change of the day.
    pub total_changes: i64,
}

/// A single reconciliation transaction.
///
/// Dropping a transaction without calling [`CatalogTx::commit`] discards
/// every staged write.
#[async_trait]
pub trait CatalogTx: Send {
    /// Loads an item and its variants by upstream identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn find_item(&mut self, external_id: &str) -> Result<Option<Item>, PipelineError>;

    /// Stages one price change record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn insert_price_change(&mut self, change: &NewPriceChange) -> Result<(), PipelineError>;

    /// Stages one stock change record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn insert_stock_change(&mut self, change: &NewStockChange) -> Result<(), PipelineError>;

    /// Inserts or updates the item and its variants. Returns the item row id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn upsert_item(&mut self, upsert: &ItemUpsert) -> Result<i64, PipelineError>;

    /// Makes every staged write visible.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if the commit fails; in
    /// that case nothing was written.
    async fn commit(self: Box<Self>) -> Result<(), PipelineError>;

    /// Discards every staged write.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if the backend reports a
    /// failure while rolling back.
    async fn rollback(self: Box<Self>) -> Result<(), PipelineError>;
}

/// Items, categories, change history and the lookups the crawler and
/// analyzer need.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Opens a reconciliation transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, PipelineError>;

    /// Returns `true` if an item with this upstream identifier is stored.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn item_exists(&self, external_id: &str) -> Result<bool, PipelineError>;

    /// Loads an item by upstream identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn find_item(&self, external_id: &str) -> Result<Option<Item>, PipelineError>;

    /// Loads an item by row id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn find_item_by_id(&self, id: i64) -> Result<Option<Item>, PipelineError>;

    /// Lists items ordered by row id. Returns the page and the total count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_items(&self, filter: ItemFilter, page: Page) -> Result<(Vec<Item>, u64), PipelineError>;

    /// Catalog-wide counters. `since` bounds the new and updated counts.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn item_stats(&self, since: DateTime<Utc>) -> Result<ItemStats, PipelineError>;

    /// Price change aggregates with the `top` steepest drops since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn price_stats(&self, since: DateTime<Utc>, top: u32) -> Result<PriceStats, PipelineError>;

    /// Favorite aggregates with the `top` most favorited items.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn favorite_stats(&self, top: u32) -> Result<FavoriteStats, PipelineError>;

    /// Daily price change aggregates since `since`, newest day first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn price_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError>;

    /// Daily stock change aggregates since `since`, newest day first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn stock_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError>;

    /// Inserts or renames categories.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn upsert_categories(&self, categories: &[Category]) -> Result<(), PipelineError>;

    /// Lists categories ordered by level then upstream identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_categories(&self) -> Result<Vec<Category>, PipelineError>;

    /// Loads a category by upstream identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn find_category(&self, external_id: &str) -> Result<Option<Category>, PipelineError>;

    /// The `limit` most recent price changes of an item, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn recent_price_changes(&self, item_id: i64, limit: u32) -> Result<Vec<PriceChangeRecord>, PipelineError>;

    /// Paginated price history of an item, newest first, with total count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn price_history(&self, item_id: i64, page: Page) -> Result<(Vec<PriceChangeRecord>, u64), PipelineError>;

    /// Paginated stock history of an item, newest first, with total count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn stock_history(&self, item_id: i64, page: Page) -> Result<(Vec<StockChangeRecord>, u64), PipelineError>;

    /// Loads a variant by row id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn find_variant(&self, variant_id: i64) -> Result<Option<Variant>, PipelineError>;

    /// Items whose average price change exceeds `min_avg_percent`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn price_trend_items(&self, min_avg_percent: f64, limit: u32) -> Result<Vec<ItemRef>, PipelineError>;

    /// Items whose average stock change is below `max_avg_quantity`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn stock_trend_items(&self, max_avg_quantity: f64, limit: u32) -> Result<Vec<ItemRef>, PipelineError>;

    /// Items with a price change below `below_percent` since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn price_drop_anomalies(&self, since: DateTime<Utc>, below_percent: f64, limit: u32) -> Result<Vec<ItemRef>, PipelineError>;

    /// Items with a stock increase above `above_quantity` since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn stock_spike_anomalies(&self, since: DateTime<Utc>, above_quantity: i64, limit: u32) -> Result<Vec<ItemRef>, PipelineError>;

    /// Active items with more than `min_favorites` upstream favorites, most
    /// favorited first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn popular_items(&self, min_favorites: i64, limit: u32) -> Result<Vec<ItemRef>, PipelineError>;

    /// Persists a priority band.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn save_priority(&self, external_id: &str, band: u8) -> Result<(), PipelineError>;

    /// Every persisted priority band.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_priorities(&self) -> Result<Vec<(String, u8)>, PipelineError>;
}

/// Users, favorites and alert rules.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Returns `true` if the user exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn user_exists(&self, user_id: i64) -> Result<bool, PipelineError>;

    /// Every (user, item) favorite.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_favorites(&self) -> Result<Vec<Favorite>, PipelineError>;

    /// Creates the favorite unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn ensure_favorite(&self, user_id: i64, item_id: i64) -> Result<(), PipelineError>;

    /// Stores a new rule and returns it with its id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn insert_alert_rule(&self, rule: &NewAlertRule, created_at: DateTime<Utc>) -> Result<AlertRule, PipelineError>;

    /// Deletes a rule by id. Deleting a missing rule is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn delete_alert_rule(&self, rule_id: i64) -> Result<(), PipelineError>;

    /// Every stored rule.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, PipelineError>;

    /// Records the last notification time of a rule.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn touch_alert_rule(&self, rule_id: i64, at: DateTime<Utc>) -> Result<(), PipelineError>;
}

/// Durable notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Stores an unread notification.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn insert_notification(&self, notification: &NewNotification) -> Result<NotificationRecord, PipelineError>;

    /// Number of unread notifications of a user.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn unread_count(&self, user_id: i64) -> Result<u64, PipelineError>;

    /// A user's notifications, newest first, with the total count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn list_notifications(&self, user_id: i64, unread_only: bool, page: Page) -> Result<(Vec<NotificationRecord>, u64), PipelineError>;

    /// Marks one notification read. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn mark_read(&self, notification_id: i64) -> Result<bool, PipelineError>;

    /// Marks every notification of a user read. Returns the number updated.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn mark_all_read(&self, user_id: i64) -> Result<u64, PipelineError>;

    /// Deletes notifications delivered before `cutoff`. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on backend failure.
    async fn delete_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PipelineError>;
}

/// Everything the pipeline persists.
pub trait Store: CatalogStore + AlertStore + NotificationStore + fmt::Debug {}

impl<T> Store for T where T: CatalogStore + AlertStore + NotificationStore + fmt::Debug {}
