//! Catalog items, their variants, and freshly fetched snapshots.
//!
//! A stored [`Item`] carries internal row identities (`id`) that change
//! records reference. An [`ItemSnapshot`] is what the fetch client hands
//! over: the same data keyed only by external identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A catalog item as stored, including its variants.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Item {
    /// Internal row id.
    pub id: i64,
    /// Stable upstream identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Upstream product page.
    pub url: String,
    /// Whether the item is currently sold.
    pub is_active: bool,
    /// Average rating.
    pub rating: f64,
    /// Number of ratings.
    pub rating_count: i64,
    /// Number of upstream favorites.
    pub favorite_count: i64,
    /// Number of upstream comments.
    pub comment_count: i64,
    /// Creation timestamp (preserved across reconciliations).
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last reconciliation.
    pub updated_at: DateTime<Utc>,
    /// Purchasable configurations of this item.
    pub variants: Vec<Variant>,
}

/// A stored purchasable configuration of an [`Item`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Variant {
    /// Internal row id, stable across updates.
    pub id: i64,
    /// Owning item's row id.
    pub item_id: i64,
    /// Upstream identifier, unique across the catalog.
    pub external_id: String,
    /// Current price.
    pub price: f64,
    /// List price before discounts.
    pub original_price: f64,
    /// Units in stock.
    pub stock_count: i64,
    /// Whether the variant is purchasable.
    pub is_active: bool,
}

/// An item as returned by the fetch client, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Stable upstream identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Upstream product page.
    #[serde(default)]
    pub url: String,
    /// Whether the item is currently sold.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Average rating.
    #[serde(default)]
    pub rating: f64,
    /// Number of ratings.
    #[serde(default)]
    pub rating_count: i64,
    /// Number of upstream favorites.
    #[serde(default)]
    pub favorite_count: i64,
    /// Number of upstream comments.
    #[serde(default)]
    pub comment_count: i64,
    /// Variants as fetched.
    #[serde(default)]
    pub variants: Vec<VariantSnapshot>,
}

/// A variant as returned by the fetch client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSnapshot {
    /// Upstream identifier.
    pub external_id: String,
    /// Current price.
    pub price: f64,
    /// List price before discounts.
    #[serde(default)]
    pub original_price: f64,
    /// Units in stock.
    #[serde(default)]
    pub stock_count: i64,
    /// Whether the variant is purchasable.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

/// Reconciled item ready to be inserted or updated inside a transaction.
///
/// `id` is `None` for a never-before-seen item. `item.variants` is empty;
/// the reconciled variants live in `variants` with their resolved ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpsert {
    /// Existing row id, if the item is already stored.
    pub id: Option<i64>,
    /// Creation timestamp to write (the stored one for existing items).
    pub created_at: DateTime<Utc>,
    /// Item-level fields from the snapshot.
    pub item: ItemSnapshot,
    /// Variants with their resolved row ids.
    pub variants: Vec<VariantUpsert>,
}

/// A variant with its resolved row identity.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantUpsert {
    /// Existing row id, reused so history rows keep pointing at it.
    pub id: Option<i64>,
    /// Fields from the snapshot.
    pub variant: VariantSnapshot,
}

/// Upstream catalog category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Category {
    /// Upstream identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Parent category's upstream identifier.
    #[serde(default)]
    pub parent_external_id: Option<String>,
    /// Depth in the category tree.
    #[serde(default)]
    pub level: i32,
}

/// A user's interest in an item; drives startup rebuilds of alert rules
/// and priorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favorite {
    /// User id.
    pub user_id: i64,
    /// Item row id.
    pub item_id: i64,
    /// Item upstream identifier.
    pub item_external_id: String,
}
