//! Row shapes returned by the PostgreSQL queries and their conversion into
//! domain types.

use chrono::{DateTime, Utc};

use crate::domain::{
    AlertRule, Category, Item, NotificationRecord, PriceChangeRecord, StockChangeRecord, Variant,
};

/// `items` row: id, external_id, name, url, is_active, rating, rating_count,
/// favorite_count, comment_count, created_at, updated_at.
pub type ItemRow = (
    i64,
    String,
    String,
    String,
    bool,
    f64,
    i64,
    i64,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// `variants` row: id, item_id, external_id, price, original_price,
/// stock_count, is_active.
pub type VariantRow = (i64, i64, String, f64, f64, i64, bool);

/// `price_changes` row.
pub type PriceChangeRow = (i64, i64, i64, f64, f64, f64, DateTime<Utc>);

/// `stock_changes` row.
pub type StockChangeRow = (i64, i64, i64, i64, i64, i64, DateTime<Utc>);

/// `categories` row: external_id, name, parent_external_id, level.
pub type CategoryRow = (String, String, Option<String>, i32);

/// `alert_rules` row: id, user_id, item_id, variant_id, threshold_percent,
/// last_notified_at, created_at.
pub type AlertRuleRow = (
    i64,
    i64,
    i64,
    Option<i64>,
    f64,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

/// `notifications` row: id, user_id, item_id, message, is_read,
/// delivered_at.
pub type NotificationRow = (i64, i64, i64, String, bool, DateTime<Utc>);

/// Column list matching [`ItemRow`].
pub const ITEM_COLUMNS: &str = "id, external_id, name, url, is_active, rating, rating_count, \
     favorite_count, comment_count, created_at, updated_at";

/// Column list matching [`VariantRow`].
pub const VARIANT_COLUMNS: &str =
    "id, item_id, external_id, price, original_price, stock_count, is_active";

/// Builds an [`Item`] from its row and already-loaded variants.
#[must_use]
pub fn item_from_row(row: ItemRow, variants: Vec<Variant>) -> Item {
    let (
        id,
        external_id,
        name,
        url,
        is_active,
        rating,
        rating_count,
        favorite_count,
        comment_count,
        created_at,
        updated_at,
    ) = row;
    Item {
        id,
        external_id,
        name,
        url,
        is_active,
        rating,
        rating_count,
        favorite_count,
        comment_count,
        created_at,
        updated_at,
        variants,
    }
}

/// Converts a [`VariantRow`].
#[must_use]
pub fn variant_from_row(row: VariantRow) -> Variant {
    let (id, item_id, external_id, price, original_price, stock_count, is_active) = row;
    Variant {
        id,
        item_id,
        external_id,
        price,
        original_price,
        stock_count,
        is_active,
    }
}

/// Converts a [`PriceChangeRow`].
#[must_use]
pub fn price_change_from_row(row: PriceChangeRow) -> PriceChangeRecord {
    let (id, item_id, variant_id, previous_price, new_price, change_percent, created_at) = row;
    PriceChangeRecord {
        id,
        item_id,
        variant_id,
        previous_price,
        new_price,
        change_percent,
        created_at,
    }
}

/// Converts a [`StockChangeRow`].
#[must_use]
pub fn stock_change_from_row(row: StockChangeRow) -> StockChangeRecord {
    let (id, item_id, variant_id, previous_stock, new_stock, change_quantity, created_at) = row;
    StockChangeRecord {
        id,
        item_id,
        variant_id,
        previous_stock,
        new_stock,
        change_quantity,
        created_at,
    }
}

/// Converts a [`CategoryRow`].
#[must_use]
pub fn category_from_row(row: CategoryRow) -> Category {
    let (external_id, name, parent_external_id, level) = row;
    Category {
        external_id,
        name,
        parent_external_id,
        level,
    }
}

/// Converts an [`AlertRuleRow`].
#[must_use]
pub fn alert_rule_from_row(row: AlertRuleRow) -> AlertRule {
    let (id, user_id, item_id, variant_id, threshold_percent, last_notified_at, created_at) = row;
    AlertRule {
        id,
        user_id,
        item_id,
        variant_id,
        threshold_percent,
        last_notified_at,
        created_at,
    }
}

/// Converts a [`NotificationRow`].
#[must_use]
pub fn notification_from_row(row: NotificationRow) -> NotificationRecord {
    let (id, user_id, item_id, message, is_read, delivered_at) = row;
    NotificationRecord {
        id,
        user_id,
        item_id,
        message,
        is_read,
        delivered_at,
    }
}
