//! Immutable price and stock change records.
//!
//! Records are append-only: they are written once inside the
//! reconciliation transaction and never updated afterwards.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::item::{Variant, VariantSnapshot};

/// A stored price change of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriceChangeRecord {
    /// Row id.
    pub id: i64,
    /// Item row id.
    pub item_id: i64,
    /// Variant row id.
    pub variant_id: i64,
    /// Price before the change.
    pub previous_price: f64,
    /// Price after the change.
    pub new_price: f64,
    /// `(new - old) / old * 100`, or `0` when the old price was zero.
    pub change_percent: f64,
    /// When the change was detected.
    pub created_at: DateTime<Utc>,
}

/// A stored stock change of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StockChangeRecord {
    /// Row id.
    pub id: i64,
    /// Item row id.
    pub item_id: i64,
    /// Variant row id.
    pub variant_id: i64,
    /// Stock before the change.
    pub previous_stock: i64,
    /// Stock after the change.
    pub new_stock: i64,
    /// `new_stock - previous_stock`.
    pub change_quantity: i64,
    /// When the change was detected.
    pub created_at: DateTime<Utc>,
}

/// A price change staged for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceChange {
    /// Item row id.
    pub item_id: i64,
    /// Variant row id.
    pub variant_id: i64,
    /// Price before the change.
    pub previous_price: f64,
    /// Price after the change.
    pub new_price: f64,
    /// Derived percentage.
    pub change_percent: f64,
}

/// A stock change staged for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockChange {
    /// Item row id.
    pub item_id: i64,
    /// Variant row id.
    pub variant_id: i64,
    /// Stock before the change.
    pub previous_stock: i64,
    /// Stock after the change.
    pub new_stock: i64,
    /// Derived delta.
    pub change_quantity: i64,
}

/// Percentage change from `old` to `new`. Zero when `old` is zero.
#[must_use]
pub fn percent_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        return 0.0;
    }
    (new - old) / old * 100.0
}

/// Compares a stored variant with its incoming snapshot.
///
/// Both comparisons are exact; any difference yields one staged record.
/// The stock delta saturates at the `i64` bounds.
#[must_use]
pub fn diff_variant(
    existing: &Variant,
    incoming: &VariantSnapshot,
) -> (Option<NewPriceChange>, Option<NewStockChange>) {
    #[allow(clippy::float_cmp)]
    let price = (existing.price != incoming.price).then(|| NewPriceChange {
        item_id: existing.item_id,
        variant_id: existing.id,
        previous_price: existing.price,
        new_price: incoming.price,
        change_percent: percent_change(existing.price, incoming.price),
    });

    let stock = (existing.stock_count != incoming.stock_count).then(|| NewStockChange {
        item_id: existing.item_id,
        variant_id: existing.id,
        previous_stock: existing.stock_count,
        new_stock: incoming.stock_count,
        change_quantity: incoming.stock_count.saturating_sub(existing.stock_count),
    });

    (price, stock)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn stored(price: f64, stock: i64) -> Variant {
        Variant {
            id: 7,
            item_id: 3,
            external_id: "v-1".to_string(),
            price,
            original_price: price,
            stock_count: stock,
            is_active: true,
        }
    }

    fn incoming(price: f64, stock: i64) -> VariantSnapshot {
        VariantSnapshot {
            external_id: "v-1".to_string(),
            price,
            original_price: price,
            stock_count: stock,
            is_active: true,
        }
    }

    #[test]
    fn percent_change_of_drop() {
        let pct = percent_change(100.0, 80.0);
        assert!((pct - -20.0).abs() < 1e-9);
    }

    #[test]
    fn percent_change_from_zero_is_zero() {
        let pct = percent_change(0.0, 50.0);
        assert_eq!(pct, 0.0);
        assert!(pct.is_finite());
    }

    #[test]
    fn price_drop_without_stock_change() {
        let (price, stock) = diff_variant(&stored(100.0, 5), &incoming(80.0, 5));
        let Some(price) = price else {
            panic!("expected a price change");
        };
        assert_eq!(price.variant_id, 7);
        assert_eq!(price.item_id, 3);
        assert_eq!(price.previous_price, 100.0);
        assert_eq!(price.new_price, 80.0);
        assert!((price.change_percent - -20.0).abs() < 1e-9);
        assert!(stock.is_none());
    }

    #[test]
    fn stock_move_records_delta() {
        let (price, stock) = diff_variant(&stored(10.0, 12), &incoming(10.0, 4));
        assert!(price.is_none());
        let Some(stock) = stock else {
            panic!("expected a stock change");
        };
        assert_eq!(stock.change_quantity, -8);
    }

    #[test]
    fn identical_snapshot_has_no_changes() {
        let (price, stock) = diff_variant(&stored(10.0, 12), &incoming(10.0, 12));
        assert!(price.is_none());
        assert!(stock.is_none());
    }

    #[test]
    fn extreme_stock_delta_saturates() {
        let (_, stock) = diff_variant(&stored(10.0, i64::MIN), &incoming(10.0, i64::MAX));
        let Some(stock) = stock else {
            panic!("expected a stock change");
        };
        assert_eq!(stock.change_quantity, i64::MAX);

        let (_, stock) = diff_variant(&stored(10.0, i64::MAX), &incoming(10.0, -1));
        let Some(stock) = stock else {
            panic!("expected a stock change");
        };
        assert_eq!(stock.change_quantity, i64::MIN);
    }
}
