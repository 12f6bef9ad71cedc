//! Analyzer endpoint DTOs: history pages, trend windows and price alert
//! requests.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{NewAlertRule, PriceChangeRecord, StockChangeRecord};

/// Paginated price history of one item.
#[derive(Debug, Serialize, ToSchema)]
pub struct PriceHistoryResponse {
    /// Item row id.
    pub item_id: i64,
    /// Records, newest first.
    pub data: Vec<PriceChangeRecord>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Paginated stock history of one item.
#[derive(Debug, Serialize, ToSchema)]
pub struct StockHistoryResponse {
    /// Item row id.
    pub item_id: i64,
    /// Records, newest first.
    pub data: Vec<StockChangeRecord>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Trend window used when `days` is missing or not positive.
pub const DEFAULT_TREND_DAYS: i64 = 30;

/// Longest trend window a client may request.
pub const MAX_TREND_DAYS: i64 = 365;

/// Query of the daily trend endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TrendParams {
    /// Days to look back (default 30, max 365).
    #[serde(default)]
    pub days: Option<i64>,
}

impl TrendParams {
    /// The effective window in days.
    #[must_use]
    pub fn window_days(self) -> i64 {
        match self.days {
            Some(days) if days > 0 => days.min(MAX_TREND_DAYS),
            _ => DEFAULT_TREND_DAYS,
        }
    }
}

/// Body of `POST /analyzer/alerts/price`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateAlertRequest {
    /// Owner of the rule.
    pub user_id: i64,
    /// Watched item row id.
    pub item_id: i64,
    /// Restricts the rule to one variant of the item.
    #[serde(default)]
    pub variant_id: Option<i64>,
    /// Minimum drop in percent; must be positive.
    #[serde(alias = "discount_percent")]
    pub threshold_percent: f64,
}

impl From<CreateAlertRequest> for NewAlertRule {
    fn from(req: CreateAlertRequest) -> Self {
        Self {
            user_id: req.user_id,
            item_id: req.item_id,
            variant_id: req.variant_id,
            threshold_percent: req.threshold_percent,
        }
    }
}

/// Body of `DELETE /analyzer/alerts/price`.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct DeleteAlertRequest {
    /// Owner of the rule.
    pub user_id: i64,
    /// Watched item row id.
    pub item_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_window_defaults_and_caps() {
        assert_eq!(TrendParams { days: None }.window_days(), DEFAULT_TREND_DAYS);
        assert_eq!(TrendParams { days: Some(0) }.window_days(), DEFAULT_TREND_DAYS);
        assert_eq!(TrendParams { days: Some(-3) }.window_days(), DEFAULT_TREND_DAYS);
        assert_eq!(TrendParams { days: Some(7) }.window_days(), 7);
        assert_eq!(TrendParams { days: Some(i64::MAX) }.window_days(), MAX_TREND_DAYS);
    }
}
