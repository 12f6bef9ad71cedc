//! Crawler endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::{PaginationMeta, PaginationParams};
use crate::domain::Item;
use crate::persistence::ItemFilter;

/// Query parameters of `GET /crawler/items`.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ItemListParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default)]
    pub page: Option<u32>,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only active or only inactive items.
    #[serde(default)]
    pub active: Option<bool>,
}

impl ItemListParams {
    /// Pagination part of the query.
    #[must_use]
    pub fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }

    /// Filter part of the query.
    #[must_use]
    pub const fn filter(&self) -> ItemFilter {
        ItemFilter {
            active: self.active,
        }
    }
}

/// Paginated item list.
#[derive(Debug, Serialize, ToSchema)]
pub struct ItemListResponse {
    /// Items of this page, ordered by row id.
    pub data: Vec<Item>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Body of `POST /crawler/items/{external_id}/priority`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetPriorityRequest {
    /// Band in `0..=10`.
    pub priority: i64,
}

/// Priority after the update.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SetPriorityResponse {
    /// Upstream identifier of the item.
    pub item_id: String,
    /// Stored band.
    pub priority: u8,
}
