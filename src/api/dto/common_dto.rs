//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::persistence::Page;

/// Largest page size a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub limit: u32,
    /// Total number of rows.
    pub total: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

impl PaginationMeta {
    /// Builds the metadata for `page` out of `total` rows.
    #[must_use]
    pub fn new(page: Page, total: u64) -> Self {
        let limit = u64::from(page.limit.max(1));
        Self {
            page: page.page,
            limit: page.limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Acknowledgement of a background job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AcceptedResponse {
    /// Always `"accepted"`.
    pub status: String,
    /// What was scheduled.
    pub message: String,
}

impl AcceptedResponse {
    /// Builds an acknowledgement with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "accepted".to_string(),
            message: message.into(),
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

impl PaginationParams {
    /// Clamps `page` to at least 1 and `limit` to `1..=100`.
    #[must_use]
    pub fn clamped(&self) -> Page {
        Page {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}
