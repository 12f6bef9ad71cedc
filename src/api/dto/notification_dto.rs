//! Notification endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::{PaginationMeta, PaginationParams};
use crate::domain::NotificationRecord;

/// Query parameters of the notification list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationListParams {
    /// Recipient.
    pub user_id: i64,
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default)]
    pub page: Option<u32>,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl NotificationListParams {
    /// Pagination part of the query.
    #[must_use]
    pub fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

/// Query parameter naming one user.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    /// User id.
    pub user_id: i64,
}

/// Paginated notification list.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    /// Notifications, newest first.
    pub data: Vec<NotificationRecord>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Unread counter of one user.
#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadCountResponse {
    /// User id.
    pub user_id: i64,
    /// Number of unread notifications.
    pub unread_count: u64,
}

/// Result of `PUT /notifications/{id}/read`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    /// Notification id.
    pub id: i64,
    /// Always `true`.
    pub is_read: bool,
}

/// Body of `PUT /notifications/read-all`.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct MarkAllReadRequest {
    /// User id.
    pub user_id: i64,
}

/// Result of `PUT /notifications/read-all`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAllReadResponse {
    /// User id.
    pub user_id: i64,
    /// Notifications that changed from unread to read.
    pub updated: u64,
}
