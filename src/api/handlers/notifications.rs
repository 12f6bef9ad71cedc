//! Notification handlers: listing, unread counter and read markers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::api::dto::{
    MarkAllReadRequest, MarkAllReadResponse, MarkReadResponse, NotificationListParams,
    NotificationListResponse, PaginationMeta, UnreadCountResponse, UserQuery,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, PipelineError};
use crate::ws::handler::live_handler;

/// `GET /notifications`: A user's notifications.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] for an unknown user.
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    tag = "Notifications",
    summary = "List notifications",
    description = "Returns the user's notifications, newest first.",
    params(NotificationListParams),
    responses(
        (status = 200, description = "Paginated notification list", body = NotificationListResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, PipelineError> {
    list(&state, params, false).await
}

/// `GET /notifications/unread`: A user's unread notifications.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] for an unknown user.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/unread",
    tag = "Notifications",
    summary = "List unread notifications",
    description = "Returns the user's unread notifications, newest first.",
    params(NotificationListParams),
    responses(
        (status = 200, description = "Paginated notification list", body = NotificationListResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn list_unread(
    State(state): State<AppState>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, PipelineError> {
    list(&state, params, true).await
}

/// `GET /notifications/unread/count`: Unread counter.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] for an unknown user.
#[utoipa::path(
    get,
    path = "/api/v1/notifications/unread/count",
    tag = "Notifications",
    summary = "Unread count",
    description = "Returns how many of the user's notifications are unread.",
    params(UserQuery),
    responses(
        (status = 200, description = "Unread counter", body = UnreadCountResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn unread_count(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, PipelineError> {
    let notifier = state.notifier()?;
    notifier.ensure_user(query.user_id).await?;
    let unread_count = notifier.unread_count(query.user_id).await?;
    Ok(Json(UnreadCountResponse {
        user_id: query.user_id,
        unread_count,
    }))
}

/// `PUT /notifications/{id}/read`: Mark one notification read.
///
/// # Errors
///
/// Returns [`PipelineError::NotificationNotFound`] for an unknown id.
#[utoipa::path(
    put,
    path = "/api/v1/notifications/{id}/read",
    tag = "Notifications",
    summary = "Mark read",
    params(("id" = i64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read", body = MarkReadResponse),
        (status = 404, description = "Notification not found", body = ErrorResponse),
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, PipelineError> {
    state.notifier()?.mark_read(id).await?;
    Ok(Json(MarkReadResponse { id, is_read: true }))
}

/// `PUT /notifications/read-all`: Mark every notification of a user read.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] for an unknown user.
#[utoipa::path(
    put,
    path = "/api/v1/notifications/read-all",
    tag = "Notifications",
    summary = "Mark all read",
    request_body = MarkAllReadRequest,
    responses(
        (status = 200, description = "Notifications marked read", body = MarkAllReadResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Json(req): Json<MarkAllReadRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let updated = state.notifier()?.mark_all_read(req.user_id).await?;
    Ok(Json(MarkAllReadResponse {
        user_id: req.user_id,
        updated,
    }))
}

async fn list(
    state: &AppState,
    params: NotificationListParams,
    unread_only: bool,
) -> Result<Json<NotificationListResponse>, PipelineError> {
    let page = params.pagination().clamped();
    let (data, total) = state
        .notifier()?
        .list(params.user_id, unread_only, page)
        .await?;
    Ok(Json(NotificationListResponse {
        data,
        pagination: PaginationMeta::new(page, total),
    }))
}

/// Notification routes, including the live push endpoint.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread", get(list_unread))
        .route("/notifications/unread/count", get(unread_count))
        .route("/notifications/read-all", put(mark_all_read))
        .route("/notifications/{id}/read", put(mark_read))
        .route("/notifications/ws/{user_id}", get(live_handler))
}
