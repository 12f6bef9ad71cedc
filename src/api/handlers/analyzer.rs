//! Analyzer handlers: catalog statistics, trends, change history and price
//! alerts.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};

use crate::api::dto::{
    CreateAlertRequest, DeleteAlertRequest, PaginationMeta, PaginationParams,
    PriceHistoryResponse, StockHistoryResponse, TrendParams,
};
use crate::app_state::AppState;
use crate::domain::AlertRule;
use crate::error::{ErrorResponse, PipelineError};
use crate::persistence::{DailyTrend, FavoriteStats, ItemStats, PriceStats};

/// Window of the "recent" counters and of the biggest-drop list.
const RECENT_WINDOW_HOURS: i64 = 24;

/// Length of the top lists.
const TOP_ENTRIES: u32 = 5;

/// `GET /analyzer/stats/items`: Catalog aggregates.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/stats/items",
    tag = "Analyzer",
    summary = "Item statistics",
    description = "Returns item counts, items created or re-reconciled in the last 24 hours and recorded change totals.",
    responses(
        (status = 200, description = "Catalog statistics", body = ItemStats),
    )
)]
pub async fn item_stats(State(state): State<AppState>) -> Result<impl IntoResponse, PipelineError> {
    let since = Utc::now() - Duration::hours(RECENT_WINDOW_HOURS);
    let stats = state.store.item_stats(since).await?;
    Ok(Json(stats))
}

/// `GET /analyzer/stats/prices`: Price change aggregates.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/stats/prices",
    tag = "Analyzer",
    summary = "Price statistics",
    description = "Returns the average price change, increase and decrease counts and the five steepest drops of the last 24 hours.",
    responses(
        (status = 200, description = "Price statistics", body = PriceStats),
    )
)]
pub async fn price_stats(State(state): State<AppState>) -> Result<impl IntoResponse, PipelineError> {
    let since = Utc::now() - Duration::hours(RECENT_WINDOW_HOURS);
    let stats = state.store.price_stats(since, TOP_ENTRIES).await?;
    Ok(Json(stats))
}

/// `GET /analyzer/stats/favorites`: Favorite aggregates.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/stats/favorites",
    tag = "Analyzer",
    summary = "Favorite statistics",
    description = "Returns the favorite count, the number of users with favorites and the five most favorited items.",
    responses(
        (status = 200, description = "Favorite statistics", body = FavoriteStats),
    )
)]
pub async fn favorite_stats(State(state): State<AppState>) -> Result<impl IntoResponse, PipelineError> {
    let stats = state.store.favorite_stats(TOP_ENTRIES).await?;
    Ok(Json(stats))
}

/// `GET /analyzer/trends/prices`: Daily price change aggregates.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/trends/prices",
    tag = "Analyzer",
    summary = "Price trends",
    description = "Returns per-day price change aggregates, newest day first.",
    params(TrendParams),
    responses(
        (status = 200, description = "Daily price trends", body = Vec<DailyTrend>),
    )
)]
pub async fn price_trends(
    State(state): State<AppState>,
    Query(params): Query<TrendParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let since = Utc::now() - Duration::days(params.window_days());
    Ok(Json(state.store.price_trends(since).await?))
}

/// `GET /analyzer/trends/stock`: Daily stock change aggregates.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/trends/stock",
    tag = "Analyzer",
    summary = "Stock trends",
    description = "Returns per-day stock change aggregates, newest day first.",
    params(TrendParams),
    responses(
        (status = 200, description = "Daily stock trends", body = Vec<DailyTrend>),
    )
)]
pub async fn stock_trends(
    State(state): State<AppState>,
    Query(params): Query<TrendParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let since = Utc::now() - Duration::days(params.window_days());
    Ok(Json(state.store.stock_trends(since).await?))
}

/// `GET /analyzer/history/prices/{item_id}`: Price change history.
///
/// # Errors
///
/// Returns [`PipelineError::ItemIdNotFound`] for an unknown item.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/history/prices/{item_id}",
    tag = "Analyzer",
    summary = "Price history",
    description = "Returns the recorded price changes of an item, newest first.",
    params(
        ("item_id" = i64, Path, description = "Item row id"),
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Paginated price history", body = PriceHistoryResponse),
        (status = 404, description = "Item not found", body = ErrorResponse),
    )
)]
pub async fn price_history(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let page = params.clamped();
    ensure_item(&state, item_id).await?;
    let (data, total) = state.store.price_history(item_id, page).await?;
    Ok(Json(PriceHistoryResponse {
        item_id,
        data,
        pagination: PaginationMeta::new(page, total),
    }))
}

/// `GET /analyzer/history/stock/{item_id}`: Stock change history.
///
/// # Errors
///
/// Returns [`PipelineError::ItemIdNotFound`] for an unknown item.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/history/stock/{item_id}",
    tag = "Analyzer",
    summary = "Stock history",
    description = "Returns the recorded stock changes of an item, newest first.",
    params(
        ("item_id" = i64, Path, description = "Item row id"),
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Paginated stock history", body = StockHistoryResponse),
        (status = 404, description = "Item not found", body = ErrorResponse),
    )
)]
pub async fn stock_history(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let page = params.clamped();
    ensure_item(&state, item_id).await?;
    let (data, total) = state.store.stock_history(item_id, page).await?;
    Ok(Json(StockHistoryResponse {
        item_id,
        data,
        pagination: PaginationMeta::new(page, total),
    }))
}

/// `POST /analyzer/alerts/price`: Create a price alert.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidRequest`] for a non-positive threshold
/// and a not-found error for an unknown user, item or variant.
#[utoipa::path(
    post,
    path = "/api/v1/analyzer/alerts/price",
    tag = "Analyzer",
    summary = "Create price alert",
    description = "Registers a rule that notifies the user when the item's price drops by at least the threshold. The item is added to the user's favorites.",
    request_body = CreateAlertRequest,
    responses(
        (status = 201, description = "Alert created", body = AlertRule),
        (status = 400, description = "Invalid threshold", body = ErrorResponse),
        (status = 404, description = "User, item or variant not found", body = ErrorResponse),
    )
)]
pub async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let rule = state.matcher()?.create_rule(req.into()).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `GET /analyzer/alerts/price/user/{user_id}`: A user's price alerts.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] for an unknown user.
#[utoipa::path(
    get,
    path = "/api/v1/analyzer/alerts/price/user/{user_id}",
    tag = "Analyzer",
    summary = "List price alerts",
    description = "Returns every price alert the user owns.",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Alert list", body = Vec<AlertRule>),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, PipelineError> {
    let rules = state.matcher()?.list_rules(user_id).await?;
    Ok(Json(rules))
}

/// `DELETE /analyzer/alerts/price`: Delete a price alert.
///
/// # Errors
///
/// Returns [`PipelineError::AlertNotFound`] if no rule exists for the pair.
#[utoipa::path(
    delete,
    path = "/api/v1/analyzer/alerts/price",
    tag = "Analyzer",
    summary = "Delete price alert",
    description = "Removes the user's rule for the item and returns it.",
    request_body = DeleteAlertRequest,
    responses(
        (status = 200, description = "Alert deleted", body = AlertRule),
        (status = 404, description = "Alert not found", body = ErrorResponse),
    )
)]
pub async fn delete_alert(
    State(state): State<AppState>,
    Json(req): Json<DeleteAlertRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let rule = state.matcher()?.delete_rule(req.user_id, req.item_id).await?;
    Ok(Json(rule))
}

async fn ensure_item(state: &AppState, item_id: i64) -> Result<(), PipelineError> {
    match state.store.find_item_by_id(item_id).await? {
        Some(_) => Ok(()),
        None => Err(PipelineError::ItemIdNotFound(item_id)),
    }
}

/// Analyzer routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/analyzer/stats/items", get(item_stats))
        .route("/analyzer/stats/prices", get(price_stats))
        .route("/analyzer/stats/favorites", get(favorite_stats))
        .route("/analyzer/trends/prices", get(price_trends))
        .route("/analyzer/trends/stock", get(stock_trends))
        .route("/analyzer/history/prices/{item_id}", get(price_history))
        .route("/analyzer/history/stock/{item_id}", get(stock_history))
        .route(
            "/analyzer/alerts/price",
            post(create_alert).delete(delete_alert),
        )
        .route("/analyzer/alerts/price/user/{user_id}", get(list_alerts))
}
