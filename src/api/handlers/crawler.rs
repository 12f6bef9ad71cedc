//! Crawler handlers: catalog reads, priority updates and on-demand crawls.
//!
//! Crawl endpoints acknowledge with `202 Accepted` and run the fetch in a
//! background task; the outcome is logged.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    AcceptedResponse, ItemListParams, ItemListResponse, PaginationMeta, SetPriorityRequest,
    SetPriorityResponse,
};
use crate::app_state::AppState;
use crate::domain::priority::validate_band;
use crate::domain::{Category, Item};
use crate::error::{ErrorResponse, PipelineError};

/// `GET /crawler/categories`: List known categories.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/crawler/categories",
    tag = "Crawler",
    summary = "List categories",
    description = "Returns every category recorded by discovery.",
    responses(
        (status = 200, description = "Category list", body = Vec<Category>),
    )
)]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    let categories = state.store.list_categories().await?;
    Ok(Json(categories))
}

/// `GET /crawler/categories/{external_id}`: Get one category.
///
/// # Errors
///
/// Returns [`PipelineError::CategoryNotFound`] if the category is unknown.
#[utoipa::path(
    get,
    path = "/api/v1/crawler/categories/{external_id}",
    tag = "Crawler",
    summary = "Get category",
    description = "Looks a category up by its upstream identifier.",
    params(("external_id" = String, Path, description = "Upstream category identifier")),
    responses(
        (status = 200, description = "Category", body = Category),
        (status = 404, description = "Category not found", body = ErrorResponse),
    )
)]
pub async fn get_category(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let category = state
        .store
        .find_category(&external_id)
        .await?
        .ok_or(PipelineError::CategoryNotFound(external_id))?;
    Ok(Json(category))
}

/// `GET /crawler/items`: List items with pagination and an active filter.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failure.
#[utoipa::path(
    get,
    path = "/api/v1/crawler/items",
    tag = "Crawler",
    summary = "List items",
    description = "Returns a paginated item list ordered by row id, optionally filtered by the active flag.",
    params(ItemListParams),
    responses(
        (status = 200, description = "Paginated item list", body = ItemListResponse),
    )
)]
pub async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ItemListParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let page = params.pagination().clamped();
    let (data, total) = state.store.list_items(params.filter(), page).await?;
    Ok(Json(ItemListResponse {
        data,
        pagination: PaginationMeta::new(page, total),
    }))
}

/// `GET /crawler/items/{external_id}`: Get one item with its variants.
///
/// # Errors
///
/// Returns [`PipelineError::ItemNotFound`] if the item is unknown.
#[utoipa::path(
    get,
    path = "/api/v1/crawler/items/{external_id}",
    tag = "Crawler",
    summary = "Get item",
    description = "Looks an item up by its upstream identifier.",
    params(("external_id" = String, Path, description = "Upstream item identifier")),
    responses(
        (status = 200, description = "Item details", body = Item),
        (status = 404, description = "Item not found", body = ErrorResponse),
    )
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let item = state
        .store
        .find_item(&external_id)
        .await?
        .ok_or(PipelineError::ItemNotFound(external_id))?;
    Ok(Json(item))
}

/// `POST /crawler/items/{external_id}/priority`: Set an item's band.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPriority`] for a band outside `0..=10`
/// and [`PipelineError::ItemNotFound`] for an unknown item.
#[utoipa::path(
    post,
    path = "/api/v1/crawler/items/{external_id}/priority",
    tag = "Crawler",
    summary = "Set item priority",
    description = "Stores a new priority band for the item. Bands 5 to 10 are refreshed by the high cohort, 0 to 4 by the low cohort.",
    params(("external_id" = String, Path, description = "Upstream item identifier")),
    request_body = SetPriorityRequest,
    responses(
        (status = 200, description = "Priority stored", body = SetPriorityResponse),
        (status = 400, description = "Band out of range", body = ErrorResponse),
        (status = 404, description = "Item not found", body = ErrorResponse),
    )
)]
pub async fn set_priority(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(req): Json<SetPriorityRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let scheduler = state.scheduler()?;
    validate_band(req.priority)?;
    if !state.store.item_exists(&external_id).await? {
        return Err(PipelineError::ItemNotFound(external_id));
    }

    let priority = scheduler.set_priority(&external_id, req.priority).await?;
    Ok(Json(SetPriorityResponse {
        item_id: external_id,
        priority,
    }))
}

/// `POST /crawler/crawl/items/{external_id}`: Refresh one item now.
///
/// # Errors
///
/// Returns [`PipelineError::Internal`] if the crawler is not running here.
#[utoipa::path(
    post,
    path = "/api/v1/crawler/crawl/items/{external_id}",
    tag = "Crawler",
    summary = "Crawl an item",
    description = "Schedules an immediate fetch and reconcile of one item. A refresh already in flight for the item is not repeated.",
    params(("external_id" = String, Path, description = "Upstream item identifier")),
    responses(
        (status = 202, description = "Crawl scheduled", body = AcceptedResponse),
    )
)]
pub async fn crawl_item(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let scheduler = std::sync::Arc::clone(state.scheduler()?);
    let message = format!("crawl of item {external_id} scheduled");

    tokio::spawn(async move {
        match scheduler.refresh_item(&external_id).await {
            Ok(outcome) => tracing::info!(item = %external_id, ?outcome, "on-demand crawl finished"),
            Err(e) => tracing::warn!(item = %external_id, error = %e, "on-demand crawl failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(message))))
}

/// `POST /crawler/crawl/categories/{external_id}`: Crawl one category now.
///
/// # Errors
///
/// Returns [`PipelineError::CategoryNotFound`] if the category is unknown.
#[utoipa::path(
    post,
    path = "/api/v1/crawler/crawl/categories/{external_id}",
    tag = "Crawler",
    summary = "Crawl a category",
    description = "Lists the category upstream and refreshes every item in it in the background.",
    params(("external_id" = String, Path, description = "Upstream category identifier")),
    responses(
        (status = 202, description = "Crawl scheduled", body = AcceptedResponse),
        (status = 404, description = "Category not found", body = ErrorResponse),
    )
)]
pub async fn crawl_category(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let scheduler = std::sync::Arc::clone(state.scheduler()?);
    if state.store.find_category(&external_id).await?.is_none() {
        return Err(PipelineError::CategoryNotFound(external_id));
    }
    let message = format!("crawl of category {external_id} scheduled");

    tokio::spawn(async move {
        match scheduler.crawl_category(&external_id).await {
            Ok(report) => tracing::info!(category = %external_id, ?report, "category crawl finished"),
            Err(e) => tracing::warn!(category = %external_id, error = %e, "category crawl failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(message))))
}

/// `POST /crawler/discover`: Run item discovery now.
///
/// # Errors
///
/// Returns [`PipelineError::Internal`] if the crawler is not running here.
#[utoipa::path(
    post,
    path = "/api/v1/crawler/discover",
    tag = "Crawler",
    summary = "Run discovery",
    description = "Walks every upstream category and registers new items with the default band.",
    responses(
        (status = 202, description = "Discovery scheduled", body = AcceptedResponse),
    )
)]
pub async fn discover(State(state): State<AppState>) -> Result<impl IntoResponse, PipelineError> {
    let scheduler = std::sync::Arc::clone(state.scheduler()?);

    tokio::spawn(async move {
        match scheduler.discover().await {
            Ok(report) => tracing::info!(?report, "on-demand discovery finished"),
            Err(e) => tracing::warn!(error = %e, "on-demand discovery failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse::new("discovery scheduled")),
    ))
}

/// Crawler routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/crawler/categories", get(list_categories))
        .route("/crawler/categories/{external_id}", get(get_category))
        .route("/crawler/items", get(list_items))
        .route("/crawler/items/{external_id}", get(get_item))
        .route("/crawler/items/{external_id}/priority", post(set_priority))
        .route("/crawler/crawl/items/{external_id}", post(crawl_item))
        .route("/crawler/crawl/categories/{external_id}", post(crawl_category))
        .route("/crawler/discover", post(discover))
}
