//! OpenAPI documentation for the REST API.
//!
//! [`ApiDoc`] collects every handler and DTO schema. Swagger UI serves it
//! when the `swagger-ui` feature is enabled.

use utoipa::OpenApi;

use crate::api::dto::{
    AcceptedResponse, CreateAlertRequest, DeleteAlertRequest, ItemListResponse,
    MarkAllReadRequest, MarkAllReadResponse, MarkReadResponse, NotificationListResponse,
    PaginationMeta, PriceHistoryResponse, SetPriorityRequest, SetPriorityResponse,
    StockHistoryResponse, UnreadCountResponse,
};
use crate::api::handlers::system::HealthResponse;
use crate::domain::{
    AlertRule, Category, Item, NotificationRecord, PriceChangeRecord, StockChangeRecord, Variant,
};
use crate::error::{ErrorBody, ErrorResponse};
use crate::persistence::{
    DailyTrend, FavoriteCount, FavoriteStats, ItemStats, PriceDrop, PriceStats,
};

/// OpenAPI document for the REST API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "pricewatch API",
        description = "Catalog reads, priority control, price alerts and notifications of the pricewatch pipeline."
    ),
    paths(
        crate::api::handlers::system::health_handler,
        crate::api::handlers::crawler::list_categories,
        crate::api::handlers::crawler::get_category,
        crate::api::handlers::crawler::list_items,
        crate::api::handlers::crawler::get_item,
        crate::api::handlers::crawler::set_priority,
        crate::api::handlers::crawler::crawl_item,
        crate::api::handlers::crawler::crawl_category,
        crate::api::handlers::crawler::discover,
        crate::api::handlers::analyzer::item_stats,
        crate::api::handlers::analyzer::price_stats,
        crate::api::handlers::analyzer::favorite_stats,
        crate::api::handlers::analyzer::price_trends,
        crate::api::handlers::analyzer::stock_trends,
        crate::api::handlers::analyzer::price_history,
        crate::api::handlers::analyzer::stock_history,
        crate::api::handlers::analyzer::create_alert,
        crate::api::handlers::analyzer::list_alerts,
        crate::api::handlers::analyzer::delete_alert,
        crate::api::handlers::notifications::list_notifications,
        crate::api::handlers::notifications::list_unread,
        crate::api::handlers::notifications::unread_count,
        crate::api::handlers::notifications::mark_read,
        crate::api::handlers::notifications::mark_all_read,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        ErrorBody,
        PaginationMeta,
        AcceptedResponse,
        Category,
        Item,
        Variant,
        ItemListResponse,
        SetPriorityRequest,
        SetPriorityResponse,
        ItemStats,
        PriceStats,
        PriceDrop,
        FavoriteStats,
        FavoriteCount,
        DailyTrend,
        PriceChangeRecord,
        StockChangeRecord,
        PriceHistoryResponse,
        StockHistoryResponse,
        AlertRule,
        CreateAlertRequest,
        DeleteAlertRequest,
        NotificationRecord,
        NotificationListResponse,
        UnreadCountResponse,
        MarkReadResponse,
        MarkAllReadRequest,
        MarkAllReadResponse,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Crawler", description = "Catalog reads and crawl control"),
        (name = "Analyzer", description = "Statistics, trends, change history and price alerts"),
        (name = "Notifications", description = "Stored notifications and read markers")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/crawler/items/{external_id}/priority",
            "/api/v1/analyzer/alerts/price",
            "/api/v1/analyzer/stats/prices",
            "/api/v1/analyzer/trends/stock",
            "/api/v1/crawler/categories/{external_id}",
            "/api/v1/notifications/read-all",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn alert_routes_share_one_path() {
        let doc = ApiDoc::openapi();
        let Some(item) = doc.paths.paths.get("/api/v1/analyzer/alerts/price") else {
            panic!("alert path missing");
        };
        assert!(item.post.is_some());
        assert!(item.delete.is_some());
    }
}
