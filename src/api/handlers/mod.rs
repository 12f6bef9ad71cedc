//! REST endpoint handlers organized by service.

pub mod analyzer;
pub mod crawler;
pub mod notifications;
pub mod system;

use axum::Router;

use crate::app_state::AppState;
use crate::config::PipelineRole;

/// Composes the routes of every service `role` runs, relative to `/api/v1`.
pub fn routes(role: PipelineRole) -> Router<AppState> {
    let mut router = Router::new();
    if role.runs_crawler() {
        router = router.merge(crawler::routes());
    }
    if role.runs_analyzer() {
        router = router.merge(analyzer::routes());
    }
    if role.runs_notifier() {
        router = router.merge(notifications::routes());
    }
    router
}
