//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::error::PipelineError;

/// `GET /notifications/ws/{user_id}`: Upgrade to a live notification
/// connection.
///
/// # Errors
///
/// Returns [`PipelineError::UserNotFound`] before the upgrade when the user
/// is unknown.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    let notifier = Arc::clone(state.notifier()?);
    notifier.ensure_user(user_id).await?;

    let keepalive = state.keepalive;
    let shutdown = state.shutdown.clone();
    tracing::info!(user = user_id, "live connection upgrading");

    Ok(ws.on_upgrade(move |socket| run_connection(socket, user_id, notifier, keepalive, shutdown)))
}
