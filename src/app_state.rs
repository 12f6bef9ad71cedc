//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineRole;
use crate::error::PipelineError;
use crate::persistence::Store;
use crate::service::{AlertMatcher, Notifier, Scheduler};
use crate::shutdown::ShutdownSignal;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
///
/// Only the services of the configured role are present; the router only
/// mounts the routes of those services.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Role this process runs.
    pub role: PipelineRole,
    /// Relational store.
    pub store: Arc<dyn Store>,
    /// Fetch scheduler (crawler role).
    pub scheduler: Option<Arc<Scheduler>>,
    /// Alert matcher (analyzer role).
    pub matcher: Option<Arc<AlertMatcher>>,
    /// Notification fan-out (notifier role).
    pub notifier: Option<Arc<Notifier>>,
    /// Keepalive period of live connections.
    pub keepalive: Duration,
    /// Process-wide shutdown signal.
    pub shutdown: ShutdownSignal,
}

impl AppState {
    /// The scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Internal`] if this process does not run the
    /// crawler role.
    pub fn scheduler(&self) -> Result<&Arc<Scheduler>, PipelineError> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| not_running("crawler"))
    }

    /// The alert matcher.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Internal`] if this process does not run the
    /// analyzer role.
    pub fn matcher(&self) -> Result<&Arc<AlertMatcher>, PipelineError> {
        self.matcher
            .as_ref()
            .ok_or_else(|| not_running("analyzer"))
    }

    /// The notifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Internal`] if this process does not run the
    /// notifier role.
    pub fn notifier(&self) -> Result<&Arc<Notifier>, PipelineError> {
        self.notifier
            .as_ref()
            .ok_or_else(|| not_running("notifier"))
    }
}

fn not_running(service: &str) -> PipelineError {
    PipelineError::Internal(format!("{service} services are not running in this process"))
}
