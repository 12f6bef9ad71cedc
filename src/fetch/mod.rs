//! Upstream catalog access.
//!
//! [`FetchClient`] is the seam between the scheduler and the catalog
//! source. All errors are transient from the pipeline's point of view: the
//! scheduler logs them and the item is retried on its next tick.

pub mod http;
pub mod rate_limit;

use std::fmt;

use async_trait::async_trait;

use crate::domain::{Category, ItemSnapshot};

pub use http::HttpFetchClient;
pub use rate_limit::RateLimiter;

/// Fetch client errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection or protocol failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Upstream answered with a non-success status.
    #[error("unexpected upstream status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("invalid upstream payload: {0}")]
    Decode(String),

    /// Client construction failed.
    #[error("fetch client configuration: {0}")]
    Config(String),
}

/// Read-only access to the upstream catalog.
#[async_trait]
pub trait FetchClient: fmt::Debug + Send + Sync {
    /// Lists every upstream category.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport, status or decode failure.
    async fn list_categories(&self) -> Result<Vec<Category>, FetchError>;

    /// Lists the item identifiers of one category.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport, status or decode failure.
    async fn list_item_ids(&self, category_id: &str) -> Result<Vec<String>, FetchError>;

    /// Fetches the full snapshot of one item.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport, status or decode failure.
    async fn fetch_detail(&self, item_id: &str) -> Result<ItemSnapshot, FetchError>;
}
