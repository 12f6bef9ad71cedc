//! Service layer: the four pipeline stages.
//!
//! [`ReconcileEngine`] turns fetched snapshots into change records,
//! [`Scheduler`] decides what to fetch and when, [`AlertMatcher`] turns
//! change events into user notifications and [`Notifier`] persists and
//! pushes them. Services talk to each other only through the broker.

pub mod alert_matcher;
pub mod fanout;
pub mod reconcile;
pub mod scheduler;

pub use alert_matcher::{AlertMatcher, MatcherSettings};
pub use fanout::{ChannelRegistry, DeliveryStatus, LivePush, LiveReceiver, Notifier, NotifierSettings};
pub use reconcile::{ReconcileEngine, ReconcileOutcome};
pub use scheduler::{RefreshOutcome, Scheduler, SchedulerSettings};

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the service tests.

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify};

    use crate::domain::{Category, ItemSnapshot, VariantSnapshot};
    use crate::fetch::{FetchClient, FetchError};

    /// Snapshot with one variant per `(external_id, price, stock)` tuple.
    pub fn snapshot(external_id: &str, variants: &[(&str, f64, i64)]) -> ItemSnapshot {
        ItemSnapshot {
            external_id: external_id.to_string(),
            name: format!("Item {external_id}"),
            url: format!("https://shop.test/p/{external_id}"),
            is_active: true,
            rating: 4.5,
            rating_count: 10,
            favorite_count: 3,
            comment_count: 1,
            variants: variants
                .iter()
                .map(|(id, price, stock)| VariantSnapshot {
                    external_id: (*id).to_string(),
                    price: *price,
                    original_price: *price,
                    stock_count: *stock,
                    is_active: true,
                })
                .collect(),
        }
    }

    /// Fetch client answering from in-memory tables.
    #[derive(Debug, Default)]
    pub struct ScriptedFetchClient {
        categories: Mutex<Vec<Category>>,
        listings: Mutex<HashMap<String, Vec<String>>>,
        details: Mutex<HashMap<String, ItemSnapshot>>,
        detail_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetchClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every `fetch_detail` waits on `gate` before answering.
        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub async fn add_category(&self, external_id: &str, item_ids: &[&str]) {
            self.categories.lock().await.push(Category {
                external_id: external_id.to_string(),
                name: format!("Category {external_id}"),
                parent_external_id: None,
                level: 1,
            });
            self.listings.lock().await.insert(
                external_id.to_string(),
                item_ids.iter().map(|id| (*id).to_string()).collect(),
            );
        }

        /// Category whose listing answers with an upstream error.
        pub async fn add_broken_category(&self, external_id: &str) {
            self.categories.lock().await.push(Category {
                external_id: external_id.to_string(),
                name: format!("Category {external_id}"),
                parent_external_id: None,
                level: 1,
            });
        }

        pub async fn set_detail(&self, snapshot: ItemSnapshot) {
            self.details
                .lock()
                .await
                .insert(snapshot.external_id.clone(), snapshot);
        }

        pub fn detail_calls(&self) -> usize {
            self.detail_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchClient for ScriptedFetchClient {
        async fn list_categories(&self) -> Result<Vec<Category>, FetchError> {
            Ok(self.categories.lock().await.clone())
        }

        async fn list_item_ids(&self, category_id: &str) -> Result<Vec<String>, FetchError> {
            self.listings
                .lock()
                .await
                .get(category_id)
                .cloned()
                .ok_or(FetchError::Status(404))
        }

        async fn fetch_detail(&self, item_id: &str) -> Result<ItemSnapshot, FetchError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.details
                .lock()
                .await
                .get(item_id)
                .cloned()
                .ok_or(FetchError::Status(503))
        }
    }
}
