//! Priority-driven re-fetch scheduler.
//!
//! Two independent timers tick the high and low cohorts of the
//! [`PriorityTable`]. Every upstream call (ticks, discovery, on-demand
//! refreshes) goes through one shared [`RateLimiter`], and an in-flight set
//! makes sure a given item is never reconciled by two tasks at once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::{Subscription, consume};
use crate::domain::priority::{FAVORITE_PRIORITY, rotate_batch, validate_band};
use crate::domain::{Cohort, PriorityTable, PriorityUpdate};
use crate::error::PipelineError;
use crate::fetch::{FetchClient, RateLimiter};
use crate::persistence::Store;
use crate::service::reconcile::{ReconcileEngine, ReconcileOutcome};
use crate::shutdown::ShutdownSignal;

/// Timer and batch settings.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Period of the high-cohort timer.
    pub high_interval: Duration,
    /// Period of the low-cohort timer.
    pub low_interval: Duration,
    /// Maximum number of low-cohort items per tick.
    pub low_batch_max: usize,
    /// Run one discovery pass when the scheduler starts.
    pub discovery_on_start: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            high_interval: Duration::from_secs(300),
            low_interval: Duration::from_secs(900),
            low_batch_max: 100,
            discovery_on_start: true,
        }
    }
}

/// Result of one refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The item was fetched and reconciled.
    Reconciled(ReconcileOutcome),
    /// Another task is already refreshing this item.
    Skipped,
}

/// Counters of one cohort tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Cohort that was ticked.
    pub cohort: Cohort,
    /// Items selected for this tick.
    pub selected: usize,
    /// Items fetched and reconciled.
    pub refreshed: usize,
    /// Items skipped because they were already in flight.
    pub skipped: usize,
    /// Items whose fetch or reconcile failed.
    pub failed: usize,
}

/// Counters of one discovery or category crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Categories walked.
    pub categories: usize,
    /// Items fetched because the store did not know them.
    pub new_items: usize,
    /// Items already stored; only their priority entry was ensured.
    pub known_items: usize,
    /// Listings or items that failed.
    pub failed: usize,
}

/// Counters of the startup priority rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries set from user favorites.
    pub favorites: usize,
    /// Entries set from the persisted table.
    pub persisted: usize,
}

#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    fn claim(&self, item_id: &str) -> Option<Claim<'_>> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(item_id.to_string()).then(|| Claim {
            set: self,
            item_id: item_id.to_string(),
        })
    }

    fn contains(&self, item_id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(item_id)
    }
}

/// Releases an in-flight claim when dropped, whatever the refresh result.
struct Claim<'a> {
    set: &'a InFlight,
    item_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.item_id);
    }
}

/// Decides which items to re-fetch and when.
#[derive(Debug)]
pub struct Scheduler {
    priorities: PriorityTable,
    fetcher: Arc<dyn FetchClient>,
    limiter: Arc<RateLimiter>,
    engine: ReconcileEngine,
    store: Arc<dyn Store>,
    in_flight: InFlight,
    low_cursor: AtomicUsize,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// Creates a scheduler with an empty priority table.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn FetchClient>,
        limiter: Arc<RateLimiter>,
        engine: ReconcileEngine,
        store: Arc<dyn Store>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            priorities: PriorityTable::new(),
            fetcher,
            limiter,
            engine,
            store,
            in_flight: InFlight::default(),
            low_cursor: AtomicUsize::new(0),
            settings,
        }
    }

    /// The in-memory priority table.
    #[must_use]
    pub const fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    /// Returns `true` while `item_id` is being refreshed.
    #[must_use]
    pub fn is_in_flight(&self, item_id: &str) -> bool {
        self.in_flight.contains(item_id)
    }

    /// Sets the band of an item. The item moves cohorts on the next tick.
    ///
    /// The new band is persisted best-effort; a store failure is logged.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPriority`] when `band` is outside
    /// `0..=10`. Nothing is changed in that case.
    pub async fn set_priority(&self, item_id: &str, band: i64) -> Result<u8, PipelineError> {
        let band = validate_band(band)?;
        self.priorities.set(item_id, band).await?;
        if let Err(e) = self.store.save_priority(item_id, band).await {
            tracing::warn!(item = %item_id, band, error = %e, "priority not persisted");
        }
        tracing::info!(item = %item_id, band, "priority set");
        Ok(band)
    }

    /// Rebuilds the priority table: favorited items get the top band, then
    /// persisted entries are applied on top.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if either source cannot
    /// be read.
    pub async fn load(&self) -> Result<LoadReport, PipelineError> {
        let mut report = LoadReport::default();

        for favorite in self.store.list_favorites().await? {
            self.priorities
                .set(&favorite.item_external_id, FAVORITE_PRIORITY)
                .await?;
            report.favorites += 1;
        }
        for (item_id, band) in self.store.list_priorities().await? {
            match self.priorities.set(&item_id, band).await {
                Ok(()) => report.persisted += 1,
                Err(e) => tracing::warn!(item = %item_id, error = %e, "ignoring persisted priority"),
            }
        }

        tracing::info!(
            favorites = report.favorites,
            persisted = report.persisted,
            entries = self.priorities.len().await,
            "priority table loaded"
        );
        Ok(report)
    }

    /// Fetches and reconciles one item unless it is already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Fetch`] when the upstream call fails, or the
    /// reconcile error. The priority entry is left untouched either way.
    pub async fn refresh_item(&self, item_id: &str) -> Result<RefreshOutcome, PipelineError> {
        let Some(_claim) = self.in_flight.claim(item_id) else {
            tracing::debug!(item = %item_id, "refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        self.limiter.acquire().await;
        let snapshot = self.fetcher.fetch_detail(item_id).await?;
        let outcome = self.engine.reconcile(&snapshot).await?;
        Ok(RefreshOutcome::Reconciled(outcome))
    }

    /// Refreshes a point-in-time snapshot of one cohort.
    ///
    /// The low cohort is capped at `low_batch_max` items per tick and walked
    /// with a rotating cursor. A failing item is logged and skipped.
    pub async fn tick(&self, cohort: Cohort) -> TickReport {
        let mut ids = self.priorities.select(cohort).await;
        if cohort == Cohort::Low {
            let cursor = self.low_cursor.load(Ordering::Relaxed);
            let (batch, next) = rotate_batch(&ids, cursor, self.settings.low_batch_max);
            self.low_cursor.store(next, Ordering::Relaxed);
            ids = batch;
        }

        let mut report = TickReport {
            cohort,
            selected: ids.len(),
            refreshed: 0,
            skipped: 0,
            failed: 0,
        };
        for item_id in &ids {
            match self.refresh_item(item_id).await {
                Ok(RefreshOutcome::Reconciled(_)) => report.refreshed += 1,
                Ok(RefreshOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(item = %item_id, cohort = cohort.as_str(), error = %e, "refresh failed");
                }
            }
        }

        tracing::info!(
            cohort = cohort.as_str(),
            selected = report.selected,
            refreshed = report.refreshed,
            skipped = report.skipped,
            failed = report.failed,
            "cohort tick finished"
        );
        report
    }

    /// Walks every upstream category and registers the items it lists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the category list itself cannot be fetched
    /// or stored. Per-category and per-item failures are counted and logged.
    pub async fn discover(&self) -> Result<DiscoveryReport, PipelineError> {
        self.limiter.acquire().await;
        let categories = self.fetcher.list_categories().await?;
        self.store.upsert_categories(&categories).await?;

        let mut report = DiscoveryReport::default();
        for category in &categories {
            report.categories += 1;
            self.limiter.acquire().await;
            match self.fetcher.list_item_ids(&category.external_id).await {
                Ok(ids) => self.register_listing(&ids, false, &mut report).await,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(category = %category.external_id, error = %e, "category listing failed");
                }
            }
        }

        tracing::info!(
            categories = report.categories,
            new_items = report.new_items,
            known_items = report.known_items,
            failed = report.failed,
            "discovery finished"
        );
        Ok(report)
    }

    /// Refreshes every item listed in one stored category.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CategoryNotFound`] for an unknown category
    /// and [`PipelineError::Fetch`] if its listing cannot be fetched.
    pub async fn crawl_category(&self, category_id: &str) -> Result<DiscoveryReport, PipelineError> {
        if self.store.find_category(category_id).await?.is_none() {
            return Err(PipelineError::CategoryNotFound(category_id.to_string()));
        }
        self.limiter.acquire().await;
        let ids = self.fetcher.list_item_ids(category_id).await?;

        let mut report = DiscoveryReport {
            categories: 1,
            ..DiscoveryReport::default()
        };
        self.register_listing(&ids, true, &mut report).await;

        tracing::info!(
            category = %category_id,
            new_items = report.new_items,
            known_items = report.known_items,
            failed = report.failed,
            "category crawl finished"
        );
        Ok(report)
    }

    async fn register_listing(&self, ids: &[String], refresh_known: bool, report: &mut DiscoveryReport) {
        for item_id in ids {
            let known = match self.store.item_exists(item_id).await {
                Ok(known) => known,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(item = %item_id, error = %e, "existence check failed");
                    continue;
                }
            };
            self.priorities.ensure_default(item_id).await;

            if known {
                report.known_items += 1;
                if !refresh_known {
                    continue;
                }
            } else {
                report.new_items += 1;
            }
            if let Err(e) = self.refresh_item(item_id).await {
                report.failed += 1;
                tracing::warn!(item = %item_id, error = %e, "item refresh failed");
            }
        }
    }

    /// Applies a `priority_update` message.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPriority`] for an out-of-range band.
    pub async fn handle_priority_update(&self, update: PriorityUpdate) -> Result<(), PipelineError> {
        self.set_priority(&update.item_id, update.priority).await.map(|_| ())
    }

    /// Spawns the cohort timers, the `priority_update` consumer and, when
    /// configured, one startup discovery pass.
    pub fn spawn(self: &Arc<Self>, updates: Subscription, shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            tokio::spawn(Arc::clone(self).run_cohort(Cohort::High, self.settings.high_interval, shutdown.clone())),
            tokio::spawn(Arc::clone(self).run_cohort(Cohort::Low, self.settings.low_interval, shutdown.clone())),
        ];

        let scheduler = Arc::clone(self);
        handles.push(tokio::spawn(consume(updates, shutdown.clone(), move |update: PriorityUpdate| {
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.handle_priority_update(update).await }
        })));

        if self.settings.discovery_on_start {
            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                if let Err(e) = scheduler.discover().await {
                    tracing::error!(error = %e, "startup discovery failed");
                }
            }));
        }
        handles
    }

    async fn run_cohort(self: Arc<Self>, cohort: Cohort, period: Duration, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(cohort = cohort.as_str(), period_secs = period.as_secs(), "cohort timer started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(cohort).await;
                }
            }
        }
        tracing::info!(cohort = cohort.as_str(), "cohort timer stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::Notify;

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::persistence::{AlertStore, CatalogStore, MemoryStore};
    use crate::service::testing::{ScriptedFetchClient, snapshot};

    fn scheduler_with(fetcher: Arc<ScriptedFetchClient>, store: &MemoryStore) -> Arc<Scheduler> {
        let store: Arc<dyn Store> = Arc::new(store.clone());
        let engine = ReconcileEngine::new(Arc::clone(&store), Arc::new(MemoryBroker::new(64)));
        Arc::new(Scheduler::new(
            fetcher,
            Arc::new(RateLimiter::new(Duration::from_millis(1))),
            engine,
            store,
            SchedulerSettings {
                low_batch_max: 2,
                ..SchedulerSettings::default()
            },
        ))
    }

    #[tokio::test]
    async fn out_of_range_band_is_rejected() {
        let store = MemoryStore::new();
        let scheduler = scheduler_with(Arc::new(ScriptedFetchClient::new()), &store);

        assert!(matches!(
            scheduler.set_priority("sku", 11).await,
            Err(PipelineError::InvalidPriority(11))
        ));
        assert!(matches!(
            scheduler.set_priority("sku", -1).await,
            Err(PipelineError::InvalidPriority(-1))
        ));
        assert!(scheduler.priorities().is_empty().await);
    }

    #[tokio::test]
    async fn set_priority_is_persisted() {
        let store = MemoryStore::new();
        let scheduler = scheduler_with(Arc::new(ScriptedFetchClient::new()), &store);
        let Ok(7) = scheduler.set_priority("sku", 7).await else {
            panic!("valid band");
        };
        let Ok(saved) = store.list_priorities().await else {
            panic!("list");
        };
        assert_eq!(saved, vec![("sku".to_string(), 7)]);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_priority_entry() {
        let store = MemoryStore::new();
        let fetcher = Arc::new(ScriptedFetchClient::new());
        fetcher.set_detail(snapshot("ok", &[("ok-v", 5.0, 1)])).await;
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);
        let _ = scheduler.set_priority("ok", 9).await;
        let _ = scheduler.set_priority("broken", 9).await;

        let report = scheduler.tick(Cohort::High).await;

        assert_eq!(report.selected, 2);
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(scheduler.priorities().get("broken").await, Some(9));
        assert!(!scheduler.is_in_flight("broken"));
        assert!(matches!(store.item_exists("ok").await, Ok(true)));
    }

    #[tokio::test]
    async fn low_cohort_rotates_through_capped_batches() {
        let store = MemoryStore::new();
        let fetcher = Arc::new(ScriptedFetchClient::new());
        for id in ["a", "b", "c"] {
            let variant = format!("{id}-v");
            fetcher.set_detail(snapshot(id, &[(variant.as_str(), 1.0, 1)])).await;
        }
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);
        for id in ["a", "b", "c"] {
            let _ = scheduler.set_priority(id, 1).await;
        }

        let first = scheduler.tick(Cohort::Low).await;
        let second = scheduler.tick(Cohort::Low).await;
        assert_eq!(first.selected, 2);
        assert_eq!(second.selected, 2);
        assert_eq!(fetcher.detail_calls(), 4);
        assert!(matches!(store.item_exists("c").await, Ok(true)));
    }

    #[tokio::test]
    async fn concurrent_refresh_of_one_item_is_skipped() {
        let store = MemoryStore::new();
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetchClient::gated(Arc::clone(&gate)));
        fetcher.set_detail(snapshot("sku", &[("v", 1.0, 1)])).await;
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);

        let running = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.refresh_item("sku").await })
        };
        while fetcher.detail_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(scheduler.is_in_flight("sku"));
        assert!(matches!(scheduler.refresh_item("sku").await, Ok(RefreshOutcome::Skipped)));

        gate.notify_one();
        let Ok(Ok(RefreshOutcome::Reconciled(outcome))) = running.await else {
            panic!("first refresh completes");
        };
        assert!(outcome.created);
        assert!(!scheduler.is_in_flight("sku"));
        assert_eq!(fetcher.detail_calls(), 1);
    }

    #[tokio::test]
    async fn discovery_fetches_only_unknown_items() {
        let store = MemoryStore::new();
        let fetcher = Arc::new(ScriptedFetchClient::new());
        fetcher.add_category("cat-1", &["known", "fresh"]).await;
        fetcher.set_detail(snapshot("known", &[("k-v", 1.0, 1)])).await;
        fetcher.set_detail(snapshot("fresh", &[("f-v", 2.0, 1)])).await;
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);

        let Ok(RefreshOutcome::Reconciled(_)) = scheduler.refresh_item("known").await else {
            panic!("seed");
        };
        let Ok(report) = scheduler.discover().await else {
            panic!("discovery");
        };

        assert_eq!(report.categories, 1);
        assert_eq!(report.new_items, 1);
        assert_eq!(report.known_items, 1);
        assert_eq!(fetcher.detail_calls(), 2);
        assert_eq!(scheduler.priorities().get("known").await, Some(1));
        assert_eq!(scheduler.priorities().get("fresh").await, Some(1));
        assert!(matches!(store.find_category("cat-1").await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn failed_listing_does_not_stop_discovery() {
        let store = MemoryStore::new();
        let fetcher = Arc::new(ScriptedFetchClient::new());
        fetcher.add_broken_category("cat-broken").await;
        fetcher.add_category("cat-ok", &["lamp"]).await;
        fetcher.set_detail(snapshot("lamp", &[("l-v", 3.0, 1)])).await;
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);

        let Ok(report) = scheduler.discover().await else {
            panic!("discovery");
        };

        assert_eq!(report.categories, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.new_items, 1);
        assert!(matches!(store.item_exists("lamp").await, Ok(true)));
        assert!(matches!(store.find_category("cat-broken").await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn crawl_of_unknown_category_is_not_found() {
        let store = MemoryStore::new();
        let scheduler = scheduler_with(Arc::new(ScriptedFetchClient::new()), &store);
        assert!(matches!(
            scheduler.crawl_category("nope").await,
            Err(PipelineError::CategoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn load_applies_persisted_bands_over_favorites() {
        let store = MemoryStore::new();
        let fetcher = Arc::new(ScriptedFetchClient::new());
        fetcher.set_detail(snapshot("fav", &[("fav-v", 1.0, 1)])).await;
        fetcher.set_detail(snapshot("other", &[("other-v", 1.0, 1)])).await;
        let scheduler = scheduler_with(Arc::clone(&fetcher), &store);
        let Ok(RefreshOutcome::Reconciled(fav)) = scheduler.refresh_item("fav").await else {
            panic!("seed fav");
        };
        let Ok(RefreshOutcome::Reconciled(other)) = scheduler.refresh_item("other").await else {
            panic!("seed other");
        };
        store.add_user(1).await;
        let _ = store.ensure_favorite(1, fav.item_id).await;
        let _ = store.ensure_favorite(1, other.item_id).await;
        let _ = store.save_priority("other", 3).await;

        let restarted = scheduler_with(fetcher, &store);
        let Ok(report) = restarted.load().await else {
            panic!("load");
        };
        assert_eq!(report.favorites, 2);
        assert_eq!(report.persisted, 1);
        assert_eq!(restarted.priorities().get("fav").await, Some(FAVORITE_PRIORITY));
        assert_eq!(restarted.priorities().get("other").await, Some(3));
    }

    #[tokio::test]
    async fn invalid_priority_update_changes_nothing() {
        let store = MemoryStore::new();
        let scheduler = scheduler_with(Arc::new(ScriptedFetchClient::new()), &store);
        let update = PriorityUpdate {
            item_id: "sku".to_string(),
            priority: 42,
        };
        assert!(scheduler.handle_priority_update(update).await.is_err());
        assert_eq!(scheduler.priorities().get("sku").await, None);
    }
}
