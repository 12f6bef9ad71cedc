//! Alert matcher: turns `item_changed` events into `notify_user` events.
//!
//! Rules live in an in-memory [`AlertBook`] rebuilt from the store at
//! startup. Each rule has its own cooldown window, so a burst of qualifying
//! drops on one item yields a single notification per rule.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::{Broker, Subscription, Topic, consume, publish_json};
use crate::domain::alert::{DEFAULT_THRESHOLD_PERCENT, NOTIFY_COOLDOWN_HOURS};
use crate::domain::priority::BOOST_PRIORITY;
use crate::domain::{AlertBook, AlertRule, ItemChanged, NewAlertRule, NotifyUser, PriorityUpdate};
use crate::error::PipelineError;
use crate::persistence::{ItemRef, Store};
use crate::shutdown::ShutdownSignal;

/// Items whose average price change exceeds this percentage are trending up.
pub const PRICE_TREND_MIN_AVG_PERCENT: f64 = 5.0;
/// Items whose average stock change is below this are selling out.
pub const STOCK_TREND_MAX_AVG_QUANTITY: f64 = -10.0;
/// A single price change below this percentage is an anomaly.
pub const PRICE_DROP_ANOMALY_PERCENT: f64 = -30.0;
/// A single stock increase above this quantity is an anomaly.
pub const STOCK_SPIKE_ANOMALY_QUANTITY: i64 = 100;
/// Active items with more favorites than this are boosted.
pub const POPULAR_MIN_FAVORITES: i64 = 100;
/// Row cap of every housekeeping query.
pub const HOUSEKEEPING_LIMIT: u32 = 100;
/// Look-back window of the anomaly queries.
pub const ANOMALY_WINDOW_HOURS: i64 = 24;

/// Matcher settings.
#[derive(Debug, Clone, Copy)]
pub struct MatcherSettings {
    /// Price changes re-read per `item_changed` event.
    pub recent_changes: u32,
    /// Threshold of the rules created for favorites at startup.
    pub default_threshold: f64,
    /// Minimum time between two notifications of one rule.
    pub cooldown: chrono::Duration,
    /// Period of the housekeeping job.
    pub housekeeping_interval: Duration,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            recent_changes: 10,
            default_threshold: DEFAULT_THRESHOLD_PERCENT,
            cooldown: chrono::Duration::hours(NOTIFY_COOLDOWN_HOURS),
            housekeeping_interval: Duration::from_secs(3600),
        }
    }
}

/// Counters of one housekeeping run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Items with an upward price trend.
    pub price_trends: usize,
    /// Items with a downward stock trend.
    pub stock_trends: usize,
    /// Items with a recent steep price drop.
    pub price_anomalies: usize,
    /// Items with a recent stock spike.
    pub stock_anomalies: usize,
    /// Popular active items.
    pub popular: usize,
    /// Distinct items a priority boost was published for.
    pub boosted: usize,
    /// Steps that failed.
    pub failed_steps: usize,
}

/// Counters of the startup rule rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleLoadReport {
    /// Rules read from the store.
    pub persisted: usize,
    /// Default rules created for favorites without one.
    pub defaults: usize,
}

/// Matches price changes against per-user alert rules.
#[derive(Debug)]
pub struct AlertMatcher {
    rules: AlertBook,
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    settings: MatcherSettings,
}

impl AlertMatcher {
    /// Creates a matcher with an empty rule book.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>, settings: MatcherSettings) -> Self {
        Self {
            rules: AlertBook::new(),
            store,
            broker,
            settings,
        }
    }

    /// The in-memory rule book.
    #[must_use]
    pub const fn rules(&self) -> &AlertBook {
        &self.rules
    }

    /// Validates, persists and installs a rule, and records the (user,
    /// item) favorite.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRequest`] for a non-positive or
    /// non-finite threshold or a variant of another item, the matching
    /// not-found error for an unknown user, item or variant, and
    /// [`PipelineError::PersistenceError`] on store failure.
    pub async fn create_rule(&self, rule: NewAlertRule) -> Result<AlertRule, PipelineError> {
        if !rule.threshold_percent.is_finite() || rule.threshold_percent <= 0.0 {
            return Err(PipelineError::InvalidRequest(format!(
                "threshold must be a positive percentage, got {}",
                rule.threshold_percent
            )));
        }
        if !self.store.user_exists(rule.user_id).await? {
            return Err(PipelineError::UserNotFound(rule.user_id));
        }
        if self.store.find_item_by_id(rule.item_id).await?.is_none() {
            return Err(PipelineError::ItemIdNotFound(rule.item_id));
        }
        if let Some(variant_id) = rule.variant_id {
            let variant = self
                .store
                .find_variant(variant_id)
                .await?
                .ok_or(PipelineError::VariantNotFound(variant_id))?;
            if variant.item_id != rule.item_id {
                return Err(PipelineError::InvalidRequest(format!(
                    "variant #{variant_id} does not belong to item #{}",
                    rule.item_id
                )));
            }
        }

        self.store.ensure_favorite(rule.user_id, rule.item_id).await?;
        let stored = self.store.insert_alert_rule(&rule, Utc::now()).await?;
        self.rules.insert(stored.clone()).await;

        tracing::info!(
            rule = stored.id,
            user = stored.user_id,
            item = stored.item_id,
            threshold = stored.threshold_percent,
            "price alert created"
        );
        Ok(stored)
    }

    /// Deletes the first rule of the (user, item) pair.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlertNotFound`] if the pair has no rule and
    /// [`PipelineError::PersistenceError`] on store failure.
    pub async fn delete_rule(&self, user_id: i64, item_id: i64) -> Result<AlertRule, PipelineError> {
        let Some(rule) = self
            .rules
            .for_item(item_id)
            .await
            .into_iter()
            .find(|r| r.user_id == user_id)
        else {
            return Err(PipelineError::AlertNotFound { user_id, item_id });
        };

        self.store.delete_alert_rule(rule.id).await?;
        self.rules.remove_first(user_id, item_id).await;
        tracing::info!(rule = rule.id, user = user_id, item = item_id, "price alert deleted");
        Ok(rule)
    }

    /// A user's rules.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UserNotFound`] for an unknown user.
    pub async fn list_rules(&self, user_id: i64) -> Result<Vec<AlertRule>, PipelineError> {
        if !self.store.user_exists(user_id).await? {
            return Err(PipelineError::UserNotFound(user_id));
        }
        Ok(self.rules.for_user(user_id).await)
    }

    /// Installs persisted rules, then gives every favorite without a rule
    /// a default one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if rules or favorites
    /// cannot be read. Failing default-rule inserts are logged.
    pub async fn load(&self) -> Result<RuleLoadReport, PipelineError> {
        let mut report = RuleLoadReport::default();
        for rule in self.store.list_alert_rules().await? {
            self.rules.insert(rule).await;
            report.persisted += 1;
        }

        let now = Utc::now();
        for favorite in self.store.list_favorites().await? {
            if self.rules.contains(favorite.user_id, favorite.item_id).await {
                continue;
            }
            let rule = NewAlertRule {
                user_id: favorite.user_id,
                item_id: favorite.item_id,
                variant_id: None,
                threshold_percent: self.settings.default_threshold,
            };
            match self.store.insert_alert_rule(&rule, now).await {
                Ok(stored) => {
                    self.rules.insert(stored).await;
                    report.defaults += 1;
                }
                Err(e) => tracing::warn!(
                    user = favorite.user_id,
                    item = favorite.item_id,
                    error = %e,
                    "default alert rule not created"
                ),
            }
        }

        tracing::info!(
            persisted = report.persisted,
            defaults = report.defaults,
            "alert rules loaded"
        );
        Ok(report)
    }

    /// Handles one `item_changed` event. Returns the number of `notify_user`
    /// events published.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ItemNotFound`] if the item vanished and
    /// [`PipelineError::PersistenceError`] if the store cannot be read.
    pub async fn handle_item_changed(&self, event: ItemChanged) -> Result<usize, PipelineError> {
        let item = self
            .store
            .find_item(&event.external_id)
            .await?
            .ok_or_else(|| PipelineError::ItemNotFound(event.external_id.clone()))?;

        let rules = self.rules.for_item(item.id).await;
        if rules.is_empty() {
            return Ok(0);
        }
        let changes = self
            .store
            .recent_price_changes(item.id, self.settings.recent_changes)
            .await?;

        let now = Utc::now();
        let mut published = 0;
        for rule in &rules {
            let Some(change) = rule.first_match(&changes, now, self.settings.cooldown) else {
                continue;
            };
            let notify = NotifyUser {
                user_id: rule.user_id,
                item_id: item.id,
                item_name: item.name.clone(),
                item_url: item.url.clone(),
                variant_id: change.variant_id,
                previous_price: change.previous_price,
                new_price: change.new_price,
                discount_percent: -change.change_percent,
            };
            if let Err(e) = publish_json(self.broker.as_ref(), Topic::NotifyUser, &notify).await {
                tracing::warn!(rule = rule.id, user = rule.user_id, error = %e, "notify_user publish failed");
                continue;
            }

            self.rules.mark_notified(item.id, rule.id, now).await;
            if let Err(e) = self.store.touch_alert_rule(rule.id, now).await {
                tracing::warn!(rule = rule.id, error = %e, "last-notified time not persisted");
            }
            published += 1;
            tracing::info!(
                rule = rule.id,
                user = rule.user_id,
                item = %item.external_id,
                discount = notify.discount_percent,
                "price alert fired"
            );
        }
        Ok(published)
    }

    /// Trend and anomaly detection plus priority boosts.
    ///
    /// Every step is independent: a failing query is logged and counted,
    /// and the remaining steps still run.
    pub async fn housekeeping(&self) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();
        let mut boost: BTreeSet<String> = BTreeSet::new();
        let since = Utc::now() - chrono::Duration::hours(ANOMALY_WINDOW_HOURS);

        match self
            .store
            .price_trend_items(PRICE_TREND_MIN_AVG_PERCENT, HOUSEKEEPING_LIMIT)
            .await
        {
            Ok(items) => {
                report.price_trends = items.len();
                tracing::info!(count = items.len(), "upward price trends");
                boost.extend(external_ids(items));
            }
            Err(e) => step_failed(&mut report, "price trends", &e),
        }

        match self
            .store
            .stock_trend_items(STOCK_TREND_MAX_AVG_QUANTITY, HOUSEKEEPING_LIMIT)
            .await
        {
            Ok(items) => {
                report.stock_trends = items.len();
                tracing::info!(count = items.len(), "downward stock trends");
            }
            Err(e) => step_failed(&mut report, "stock trends", &e),
        }

        match self
            .store
            .price_drop_anomalies(since, PRICE_DROP_ANOMALY_PERCENT, HOUSEKEEPING_LIMIT)
            .await
        {
            Ok(items) => {
                report.price_anomalies = items.len();
                tracing::info!(count = items.len(), "price drop anomalies");
                boost.extend(external_ids(items));
            }
            Err(e) => step_failed(&mut report, "price anomalies", &e),
        }

        match self
            .store
            .stock_spike_anomalies(since, STOCK_SPIKE_ANOMALY_QUANTITY, HOUSEKEEPING_LIMIT)
            .await
        {
            Ok(items) => {
                report.stock_anomalies = items.len();
                tracing::info!(count = items.len(), "stock spike anomalies");
            }
            Err(e) => step_failed(&mut report, "stock anomalies", &e),
        }

        match self
            .store
            .popular_items(POPULAR_MIN_FAVORITES, HOUSEKEEPING_LIMIT)
            .await
        {
            Ok(items) => {
                report.popular = items.len();
                tracing::info!(count = items.len(), "popular items");
                boost.extend(external_ids(items));
            }
            Err(e) => step_failed(&mut report, "popular items", &e),
        }

        for item_id in boost {
            let update = PriorityUpdate {
                item_id,
                priority: i64::from(BOOST_PRIORITY),
            };
            match publish_json(self.broker.as_ref(), Topic::PriorityUpdate, &update).await {
                Ok(()) => report.boosted += 1,
                Err(e) => tracing::warn!(item = %update.item_id, error = %e, "priority_update publish failed"),
            }
        }

        tracing::info!(
            boosted = report.boosted,
            failed_steps = report.failed_steps,
            "housekeeping finished"
        );
        report
    }

    /// Spawns the `item_changed` consumer and the housekeeping timer.
    pub fn spawn(self: &Arc<Self>, changes: Subscription, shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        let matcher = Arc::clone(self);
        let consumer = tokio::spawn(consume(changes, shutdown.clone(), move |event: ItemChanged| {
            let matcher = Arc::clone(&matcher);
            async move { matcher.handle_item_changed(event).await.map(|_| ()) }
        }));
        let timer = tokio::spawn(Arc::clone(self).run_housekeeping(shutdown.clone()));
        vec![consumer, timer]
    }

    async fn run_housekeeping(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let period = self.settings.housekeeping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.housekeeping().await;
                }
            }
        }
        tracing::info!("housekeeping timer stopped");
    }
}

fn external_ids(items: Vec<ItemRef>) -> impl Iterator<Item = String> {
    items.into_iter().map(|item| item.external_id)
}

fn step_failed(report: &mut HousekeepingReport, step: &str, error: &PipelineError) {
    report.failed_steps += 1;
    tracing::warn!(step, error = %error, "housekeeping step failed");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::persistence::{AlertStore, MemoryStore};
    use crate::service::reconcile::ReconcileEngine;
    use crate::service::testing::snapshot;

    struct Fixture {
        store: MemoryStore,
        broker: MemoryBroker,
        engine: ReconcileEngine,
        matcher: AlertMatcher,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let broker = MemoryBroker::new(64);
        let shared_store: Arc<dyn Store> = Arc::new(store.clone());
        let shared_broker: Arc<dyn Broker> = Arc::new(broker.clone());
        Fixture {
            engine: ReconcileEngine::new(Arc::clone(&shared_store), Arc::clone(&shared_broker)),
            matcher: AlertMatcher::new(shared_store, shared_broker, MatcherSettings::default()),
            store,
            broker,
        }
    }

    async fn seed_drop(fx: &Fixture, from: f64, to: f64) -> i64 {
        let Ok(first) = fx.engine.reconcile(&snapshot("lamp", &[("lamp-v", from, 5)])).await else {
            panic!("seed");
        };
        let Ok(_) = fx.engine.reconcile(&snapshot("lamp", &[("lamp-v", to, 5)])).await else {
            panic!("drop");
        };
        first.item_id
    }

    fn changed() -> ItemChanged {
        ItemChanged {
            external_id: "lamp".to_string(),
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rejects_non_positive_threshold() {
        let fx = fixture();
        fx.store.add_user(1).await;
        let item_id = seed_drop(&fx, 10.0, 10.0).await;
        for threshold in [0.0, -5.0, f64::NAN] {
            let result = fx
                .matcher
                .create_rule(NewAlertRule {
                    user_id: 1,
                    item_id,
                    variant_id: None,
                    threshold_percent: threshold,
                })
                .await;
            assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
        }
        assert!(fx.matcher.rules().is_empty().await);
    }

    #[tokio::test]
    async fn rejects_unknown_user_and_item() {
        let fx = fixture();
        let item_id = seed_drop(&fx, 10.0, 10.0).await;
        let unknown_user = fx
            .matcher
            .create_rule(NewAlertRule {
                user_id: 99,
                item_id,
                variant_id: None,
                threshold_percent: 10.0,
            })
            .await;
        assert!(matches!(unknown_user, Err(PipelineError::UserNotFound(99))));

        fx.store.add_user(1).await;
        let unknown_item = fx
            .matcher
            .create_rule(NewAlertRule {
                user_id: 1,
                item_id: 4242,
                variant_id: None,
                threshold_percent: 10.0,
            })
            .await;
        assert!(matches!(unknown_item, Err(PipelineError::ItemIdNotFound(4242))));
    }

    #[tokio::test]
    async fn fires_once_per_cooldown_window() {
        let fx = fixture();
        fx.store.add_user(1).await;
        let item_id = seed_drop(&fx, 100.0, 80.0).await;
        let Ok(rule) = fx
            .matcher
            .create_rule(NewAlertRule {
                user_id: 1,
                item_id,
                variant_id: None,
                threshold_percent: 15.0,
            })
            .await
        else {
            panic!("create rule");
        };
        let Ok(mut sub) = fx.broker.subscribe(Topic::NotifyUser).await else {
            panic!("subscribe");
        };

        assert!(matches!(fx.matcher.handle_item_changed(changed()).await, Ok(1)));
        assert!(matches!(fx.matcher.handle_item_changed(changed()).await, Ok(0)));

        let Some(Ok(payload)) = sub.next().await else {
            panic!("notify_user");
        };
        let Ok(notify) = serde_json::from_str::<NotifyUser>(&payload) else {
            panic!("decodes");
        };
        assert_eq!(notify.user_id, 1);
        assert_eq!(notify.item_id, item_id);
        assert!((notify.discount_percent - 20.0).abs() < 1e-9);

        let Ok(stored) = fx.store.list_alert_rules().await else {
            panic!("rules");
        };
        let Some(persisted) = stored.iter().find(|r| r.id == rule.id) else {
            panic!("rule persisted");
        };
        assert!(persisted.last_notified_at.is_some());
    }

    #[tokio::test]
    async fn small_drop_does_not_fire() {
        let fx = fixture();
        fx.store.add_user(1).await;
        let item_id = seed_drop(&fx, 100.0, 95.0).await;
        let _ = fx
            .matcher
            .create_rule(NewAlertRule {
                user_id: 1,
                item_id,
                variant_id: None,
                threshold_percent: 10.0,
            })
            .await;
        assert!(matches!(fx.matcher.handle_item_changed(changed()).await, Ok(0)));
    }

    #[tokio::test]
    async fn delete_removes_rule_and_missing_is_not_found() {
        let fx = fixture();
        fx.store.add_user(1).await;
        let item_id = seed_drop(&fx, 100.0, 50.0).await;
        let _ = fx
            .matcher
            .create_rule(NewAlertRule {
                user_id: 1,
                item_id,
                variant_id: None,
                threshold_percent: 10.0,
            })
            .await;

        assert!(fx.matcher.delete_rule(1, item_id).await.is_ok());
        assert!(matches!(
            fx.matcher.delete_rule(1, item_id).await,
            Err(PipelineError::AlertNotFound { .. })
        ));
        assert!(matches!(fx.matcher.handle_item_changed(changed()).await, Ok(0)));
        assert!(matches!(fx.store.list_alert_rules().await, Ok(rules) if rules.is_empty()));
    }

    #[tokio::test]
    async fn load_adds_default_rules_for_favorites() {
        let fx = fixture();
        fx.store.add_user(1).await;
        fx.store.add_user(2).await;
        let item_id = seed_drop(&fx, 10.0, 10.0).await;
        let _ = fx.store.ensure_favorite(1, item_id).await;
        let _ = fx.store.ensure_favorite(2, item_id).await;
        let _ = fx
            .store
            .insert_alert_rule(
                &NewAlertRule {
                    user_id: 1,
                    item_id,
                    variant_id: None,
                    threshold_percent: 25.0,
                },
                Utc::now(),
            )
            .await;

        let Ok(report) = fx.matcher.load().await else {
            panic!("load");
        };
        assert_eq!(report.persisted, 1);
        assert_eq!(report.defaults, 1);

        let user_two = fx.matcher.rules().for_user(2).await;
        let Some(default_rule) = user_two.first() else {
            panic!("default rule");
        };
        assert!((default_rule.threshold_percent - DEFAULT_THRESHOLD_PERCENT).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn housekeeping_boosts_anomalies_once() {
        let fx = fixture();
        let _ = seed_drop(&fx, 100.0, 40.0).await;
        let Ok(mut sub) = fx.broker.subscribe(Topic::PriorityUpdate).await else {
            panic!("subscribe");
        };

        let report = fx.matcher.housekeeping().await;
        assert_eq!(report.price_anomalies, 1);
        assert_eq!(report.boosted, 1);
        assert_eq!(report.failed_steps, 0);

        let Some(Ok(payload)) = sub.next().await else {
            panic!("priority_update");
        };
        let Ok(update) = serde_json::from_str::<PriorityUpdate>(&payload) else {
            panic!("decodes");
        };
        assert_eq!(update.item_id, "lamp");
        assert_eq!(update.priority, 8);
    }
}
