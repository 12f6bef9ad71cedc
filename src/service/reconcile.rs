//! Diff and publish engine.
//!
//! [`ReconcileEngine::reconcile`] runs one store transaction per fetched
//! snapshot: look up the stored item, stage one change record per detected
//! price or stock difference, upsert the item with its reconciled variants
//! and commit. The `item_changed` event is published only after the commit
//! succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::broker::{Broker, Topic, publish_json};
use crate::domain::change::diff_variant;
use crate::domain::{ItemChanged, ItemSnapshot, ItemUpsert, Variant, VariantUpsert};
use crate::error::PipelineError;
use crate::persistence::{CatalogTx, Store};

/// What a reconciliation wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Item row id.
    pub item_id: i64,
    /// `true` if the item was inserted for the first time.
    pub created: bool,
    /// Number of price change records written.
    pub price_changes: usize,
    /// Number of stock change records written.
    pub stock_changes: usize,
}

/// Reconciles fetched snapshots against the store.
#[derive(Debug, Clone)]
pub struct ReconcileEngine {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
}

impl ReconcileEngine {
    /// Creates an engine writing to `store` and announcing on `broker`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Reconciles one snapshot in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if any write or the
    /// commit fails. The transaction is rolled back and nothing is visible.
    pub async fn reconcile(&self, snapshot: &ItemSnapshot) -> Result<ReconcileOutcome, PipelineError> {
        let mut tx = self.store.begin().await?;

        let outcome = match stage(tx.as_mut(), snapshot).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(item = %snapshot.external_id, error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        tracing::debug!(
            item = %snapshot.external_id,
            created = outcome.created,
            price_changes = outcome.price_changes,
            stock_changes = outcome.stock_changes,
            "item reconciled"
        );

        let event = ItemChanged {
            external_id: snapshot.external_id.clone(),
            changed_at: Utc::now(),
        };
        if let Err(e) = publish_json(self.broker.as_ref(), Topic::ItemChanged, &event).await {
            tracing::warn!(item = %snapshot.external_id, error = %e, "item_changed publish failed");
        }

        Ok(outcome)
    }
}

async fn stage(tx: &mut dyn CatalogTx, snapshot: &ItemSnapshot) -> Result<ReconcileOutcome, PipelineError> {
    let mut fields = snapshot.clone();
    fields.variants = Vec::new();

    let Some(stored) = tx.find_item(&snapshot.external_id).await? else {
        let upsert = ItemUpsert {
            id: None,
            created_at: Utc::now(),
            item: fields,
            variants: snapshot
                .variants
                .iter()
                .map(|v| VariantUpsert {
                    id: None,
                    variant: v.clone(),
                })
                .collect(),
        };
        let item_id = tx.upsert_item(&upsert).await?;
        return Ok(ReconcileOutcome {
            item_id,
            created: true,
            price_changes: 0,
            stock_changes: 0,
        });
    };

    let existing: HashMap<&str, &Variant> = stored
        .variants
        .iter()
        .map(|v| (v.external_id.as_str(), v))
        .collect();

    let mut price_changes = 0;
    let mut stock_changes = 0;
    let mut variants = Vec::with_capacity(snapshot.variants.len());

    for incoming in &snapshot.variants {
        let id = match existing.get(incoming.external_id.as_str()) {
            Some(current) => {
                let (price, stock) = diff_variant(current, incoming);
                if let Some(change) = price {
                    tx.insert_price_change(&change).await?;
                    price_changes += 1;
                }
                if let Some(change) = stock {
                    tx.insert_stock_change(&change).await?;
                    stock_changes += 1;
                }
                Some(current.id)
            }
            None => None,
        };
        variants.push(VariantUpsert {
            id,
            variant: incoming.clone(),
        });
    }

    let upsert = ItemUpsert {
        id: Some(stored.id),
        created_at: stored.created_at,
        item: fields,
        variants,
    };
    let item_id = tx.upsert_item(&upsert).await?;

    Ok(ReconcileOutcome {
        item_id,
        created: false,
        price_changes,
        stock_changes,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::domain::ItemChanged;
    use crate::persistence::{CatalogStore, MemoryStore, Page};
    use crate::service::testing::snapshot;

    fn engine() -> (ReconcileEngine, MemoryStore, MemoryBroker) {
        let store = MemoryStore::new();
        let broker = MemoryBroker::new(16);
        let engine = ReconcileEngine::new(Arc::new(store.clone()), Arc::new(broker.clone()));
        (engine, store, broker)
    }

    #[tokio::test]
    async fn new_item_insert_is_idempotent() {
        let (engine, store, _) = engine();
        let snap = snapshot("sku-1", &[("v-1", 100.0, 5)]);

        let Ok(first) = engine.reconcile(&snap).await else {
            panic!("first reconcile");
        };
        let Ok(second) = engine.reconcile(&snap).await else {
            panic!("second reconcile");
        };

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.item_id, second.item_id);
        assert_eq!(second.price_changes + second.stock_changes, 0);

        let Ok(stats) = store.item_stats(Utc::now() - chrono::Duration::hours(24)).await else {
            panic!("stats");
        };
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.total_variants, 1);
        assert_eq!(stats.price_changes, 0);
        assert_eq!(stats.stock_changes, 0);
    }

    #[tokio::test]
    async fn price_drop_writes_one_record() {
        let (engine, store, _) = engine();
        let _ = engine.reconcile(&snapshot("sku-1", &[("v-1", 100.0, 5)])).await;
        let Ok(outcome) = engine.reconcile(&snapshot("sku-1", &[("v-1", 80.0, 5)])).await else {
            panic!("reconcile");
        };
        assert_eq!(outcome.price_changes, 1);
        assert_eq!(outcome.stock_changes, 0);

        let Ok((history, total)) = store.price_history(outcome.item_id, Page { page: 1, limit: 20 }).await else {
            panic!("history");
        };
        assert_eq!(total, 1);
        let Some(record) = history.first() else {
            panic!("one record");
        };
        assert!((record.previous_price - 100.0).abs() < f64::EPSILON);
        assert!((record.new_price - 80.0).abs() < f64::EPSILON);
        assert!((record.change_percent + 20.0).abs() < 1e-9);

        let Ok((stock, _)) = store.stock_history(outcome.item_id, Page { page: 1, limit: 20 }).await else {
            panic!("stock history");
        };
        assert!(stock.is_empty());
    }

    #[tokio::test]
    async fn variant_ids_survive_updates() {
        let (engine, store, _) = engine();
        let _ = engine.reconcile(&snapshot("sku-1", &[("v-1", 10.0, 1)])).await;
        let Ok(Some(before)) = store.find_item("sku-1").await else {
            panic!("stored");
        };
        let _ = engine
            .reconcile(&snapshot("sku-1", &[("v-1", 12.0, 4), ("v-2", 7.0, 1)]))
            .await;
        let Ok(Some(after)) = store.find_item("sku-1").await else {
            panic!("stored");
        };

        assert_eq!(before.created_at, after.created_at);
        let ids_before: Vec<i64> = before.variants.iter().map(|v| v.id).collect();
        let Some(v1) = after.variants.iter().find(|v| v.external_id == "v-1") else {
            panic!("v-1 kept");
        };
        assert_eq!(ids_before, vec![v1.id]);
        assert_eq!(after.variants.len(), 2);

        let Ok(stats) = store.item_stats(Utc::now() - chrono::Duration::hours(24)).await else {
            panic!("stats");
        };
        assert_eq!(stats.price_changes, 1);
        assert_eq!(stats.stock_changes, 1);
    }

    #[tokio::test]
    async fn shared_variant_id_stays_with_its_item() {
        let (engine, store, _) = engine();
        let _ = engine.reconcile(&snapshot("sku-a", &[("v-1", 10.0, 1)])).await;
        let Ok(Some(a_before)) = store.find_item("sku-a").await else {
            panic!("sku-a stored");
        };
        let Ok(b) = engine.reconcile(&snapshot("sku-b", &[("v-1", 20.0, 2)])).await else {
            panic!("sku-b reconcile");
        };
        assert!(b.created);
        assert_eq!(b.price_changes + b.stock_changes, 0);

        let Ok(Some(a_after)) = store.find_item("sku-a").await else {
            panic!("sku-a stored");
        };
        let Ok(Some(b_item)) = store.find_item("sku-b").await else {
            panic!("sku-b stored");
        };
        assert_eq!(a_before.variants, a_after.variants);
        let (Some(va), Some(vb)) = (a_after.variants.first(), b_item.variants.first()) else {
            panic!("one variant each");
        };
        assert_ne!(va.id, vb.id);
        assert_eq!(vb.item_id, b_item.id);
        assert!((va.price - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failed_upsert_commits_nothing() {
        let (engine, store, _) = engine();
        let _ = engine.reconcile(&snapshot("sku-1", &[("v-1", 100.0, 5)])).await;

        store.fail_item_upserts(true).await;
        let result = engine.reconcile(&snapshot("sku-1", &[("v-1", 50.0, 1)])).await;
        assert!(matches!(result, Err(PipelineError::PersistenceError(_))));

        let Ok(stats) = store.item_stats(Utc::now() - chrono::Duration::hours(24)).await else {
            panic!("stats");
        };
        assert_eq!(stats.price_changes, 0);
        assert_eq!(stats.stock_changes, 0);
        let Ok(Some(item)) = store.find_item("sku-1").await else {
            panic!("stored");
        };
        let Some(variant) = item.variants.first() else {
            panic!("variant");
        };
        assert!((variant.price - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn publishes_after_commit_only() {
        let (engine, store, broker) = engine();
        let Ok(mut sub) = broker.subscribe(Topic::ItemChanged).await else {
            panic!("subscribe");
        };

        let _ = engine.reconcile(&snapshot("sku-9", &[("v-9", 3.0, 1)])).await;
        let Some(Ok(payload)) = sub.next().await else {
            panic!("event");
        };
        let Ok(event) = serde_json::from_str::<ItemChanged>(&payload) else {
            panic!("decodes");
        };
        assert_eq!(event.external_id, "sku-9");

        store.fail_item_upserts(true).await;
        let _ = engine.reconcile(&snapshot("sku-9", &[("v-9", 2.0, 1)])).await;
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err());
    }
}
