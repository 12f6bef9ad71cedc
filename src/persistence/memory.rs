//! In-memory store for development (`STORE_BACKEND=memory`) and tests.
//!
//! A single `tokio::sync::Mutex` guards the whole state. Reconciliation
//! transactions stage their writes locally and apply them under one lock
//! acquisition on commit, so a failed or dropped transaction leaves no
//! trace.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::{
    AlertStore, CatalogStore, CatalogTx, DailyTrend, FavoriteCount, FavoriteStats, ItemFilter,
    ItemRef, ItemStats, NotificationStore, Page, PriceDrop, PriceStats,
};
use crate::domain::{
    AlertRule, Category, Favorite, Item, ItemUpsert, NewAlertRule, NewNotification,
    NewPriceChange, NewStockChange, NotificationRecord, PriceChangeRecord, StockChangeRecord,
    Variant,
};
use crate::error::PipelineError;

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    items: BTreeMap<i64, Item>,
    item_index: HashMap<String, i64>,
    price_changes: Vec<PriceChangeRecord>,
    stock_changes: Vec<StockChangeRecord>,
    categories: BTreeMap<String, Category>,
    users: BTreeSet<i64>,
    favorites: BTreeSet<(i64, i64)>,
    alert_rules: BTreeMap<i64, AlertRule>,
    priorities: BTreeMap<String, u8>,
    notifications: BTreeMap<i64, NotificationRecord>,
    fail_item_upserts: bool,
    fail_notification_inserts: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn item_by_external(&self, external_id: &str) -> Option<&Item> {
        self.item_index
            .get(external_id)
            .and_then(|id| self.items.get(id))
    }

    fn refs(&self, ids: impl IntoIterator<Item = i64>, limit: u32) -> Vec<ItemRef> {
        ids.into_iter()
            .filter_map(|id| self.items.get(&id))
            .take(limit as usize)
            .map(|item| ItemRef {
                id: item.id,
                external_id: item.external_id.clone(),
            })
            .collect()
    }
}

fn paginate<T: Clone>(rows: &[T], page: Page) -> Vec<T> {
    rows.iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct DayTally {
    sum: f64,
    increases: i64,
    decreases: i64,
    no_change: i64,
    total: i64,
}

/// Groups `(time, change)` points by UTC day, newest day first.
#[allow(clippy::cast_precision_loss)]
fn daily_trends(points: impl Iterator<Item = (DateTime<Utc>, f64)>) -> Vec<DailyTrend> {
    let mut days: BTreeMap<NaiveDate, DayTally> = BTreeMap::new();
    for (at, change) in points {
        let day = days.entry(at.date_naive()).or_default();
        day.sum += change;
        day.total += 1;
        if change > 0.0 {
            day.increases += 1;
        } else if change < 0.0 {
            day.decreases += 1;
        } else {
            day.no_change += 1;
        }
    }
    days.into_iter()
        .rev()
        .map(|(date, day)| DailyTrend {
            date,
            avg_change: day.sum / day.total as f64,
            increases: day.increases,
            decreases: day.decreases,
            no_change: day.no_change,
            total_changes: day.total,
        })
        .collect()
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Process-local store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user id.
    pub async fn add_user(&self, user_id: i64) {
        self.state.lock().await.users.insert(user_id);
    }

    /// Makes every subsequent item upsert fail until reset.
    pub async fn fail_item_upserts(&self, fail: bool) {
        self.state.lock().await.fail_item_upserts = fail;
    }

    /// Makes every subsequent notification insert fail until reset.
    pub async fn fail_notification_inserts(&self, fail: bool) {
        self.state.lock().await.fail_notification_inserts = fail;
    }
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    price_changes: Vec<NewPriceChange>,
    stock_changes: Vec<NewStockChange>,
    upsert: Option<(i64, ItemUpsert)>,
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn find_item(&mut self, external_id: &str) -> Result<Option<Item>, PipelineError> {
        Ok(self.state.lock().await.item_by_external(external_id).cloned())
    }

    async fn insert_price_change(&mut self, change: &NewPriceChange) -> Result<(), PipelineError> {
        self.price_changes.push(change.clone());
        Ok(())
    }

    async fn insert_stock_change(&mut self, change: &NewStockChange) -> Result<(), PipelineError> {
        self.stock_changes.push(change.clone());
        Ok(())
    }

    async fn upsert_item(&mut self, upsert: &ItemUpsert) -> Result<i64, PipelineError> {
        let mut state = self.state.lock().await;
        if state.fail_item_upserts {
            return Err(PipelineError::PersistenceError(
                "item upsert rejected".to_string(),
            ));
        }
        let id = match upsert.id {
            Some(id) => id,
            None => match state.item_index.get(&upsert.item.external_id) {
                Some(id) => *id,
                None => state.next_id(),
            },
        };
        drop(state);
        self.upsert = Some((id, upsert.clone()));
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), PipelineError> {
        let Self {
            state,
            price_changes,
            stock_changes,
            upsert,
        } = *self;
        let mut state = state.lock().await;
        let now = Utc::now();

        if let Some((item_id, upsert)) = upsert {
            let mut variants = state
                .items
                .get(&item_id)
                .map(|item| item.variants.clone())
                .unwrap_or_default();

            for incoming in upsert.variants {
                let v = incoming.variant;
                let position = variants.iter().position(|existing| {
                    incoming.id == Some(existing.id) || existing.external_id == v.external_id
                });
                match position.and_then(|pos| variants.get_mut(pos)) {
                    Some(existing) => {
                        existing.price = v.price;
                        existing.original_price = v.original_price;
                        existing.stock_count = v.stock_count;
                        existing.is_active = v.is_active;
                    }
                    None => {
                        let id = state.next_id();
                        variants.push(Variant {
                            id,
                            item_id,
                            external_id: v.external_id,
                            price: v.price,
                            original_price: v.original_price,
                            stock_count: v.stock_count,
                            is_active: v.is_active,
                        });
                    }
                }
            }

            let snapshot = upsert.item;
            let updated_at = if state.items.contains_key(&item_id) {
                now
            } else {
                upsert.created_at
            };
            state
                .item_index
                .insert(snapshot.external_id.clone(), item_id);
            state.items.insert(
                item_id,
                Item {
                    id: item_id,
                    external_id: snapshot.external_id,
                    name: snapshot.name,
                    url: snapshot.url,
                    is_active: snapshot.is_active,
                    rating: snapshot.rating,
                    rating_count: snapshot.rating_count,
                    favorite_count: snapshot.favorite_count,
                    comment_count: snapshot.comment_count,
                    created_at: upsert.created_at,
                    updated_at,
                    variants,
                },
            );
        }

        for change in price_changes {
            let id = state.next_id();
            state.price_changes.push(PriceChangeRecord {
                id,
                item_id: change.item_id,
                variant_id: change.variant_id,
                previous_price: change.previous_price,
                new_price: change.new_price,
                change_percent: change.change_percent,
                created_at: now,
            });
        }
        for change in stock_changes {
            let id = state.next_id();
            state.stock_changes.push(StockChangeRecord {
                id,
                item_id: change.item_id,
                variant_id: change.variant_id,
                previous_stock: change.previous_stock,
                new_stock: change.new_stock,
                change_quantity: change.change_quantity,
                created_at: now,
            });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, PipelineError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            price_changes: Vec::new(),
            stock_changes: Vec::new(),
            upsert: None,
        }))
    }

    async fn item_exists(&self, external_id: &str) -> Result<bool, PipelineError> {
        Ok(self.state.lock().await.item_index.contains_key(external_id))
    }

    async fn find_item(&self, external_id: &str) -> Result<Option<Item>, PipelineError> {
        Ok(self.state.lock().await.item_by_external(external_id).cloned())
    }

    async fn find_item_by_id(&self, id: i64) -> Result<Option<Item>, PipelineError> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn list_items(
        &self,
        filter: ItemFilter,
        page: Page,
    ) -> Result<(Vec<Item>, u64), PipelineError> {
        let state = self.state.lock().await;
        let matching: Vec<Item> = state
            .items
            .values()
            .filter(|item| filter.active.is_none_or(|active| item.is_active == active))
            .cloned()
            .collect();
        Ok((paginate(&matching, page), matching.len() as u64))
    }

    async fn item_stats(&self, since: DateTime<Utc>) -> Result<ItemStats, PipelineError> {
        let state = self.state.lock().await;
        Ok(ItemStats {
            total_items: count(state.items.len()),
            active_items: count(state.items.values().filter(|i| i.is_active).count()),
            new_items: count(state.items.values().filter(|i| i.created_at > since).count()),
            updated_items: count(
                state
                    .items
                    .values()
                    .filter(|i| i.updated_at > since && i.updated_at != i.created_at)
                    .count(),
            ),
            total_variants: count(state.items.values().map(|i| i.variants.len()).sum()),
            price_changes: count(state.price_changes.len()),
            stock_changes: count(state.stock_changes.len()),
        })
    }

    #[allow(clippy::cast_precision_loss)]
    async fn price_stats(&self, since: DateTime<Utc>, top: u32) -> Result<PriceStats, PipelineError> {
        let state = self.state.lock().await;
        let changes = &state.price_changes;
        let avg_change = if changes.is_empty() {
            0.0
        } else {
            changes.iter().map(|c| c.change_percent).sum::<f64>() / changes.len() as f64
        };

        let mut drops: Vec<&PriceChangeRecord> = changes
            .iter()
            .filter(|c| c.created_at > since && c.change_percent < 0.0)
            .collect();
        drops.sort_by(|a, b| {
            a.change_percent
                .total_cmp(&b.change_percent)
                .then_with(|| a.id.cmp(&b.id))
        });
        let biggest_drops = drops
            .into_iter()
            .filter_map(|c| {
                state.items.get(&c.item_id).map(|item| PriceDrop {
                    item_id: c.item_id,
                    item_name: item.name.clone(),
                    variant_id: c.variant_id,
                    previous_price: c.previous_price,
                    new_price: c.new_price,
                    change_percent: c.change_percent,
                })
            })
            .take(top as usize)
            .collect();

        Ok(PriceStats {
            avg_change,
            increases: count(changes.iter().filter(|c| c.change_percent > 0.0).count()),
            decreases: count(changes.iter().filter(|c| c.change_percent < 0.0).count()),
            biggest_drops,
        })
    }

    async fn favorite_stats(&self, top: u32) -> Result<FavoriteStats, PipelineError> {
        let state = self.state.lock().await;
        let users: BTreeSet<i64> = state.favorites.iter().map(|(user, _)| *user).collect();

        let mut per_item: BTreeMap<i64, i64> = BTreeMap::new();
        for (_, item_id) in &state.favorites {
            *per_item.entry(*item_id).or_default() += 1;
        }
        let mut popular: Vec<FavoriteCount> = per_item
            .into_iter()
            .filter_map(|(item_id, n)| {
                state.items.get(&item_id).map(|item| FavoriteCount {
                    item_id,
                    name: item.name.clone(),
                    count: n,
                })
            })
            .collect();
        popular.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.item_id.cmp(&b.item_id)));
        popular.truncate(top as usize);

        Ok(FavoriteStats {
            total_favorites: count(state.favorites.len()),
            users_with_favorites: count(users.len()),
            popular_items: popular,
        })
    }

    async fn price_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError> {
        let state = self.state.lock().await;
        Ok(daily_trends(
            state
                .price_changes
                .iter()
                .filter(|c| c.created_at > since)
                .map(|c| (c.created_at, c.change_percent)),
        ))
    }

    #[allow(clippy::cast_precision_loss)]
    async fn stock_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError> {
        let state = self.state.lock().await;
        Ok(daily_trends(
            state
                .stock_changes
                .iter()
                .filter(|c| c.created_at > since)
                .map(|c| (c.created_at, c.change_quantity as f64)),
        ))
    }

    async fn upsert_categories(&self, categories: &[Category]) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        for category in categories {
            state
                .categories
                .insert(category.external_id.clone(), category.clone());
        }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, PipelineError> {
        let state = self.state.lock().await;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(categories)
    }

    async fn find_category(&self, external_id: &str) -> Result<Option<Category>, PipelineError> {
        Ok(self.state.lock().await.categories.get(external_id).cloned())
    }

    async fn recent_price_changes(
        &self,
        item_id: i64,
        limit: u32,
    ) -> Result<Vec<PriceChangeRecord>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .price_changes
            .iter()
            .rev()
            .filter(|c| c.item_id == item_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn price_history(
        &self,
        item_id: i64,
        page: Page,
    ) -> Result<(Vec<PriceChangeRecord>, u64), PipelineError> {
        let state = self.state.lock().await;
        let rows: Vec<PriceChangeRecord> = state
            .price_changes
            .iter()
            .rev()
            .filter(|c| c.item_id == item_id)
            .cloned()
            .collect();
        Ok((paginate(&rows, page), rows.len() as u64))
    }

    async fn stock_history(
        &self,
        item_id: i64,
        page: Page,
    ) -> Result<(Vec<StockChangeRecord>, u64), PipelineError> {
        let state = self.state.lock().await;
        let rows: Vec<StockChangeRecord> = state
            .stock_changes
            .iter()
            .rev()
            .filter(|c| c.item_id == item_id)
            .cloned()
            .collect();
        Ok((paginate(&rows, page), rows.len() as u64))
    }

    async fn find_variant(&self, variant_id: i64) -> Result<Option<Variant>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .flat_map(|item| item.variants.iter())
            .find(|v| v.id == variant_id)
            .cloned())
    }

    async fn price_trend_items(
        &self,
        min_avg_percent: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let state = self.state.lock().await;
        let mut sums: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
        for change in &state.price_changes {
            let entry = sums.entry(change.item_id).or_default();
            entry.0 += change.change_percent;
            entry.1 += 1.0;
        }
        let ids = sums
            .into_iter()
            .filter(|(_, (sum, n))| sum / n > min_avg_percent)
            .map(|(id, _)| id);
        Ok(state.refs(ids, limit))
    }

    async fn stock_trend_items(
        &self,
        max_avg_quantity: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let state = self.state.lock().await;
        let mut sums: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
        for change in &state.stock_changes {
            let entry = sums.entry(change.item_id).or_default();
            #[allow(clippy::cast_precision_loss)]
            {
                entry.0 += change.change_quantity as f64;
            }
            entry.1 += 1.0;
        }
        let ids = sums
            .into_iter()
            .filter(|(_, (sum, n))| sum / n < max_avg_quantity)
            .map(|(id, _)| id);
        Ok(state.refs(ids, limit))
    }

    async fn price_drop_anomalies(
        &self,
        since: DateTime<Utc>,
        below_percent: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<i64> = state
            .price_changes
            .iter()
            .filter(|c| c.change_percent < below_percent && c.created_at > since)
            .map(|c| c.item_id)
            .collect();
        Ok(state.refs(ids, limit))
    }

    async fn stock_spike_anomalies(
        &self,
        since: DateTime<Utc>,
        above_quantity: i64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<i64> = state
            .stock_changes
            .iter()
            .filter(|c| c.change_quantity > above_quantity && c.created_at > since)
            .map(|c| c.item_id)
            .collect();
        Ok(state.refs(ids, limit))
    }

    async fn popular_items(
        &self,
        min_favorites: i64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let state = self.state.lock().await;
        let mut popular: Vec<&Item> = state
            .items
            .values()
            .filter(|item| item.is_active && item.favorite_count > min_favorites)
            .collect();
        popular.sort_by(|a, b| {
            b.favorite_count
                .cmp(&a.favorite_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        let ids: Vec<i64> = popular.into_iter().map(|item| item.id).collect();
        Ok(state.refs(ids, limit))
    }

    async fn save_priority(&self, external_id: &str, band: u8) -> Result<(), PipelineError> {
        self.state
            .lock()
            .await
            .priorities
            .insert(external_id.to_string(), band);
        Ok(())
    }

    async fn list_priorities(&self) -> Result<Vec<(String, u8)>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .priorities
            .iter()
            .map(|(id, band)| (id.clone(), *band))
            .collect())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, PipelineError> {
        Ok(self.state.lock().await.users.contains(&user_id))
    }

    async fn list_favorites(&self) -> Result<Vec<Favorite>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .favorites
            .iter()
            .filter_map(|(user_id, item_id)| {
                state.items.get(item_id).map(|item| Favorite {
                    user_id: *user_id,
                    item_id: *item_id,
                    item_external_id: item.external_id.clone(),
                })
            })
            .collect())
    }

    async fn ensure_favorite(&self, user_id: i64, item_id: i64) -> Result<(), PipelineError> {
        self.state.lock().await.favorites.insert((user_id, item_id));
        Ok(())
    }

    async fn insert_alert_rule(
        &self,
        rule: &NewAlertRule,
        created_at: DateTime<Utc>,
    ) -> Result<AlertRule, PipelineError> {
        let mut state = self.state.lock().await;
        let stored = AlertRule {
            id: state.next_id(),
            user_id: rule.user_id,
            item_id: rule.item_id,
            variant_id: rule.variant_id,
            threshold_percent: rule.threshold_percent,
            last_notified_at: None,
            created_at,
        };
        state.alert_rules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_alert_rule(&self, rule_id: i64) -> Result<(), PipelineError> {
        self.state.lock().await.alert_rules.remove(&rule_id);
        Ok(())
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, PipelineError> {
        Ok(self
            .state
            .lock()
            .await
            .alert_rules
            .values()
            .cloned()
            .collect())
    }

    async fn touch_alert_rule(&self, rule_id: i64, at: DateTime<Utc>) -> Result<(), PipelineError> {
        if let Some(rule) = self.state.lock().await.alert_rules.get_mut(&rule_id) {
            rule.last_notified_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, PipelineError> {
        let mut state = self.state.lock().await;
        if state.fail_notification_inserts {
            return Err(PipelineError::PersistenceError(
                "notification insert rejected".to_string(),
            ));
        }
        let record = NotificationRecord {
            id: state.next_id(),
            user_id: notification.user_id,
            item_id: notification.item_id,
            message: notification.message.clone(),
            is_read: false,
            delivered_at: notification.delivered_at,
        };
        state.notifications.insert(record.id, record.clone());
        Ok(record)
    }

    async fn unread_count(&self, user_id: i64) -> Result<u64, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        page: Page,
    ) -> Result<(Vec<NotificationRecord>, u64), PipelineError> {
        let state = self.state.lock().await;
        let mut rows: Vec<NotificationRecord> = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.delivered_at
                .cmp(&a.delivered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok((paginate(&rows, page), rows.len() as u64))
    }

    async fn mark_read(&self, notification_id: i64) -> Result<bool, PipelineError> {
        let mut state = self.state.lock().await;
        Ok(match state.notifications.get_mut(&notification_id) {
            Some(record) => {
                record.is_read = true;
                true
            }
            None => false,
        })
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64, PipelineError> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for record in state
            .notifications
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            record.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_notifications_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, PipelineError> {
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|_, n| n.delivered_at >= cutoff);
        Ok((before - state.notifications.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::{ItemSnapshot, VariantSnapshot, VariantUpsert};

    fn upsert(external_id: &str, price: f64) -> ItemUpsert {
        ItemUpsert {
            id: None,
            created_at: Utc::now(),
            item: ItemSnapshot {
                external_id: external_id.to_string(),
                name: "Lamp".to_string(),
                url: String::new(),
                is_active: true,
                rating: 0.0,
                rating_count: 0,
                favorite_count: 0,
                comment_count: 0,
                variants: Vec::new(),
            },
            variants: vec![VariantUpsert {
                id: None,
                variant: VariantSnapshot {
                    external_id: format!("{external_id}-v"),
                    price,
                    original_price: price,
                    stock_count: 1,
                    is_active: true,
                },
            }],
        }
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = MemoryStore::new();
        let Ok(mut tx) = store.begin().await else {
            panic!("begin");
        };
        let Ok(_) = tx.upsert_item(&upsert("sku", 1.0)).await else {
            panic!("upsert");
        };
        drop(tx);
        assert!(matches!(store.item_exists("sku").await, Ok(false)));
    }

    #[tokio::test]
    async fn committed_item_gets_variant_ids() {
        let store = MemoryStore::new();
        let Ok(mut tx) = store.begin().await else {
            panic!("begin");
        };
        let Ok(id) = tx.upsert_item(&upsert("sku", 1.0)).await else {
            panic!("upsert");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit");
        };
        let Ok(Some(item)) = store.find_item_by_id(id).await else {
            panic!("item stored");
        };
        assert_eq!(item.external_id, "sku");
        let Some(variant) = item.variants.first() else {
            panic!("variant stored");
        };
        assert_eq!(variant.item_id, id);
        assert!(matches!(store.find_variant(variant.id).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn retention_removes_only_old_notifications() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for age in [1, 31, 45] {
            let _ = store
                .insert_notification(&NewNotification {
                    user_id: 1,
                    item_id: 1,
                    message: format!("{age} days old"),
                    delivered_at: now - Duration::days(age),
                })
                .await;
        }
        let removed = store
            .delete_notifications_before(now - Duration::days(30))
            .await;
        assert!(matches!(removed, Ok(2)));
        assert!(matches!(store.unread_count(1).await, Ok(1)));
    }

    #[tokio::test]
    async fn notifications_list_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for age in [3, 1, 2] {
            let _ = store
                .insert_notification(&NewNotification {
                    user_id: 7,
                    item_id: 1,
                    message: age.to_string(),
                    delivered_at: now - Duration::hours(age),
                })
                .await;
        }
        let Ok((rows, total)) = store
            .list_notifications(7, false, Page { page: 1, limit: 2 })
            .await
        else {
            panic!("list");
        };
        assert_eq!(total, 3);
        let messages: Vec<&str> = rows.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["1", "2"]);
    }

    async fn stored_item(store: &MemoryStore, external_id: &str) -> Item {
        let Ok(mut tx) = store.begin().await else {
            panic!("begin");
        };
        let Ok(_) = tx.upsert_item(&upsert(external_id, 10.0)).await else {
            panic!("upsert");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit");
        };
        let Ok(Some(item)) = store.find_item(external_id).await else {
            panic!("stored");
        };
        item
    }

    async fn record_price(store: &MemoryStore, item: &Item, percent: f64, at: DateTime<Utc>) {
        let mut state = store.state.lock().await;
        let id = state.next_id();
        state.price_changes.push(PriceChangeRecord {
            id,
            item_id: item.id,
            variant_id: item.variants.first().map_or(0, |v| v.id),
            previous_price: 100.0,
            new_price: 100.0 + percent,
            change_percent: percent,
            created_at: at,
        });
    }

    #[tokio::test]
    async fn first_insert_is_new_but_not_updated() {
        let store = MemoryStore::new();
        let item = stored_item(&store, "sku").await;
        assert_eq!(item.created_at, item.updated_at);

        let since = Utc::now() - Duration::hours(24);
        let Ok(stats) = store.item_stats(since).await else {
            panic!("stats");
        };
        assert_eq!(stats.new_items, 1);
        assert_eq!(stats.updated_items, 0);

        let Ok(later) = store.item_stats(Utc::now() + Duration::hours(1)).await else {
            panic!("stats");
        };
        assert_eq!(later.new_items, 0);
    }

    #[tokio::test]
    async fn price_stats_rank_recent_drops() {
        let store = MemoryStore::new();
        let item = stored_item(&store, "sku").await;
        let now = Utc::now();
        record_price(&store, &item, -10.0, now).await;
        record_price(&store, &item, -30.0, now).await;
        record_price(&store, &item, -50.0, now - Duration::days(2)).await;
        record_price(&store, &item, 20.0, now).await;

        let Ok(stats) = store.price_stats(now - Duration::hours(24), 5).await else {
            panic!("stats");
        };
        assert_eq!(stats.increases, 1);
        assert_eq!(stats.decreases, 3);
        assert!((stats.avg_change + 17.5).abs() < 1e-9);
        let drops: Vec<f64> = stats.biggest_drops.iter().map(|d| d.change_percent).collect();
        assert_eq!(drops, vec![-30.0, -10.0]);
        assert_eq!(stats.biggest_drops.first().map(|d| d.item_name.as_str()), Some("Lamp"));

        let Ok(top_one) = store.price_stats(now - Duration::hours(24), 1).await else {
            panic!("stats");
        };
        assert_eq!(top_one.biggest_drops.len(), 1);
    }

    #[tokio::test]
    async fn empty_price_stats_are_zero() {
        let store = MemoryStore::new();
        let Ok(stats) = store.price_stats(Utc::now(), 5).await else {
            panic!("stats");
        };
        assert_eq!(stats, PriceStats::default());
    }

    #[tokio::test]
    async fn trends_group_by_day_newest_first() {
        let store = MemoryStore::new();
        let item = stored_item(&store, "sku").await;
        let now = Utc::now();
        record_price(&store, &item, -4.0, now).await;
        record_price(&store, &item, 5.0, now - Duration::days(1)).await;
        record_price(&store, &item, -5.0, now - Duration::days(1)).await;
        record_price(&store, &item, 0.0, now - Duration::days(1)).await;
        record_price(&store, &item, -9.0, now - Duration::days(40)).await;

        let Ok(trends) = store.price_trends(now - Duration::days(30)).await else {
            panic!("trends");
        };
        assert_eq!(trends.len(), 2);
        let (Some(today), Some(yesterday)) = (trends.first(), trends.get(1)) else {
            panic!("two days");
        };
        assert_eq!(today.date, now.date_naive());
        assert_eq!(today.decreases, 1);
        assert_eq!(yesterday.total_changes, 3);
        assert_eq!(yesterday.increases, 1);
        assert_eq!(yesterday.decreases, 1);
        assert_eq!(yesterday.no_change, 1);
        assert!(yesterday.avg_change.abs() < 1e-9);
    }

    #[tokio::test]
    async fn favorite_stats_rank_items() {
        let store = MemoryStore::new();
        let a = stored_item(&store, "a").await;
        let b = stored_item(&store, "b").await;
        store.add_user(1).await;
        store.add_user(2).await;
        for (user, item) in [(1, a.id), (2, a.id), (2, b.id)] {
            let Ok(()) = store.ensure_favorite(user, item).await else {
                panic!("favorite");
            };
        }

        let Ok(stats) = store.favorite_stats(5).await else {
            panic!("stats");
        };
        assert_eq!(stats.total_favorites, 3);
        assert_eq!(stats.users_with_favorites, 2);
        let ranked: Vec<(i64, i64)> = stats.popular_items.iter().map(|p| (p.item_id, p.count)).collect();
        assert_eq!(ranked, vec![(a.id, 2), (b.id, 1)]);
    }
}
