//! PostgreSQL implementation of the store traits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::models::{
    AlertRuleRow, CategoryRow, ITEM_COLUMNS, ItemRow, NotificationRow, PriceChangeRow,
    StockChangeRow, VARIANT_COLUMNS, VariantRow, alert_rule_from_row, category_from_row,
    item_from_row, notification_from_row, price_change_from_row, stock_change_from_row,
    variant_from_row,
};
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

fn db_err(e: sqlx::Error) -> PipelineError {
    PipelineError::PersistenceError(e.to_string())
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// PostgreSQL connection string.
    pub url: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Minimum idle connections.
    pub min_connections: u32,
    /// Timeout for acquiring a connection.
    pub connect_timeout: Duration,
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(settings: &PoolSettings) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(&settings.url)
            .await
            .map_err(db_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PipelineError::PersistenceError(e.to_string()))?;

        tracing::info!("database migrations applied");
        Ok(Self { pool })
    }

    /// Per-day aggregates of `column` in one of the change tables.
    async fn daily_trends(
        &self,
        table: &'static str,
        column: &'static str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyTrend>, PipelineError> {
        let rows = sqlx::query_as::<_, (NaiveDate, f64, i64, i64, i64, i64)>(&format!(
            "SELECT (created_at AT TIME ZONE 'UTC')::date AS day, \
               AVG({column})::float8, \
               COUNT(*) FILTER (WHERE {column} > 0), \
               COUNT(*) FILTER (WHERE {column} < 0), \
               COUNT(*) FILTER (WHERE {column} = 0), \
               COUNT(*) \
             FROM {table} WHERE created_at > $1 \
             GROUP BY day ORDER BY day DESC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(
                |(date, avg_change, increases, decreases, no_change, total_changes)| DailyTrend {
                    date,
                    avg_change,
                    increases,
                    decreases,
                    no_change,
                    total_changes,
                },
            )
            .collect())
    }

    /// The underlying pool, shared with the `LISTEN/NOTIFY` broker.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn item_refs(rows: Vec<(i64, String)>) -> Vec<ItemRef> {
    rows.into_iter()
        .map(|(id, external_id)| ItemRef { id, external_id })
        .collect()
}

// ── Item loading shared by the pool and transaction paths ───────────────

enum ItemKey<'a> {
    External(&'a str),
    Id(i64),
}

async fn load_item(conn: &mut PgConnection, key: ItemKey<'_>) -> Result<Option<Item>, PipelineError> {
    let row = match key {
        ItemKey::External(external_id) => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE external_id = $1"
            ))
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await
        }
        ItemKey::Id(id) => {
            sqlx::query_as::<_, ItemRow>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
        }
    }
    .map_err(db_err)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let variants = sqlx::query_as::<_, VariantRow>(&format!(
        "SELECT {VARIANT_COLUMNS} FROM variants WHERE item_id = $1 ORDER BY id"
    ))
    .bind(row.0)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?
    .into_iter()
    .map(variant_from_row)
    .collect();

    Ok(Some(item_from_row(row, variants)))
}

/// Reconciliation transaction over a pooled connection.
struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    async fn find_item(&mut self, external_id: &str) -> Result<Option<Item>, PipelineError> {
        load_item(&mut self.tx, ItemKey::External(external_id)).await
    }

    async fn insert_price_change(&mut self, change: &NewPriceChange) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO price_changes (item_id, variant_id, previous_price, new_price, change_percent) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(change.item_id)
        .bind(change.variant_id)
        .bind(change.previous_price)
        .bind(change.new_price)
        .bind(change.change_percent)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_stock_change(&mut self, change: &NewStockChange) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO stock_changes (item_id, variant_id, previous_stock, new_stock, change_quantity) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(change.item_id)
        .bind(change.variant_id)
        .bind(change.previous_stock)
        .bind(change.new_stock)
        .bind(change.change_quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_item(&mut self, upsert: &ItemUpsert) -> Result<i64, PipelineError> {
        let item = &upsert.item;
        let item_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO items (external_id, name, url, is_active, rating, rating_count, \
             favorite_count, comment_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (external_id) DO UPDATE SET \
               name = EXCLUDED.name, url = EXCLUDED.url, is_active = EXCLUDED.is_active, \
               rating = EXCLUDED.rating, rating_count = EXCLUDED.rating_count, \
               favorite_count = EXCLUDED.favorite_count, comment_count = EXCLUDED.comment_count, \
               updated_at = now() \
             RETURNING id",
        )
        .bind(&item.external_id)
        .bind(&item.name)
        .bind(&item.url)
        .bind(item.is_active)
        .bind(item.rating)
        .bind(item.rating_count)
        .bind(item.favorite_count)
        .bind(item.comment_count)
        .bind(upsert.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;

        // Variant external ids are scoped to their item.
        for variant in &upsert.variants {
            let v = &variant.variant;
            match variant.id {
                Some(id) => {
                    let updated = sqlx::query(
                        "UPDATE variants SET price = $3, original_price = $4, \
                           stock_count = $5, is_active = $6 \
                         WHERE id = $1 AND item_id = $2",
                    )
                    .bind(id)
                    .bind(item_id)
                    .bind(v.price)
                    .bind(v.original_price)
                    .bind(v.stock_count)
                    .bind(v.is_active)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(db_err)?;
                    if updated.rows_affected() != 1 {
                        return Err(PipelineError::PersistenceError(format!(
                            "variant {id} does not belong to item {item_id}"
                        )));
                    }
                }
                None => {
                    sqlx::query(
                        "INSERT INTO variants (item_id, external_id, price, original_price, stock_count, is_active) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (item_id, external_id) DO UPDATE SET \
                           price = EXCLUDED.price, original_price = EXCLUDED.original_price, \
                           stock_count = EXCLUDED.stock_count, is_active = EXCLUDED.is_active",
                    )
                    .bind(item_id)
                    .bind(&v.external_id)
                    .bind(v.price)
                    .bind(v.original_price)
                    .bind(v.stock_count)
                    .bind(v.is_active)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(db_err)?;
                }
            }
        }

        Ok(item_id)
    }

    async fn commit(self: Box<Self>) -> Result<(), PipelineError> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), PipelineError> {
        self.tx.rollback().await.map_err(db_err)
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, PipelineError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgCatalogTx { tx }))
    }

    async fn item_exists(&self, external_id: &str) -> Result<bool, PipelineError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM items WHERE external_id = $1)")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_item(&self, external_id: &str) -> Result<Option<Item>, PipelineError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_item(&mut conn, ItemKey::External(external_id)).await
    }

    async fn find_item_by_id(&self, id: i64) -> Result<Option<Item>, PipelineError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_item(&mut conn, ItemKey::Id(id)).await
    }

    async fn list_items(
        &self,
        filter: ItemFilter,
        page: Page,
    ) -> Result<(Vec<Item>, u64), PipelineError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM items WHERE ($1::bool IS NULL OR is_active = $1)",
        )
        .bind(filter.active)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE ($1::bool IS NULL OR is_active = $1) \
             ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(filter.active)
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids: Vec<i64> = rows.iter().map(|row| row.0).collect();
        let variant_rows = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE item_id = ANY($1) ORDER BY id"
        ))
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut by_item: HashMap<i64, Vec<Variant>> = HashMap::new();
        for variant in variant_rows.into_iter().map(variant_from_row) {
            by_item.entry(variant.item_id).or_default().push(variant);
        }
        let items = rows
            .into_iter()
            .map(|row| {
                let variants = by_item.remove(&row.0).unwrap_or_default();
                item_from_row(row, variants)
            })
            .collect();

        Ok((items, to_u64(total)))
    }

    async fn item_stats(&self, since: DateTime<Utc>) -> Result<ItemStats, PipelineError> {
        let (total_items, active_items, new_items, updated_items, total_variants, price_changes, stock_changes) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64, i64)>(
                "SELECT \
                   (SELECT COUNT(*) FROM items), \
                   (SELECT COUNT(*) FROM items WHERE is_active), \
                   (SELECT COUNT(*) FROM items WHERE created_at > $1), \
                   (SELECT COUNT(*) FROM items WHERE updated_at > $1 AND updated_at <> created_at), \
                   (SELECT COUNT(*) FROM variants), \
                   (SELECT COUNT(*) FROM price_changes), \
                   (SELECT COUNT(*) FROM stock_changes)",
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(ItemStats {
            total_items,
            active_items,
            new_items,
            updated_items,
            total_variants,
            price_changes,
            stock_changes,
        })
    }

    async fn price_stats(&self, since: DateTime<Utc>, top: u32) -> Result<PriceStats, PipelineError> {
        let (avg_change, increases, decreases) = sqlx::query_as::<_, (f64, i64, i64)>(
            "SELECT COALESCE(AVG(change_percent), 0)::float8, \
               COUNT(*) FILTER (WHERE change_percent > 0), \
               COUNT(*) FILTER (WHERE change_percent < 0) \
             FROM price_changes",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let drops = sqlx::query_as::<_, (i64, String, i64, f64, f64, f64)>(
            "SELECT pc.item_id, i.name, pc.variant_id, pc.previous_price, pc.new_price, pc.change_percent \
             FROM price_changes pc JOIN items i ON i.id = pc.item_id \
             WHERE pc.created_at > $1 AND pc.change_percent < 0 \
             ORDER BY pc.change_percent ASC, pc.id ASC LIMIT $2",
        )
        .bind(since)
        .bind(i64::from(top))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(PriceStats {
            avg_change,
            increases,
            decreases,
            biggest_drops: drops
                .into_iter()
                .map(
                    |(item_id, item_name, variant_id, previous_price, new_price, change_percent)| PriceDrop {
                        item_id,
                        item_name,
                        variant_id,
                        previous_price,
                        new_price,
                        change_percent,
                    },
                )
                .collect(),
        })
    }

    async fn favorite_stats(&self, top: u32) -> Result<FavoriteStats, PipelineError> {
        let (total_favorites, users_with_favorites) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(DISTINCT user_id) FROM favorites",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let popular = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT i.id, i.name, COUNT(*) AS favorites \
             FROM favorites f JOIN items i ON i.id = f.item_id \
             GROUP BY i.id, i.name ORDER BY favorites DESC, i.id ASC LIMIT $1",
        )
        .bind(i64::from(top))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(FavoriteStats {
            total_favorites,
            users_with_favorites,
            popular_items: popular
                .into_iter()
                .map(|(item_id, name, count)| FavoriteCount { item_id, name, count })
                .collect(),
        })
    }

    async fn price_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError> {
        self.daily_trends("price_changes", "change_percent", since).await
    }

    async fn stock_trends(&self, since: DateTime<Utc>) -> Result<Vec<DailyTrend>, PipelineError> {
        self.daily_trends("stock_changes", "change_quantity", since).await
    }

    async fn upsert_categories(&self, categories: &[Category]) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for category in categories {
            sqlx::query(
                "INSERT INTO categories (external_id, name, parent_external_id, level) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (external_id) DO UPDATE SET \
                   name = EXCLUDED.name, parent_external_id = EXCLUDED.parent_external_id, \
                   level = EXCLUDED.level, updated_at = now()",
            )
            .bind(&category.external_id)
            .bind(&category.name)
            .bind(&category.parent_external_id)
            .bind(category.level)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, PipelineError> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT external_id, name, parent_external_id, level FROM categories \
             ORDER BY level, external_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(category_from_row).collect())
    }

    async fn find_category(&self, external_id: &str) -> Result<Option<Category>, PipelineError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "SELECT external_id, name, parent_external_id, level FROM categories \
             WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(category_from_row))
    }

    async fn recent_price_changes(
        &self,
        item_id: i64,
        limit: u32,
    ) -> Result<Vec<PriceChangeRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, PriceChangeRow>(
            "SELECT id, item_id, variant_id, previous_price, new_price, change_percent, created_at \
             FROM price_changes WHERE item_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(item_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(price_change_from_row).collect())
    }

    async fn price_history(
        &self,
        item_id: i64,
        page: Page,
    ) -> Result<(Vec<PriceChangeRecord>, u64), PipelineError> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM price_changes WHERE item_id = $1")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        let rows = sqlx::query_as::<_, PriceChangeRow>(
            "SELECT id, item_id, variant_id, previous_price, new_price, change_percent, created_at \
             FROM price_changes WHERE item_id = $1 ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(item_id)
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok((
            rows.into_iter().map(price_change_from_row).collect(),
            to_u64(total),
        ))
    }

    async fn stock_history(
        &self,
        item_id: i64,
        page: Page,
    ) -> Result<(Vec<StockChangeRecord>, u64), PipelineError> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stock_changes WHERE item_id = $1")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        let rows = sqlx::query_as::<_, StockChangeRow>(
            "SELECT id, item_id, variant_id, previous_stock, new_stock, change_quantity, created_at \
             FROM stock_changes WHERE item_id = $1 ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(item_id)
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok((
            rows.into_iter().map(stock_change_from_row).collect(),
            to_u64(total),
        ))
    }

    async fn find_variant(&self, variant_id: i64) -> Result<Option<Variant>, PipelineError> {
        let row = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE id = $1"
        ))
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(variant_from_row))
    }

    async fn price_trend_items(
        &self,
        min_avg_percent: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT i.id, i.external_id FROM items i \
             JOIN price_changes pc ON pc.item_id = i.id \
             GROUP BY i.id HAVING AVG(pc.change_percent) > $1 ORDER BY i.id LIMIT $2",
        )
        .bind(min_avg_percent)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(item_refs(rows))
    }

    async fn stock_trend_items(
        &self,
        max_avg_quantity: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT i.id, i.external_id FROM items i \
             JOIN stock_changes sc ON sc.item_id = i.id \
             GROUP BY i.id HAVING AVG(sc.change_quantity)::float8 < $1 ORDER BY i.id LIMIT $2",
        )
        .bind(max_avg_quantity)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(item_refs(rows))
    }

    async fn price_drop_anomalies(
        &self,
        since: DateTime<Utc>,
        below_percent: f64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT i.id, i.external_id FROM items i \
             JOIN price_changes pc ON pc.item_id = i.id \
             WHERE pc.change_percent < $1 AND pc.created_at > $2 \
             GROUP BY i.id ORDER BY i.id LIMIT $3",
        )
        .bind(below_percent)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(item_refs(rows))
    }

    async fn stock_spike_anomalies(
        &self,
        since: DateTime<Utc>,
        above_quantity: i64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT i.id, i.external_id FROM items i \
             JOIN stock_changes sc ON sc.item_id = i.id \
             WHERE sc.change_quantity > $1 AND sc.created_at > $2 \
             GROUP BY i.id ORDER BY i.id LIMIT $3",
        )
        .bind(above_quantity)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(item_refs(rows))
    }

    async fn popular_items(
        &self,
        min_favorites: i64,
        limit: u32,
    ) -> Result<Vec<ItemRef>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, external_id FROM items \
             WHERE favorite_count > $1 AND is_active = true \
             ORDER BY favorite_count DESC, id LIMIT $2",
        )
        .bind(min_favorites)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(item_refs(rows))
    }

    async fn save_priority(&self, external_id: &str, band: u8) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO item_priorities (external_id, priority) VALUES ($1, $2) \
             ON CONFLICT (external_id) DO UPDATE SET priority = EXCLUDED.priority, updated_at = now()",
        )
        .bind(external_id)
        .bind(i16::from(band))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_priorities(&self) -> Result<Vec<(String, u8)>, PipelineError> {
        let rows = sqlx::query_as::<_, (String, i16)>(
            "SELECT external_id, priority FROM item_priorities",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, band)| u8::try_from(band).ok().map(|band| (id, band)))
            .collect())
    }
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, PipelineError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_favorites(&self) -> Result<Vec<Favorite>, PipelineError> {
        let rows = sqlx::query_as::<_, (i64, i64, String)>(
            "SELECT f.user_id, f.item_id, i.external_id FROM favorites f \
             JOIN items i ON i.id = f.item_id ORDER BY f.user_id, f.item_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(user_id, item_id, item_external_id)| Favorite {
                user_id,
                item_id,
                item_external_id,
            })
            .collect())
    }

    async fn ensure_favorite(&self, user_id: i64, item_id: i64) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO favorites (user_id, item_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, item_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_alert_rule(
        &self,
        rule: &NewAlertRule,
        created_at: DateTime<Utc>,
    ) -> Result<AlertRule, PipelineError> {
        let row = sqlx::query_as::<_, AlertRuleRow>(
            "INSERT INTO alert_rules (user_id, item_id, variant_id, threshold_percent, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, user_id, item_id, variant_id, threshold_percent, last_notified_at, created_at",
        )
        .bind(rule.user_id)
        .bind(rule.item_id)
        .bind(rule.variant_id)
        .bind(rule.threshold_percent)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(alert_rule_from_row(row))
    }

    async fn delete_alert_rule(&self, rule_id: i64) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, PipelineError> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            "SELECT id, user_id, item_id, variant_id, threshold_percent, last_notified_at, created_at \
             FROM alert_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(alert_rule_from_row).collect())
    }

    async fn touch_alert_rule(&self, rule_id: i64, at: DateTime<Utc>) -> Result<(), PipelineError> {
        sqlx::query("UPDATE alert_rules SET last_notified_at = $2 WHERE id = $1")
            .bind(rule_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, PipelineError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "INSERT INTO notifications (user_id, item_id, message, is_read, delivered_at) \
             VALUES ($1, $2, $3, false, $4) \
             RETURNING id, user_id, item_id, message, is_read, delivered_at",
        )
        .bind(notification.user_id)
        .bind(notification.item_id)
        .bind(&notification.message)
        .bind(notification.delivered_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(notification_from_row(row))
    }

    async fn unread_count(&self, user_id: i64) -> Result<u64, PipelineError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(to_u64(count))
    }

    async fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        page: Page,
    ) -> Result<(Vec<NotificationRecord>, u64), PipelineError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications \
             WHERE user_id = $1 AND (NOT $2 OR is_read = false)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT id, user_id, item_id, message, is_read, delivered_at FROM notifications \
             WHERE user_id = $1 AND (NOT $2 OR is_read = false) \
             ORDER BY delivered_at DESC, id DESC LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok((
            rows.into_iter().map(notification_from_row).collect(),
            to_u64(total),
        ))
    }

    async fn mark_read(&self, notification_id: i64) -> Result<bool, PipelineError> {
        let result = sqlx::query("UPDATE notifications SET is_read = true WHERE id = $1")
            .bind(notification_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_notifications_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM notifications WHERE delivered_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
