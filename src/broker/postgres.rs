//! PostgreSQL `LISTEN/NOTIFY` broker.
//!
//! Topic names are used verbatim as channel names. Each subscription holds
//! its own listener connection; publishing goes through the shared pool.

use async_trait::async_trait;
use futures_util::StreamExt;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use super::{Broker, BrokerError, Subscription, Topic};

/// Broker adapter over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    /// Creates a broker that publishes and listens through `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BrokerError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic.as_str())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BrokerError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        listener
            .listen(topic.as_str())
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        tracing::debug!(%topic, "listening");

        let stream = listener.into_stream().map(|item| {
            item.map(|notification| notification.payload().to_string())
                .map_err(|e| BrokerError::Transport(e.to_string()))
        });
        Ok(Subscription::new(topic, stream.boxed()))
    }
}
