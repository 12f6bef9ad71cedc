//! Publish/subscribe broker connecting the pipeline services.
//!
//! Services never call each other directly: the crawler publishes
//! `item_changed`, the analyzer consumes it and publishes `notify_user` and
//! `priority_update`, and so on. Publishing is fire-and-forget and
//! consumption is continue-on-error; messages are small JSON envelopes.
//!
//! Two adapters are provided: [`MemoryBroker`] for single-process
//! deployments and tests, and [`PgBroker`] on top of PostgreSQL
//! `LISTEN/NOTIFY`.

pub mod memory;
pub mod postgres;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PipelineError;
use crate::shutdown::ShutdownSignal;

pub use memory::MemoryBroker;
pub use postgres::PgBroker;

/// Broker topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Reconciliation committed for an item.
    ItemChanged,
    /// Request to move an item to another priority band.
    PriorityUpdate,
    /// An alert rule fired for a user.
    NotifyUser,
}

impl Topic {
    /// Every topic, in a stable order.
    pub const ALL: [Self; 3] = [Self::ItemChanged, Self::PriorityUpdate, Self::NotifyUser];

    /// Returns the wire name of the topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ItemChanged => "item_changed",
            Self::PriorityUpdate => "priority_update",
            Self::NotifyUser => "notify_user",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Payload could not be encoded.
    #[error("failed to encode payload for {topic}: {reason}")]
    Encode {
        /// Target topic.
        topic: Topic,
        /// Serializer message.
        reason: String,
    },

    /// The underlying transport failed.
    #[error("broker transport error: {0}")]
    Transport(String),
}

/// A live subscription to one topic.
pub struct Subscription {
    topic: Topic,
    inner: BoxStream<'static, Result<String, BrokerError>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Wraps a payload stream.
    #[must_use]
    pub fn new(topic: Topic, inner: BoxStream<'static, Result<String, BrokerError>>) -> Self {
        Self { topic, inner }
    }

    /// Subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next raw payload. `None` means the stream has ended.
    pub async fn next(&mut self) -> Option<Result<String, BrokerError>> {
        self.inner.next().await
    }
}

/// Topic-based message transport.
#[async_trait]
pub trait Broker: fmt::Debug + Send + Sync {
    /// Publishes a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] when the transport rejects the
    /// message. Having no subscribers is not an error.
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BrokerError>;

    /// Opens a subscription that receives messages published from now on.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] when the subscription cannot be
    /// established.
    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BrokerError>;
}

/// Serializes `event` as JSON and publishes it.
///
/// # Errors
///
/// Returns [`BrokerError::Encode`] if serialization fails, or whatever the
/// broker returns from [`Broker::publish`].
pub async fn publish_json<T>(broker: &dyn Broker, topic: Topic, event: &T) -> Result<(), BrokerError>
where
    T: Serialize + Sync,
{
    let payload = serde_json::to_string(event).map_err(|e| BrokerError::Encode {
        topic,
        reason: e.to_string(),
    })?;
    broker.publish(topic, payload).await
}

/// Drives a subscription until shutdown or end of stream.
///
/// Every payload is decoded as `T` and passed to `handler`. Undecodable
/// payloads, transport errors and handler errors are logged and the loop
/// continues with the next message.
pub async fn consume<T, F, Fut>(mut subscription: Subscription, mut shutdown: ShutdownSignal, mut handler: F)
where
    T: DeserializeOwned,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), PipelineError>>,
{
    let topic = subscription.topic();
    tracing::info!(%topic, "consumer started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            message = subscription.next() => {
                match message {
                    Some(Ok(payload)) => match serde_json::from_str::<T>(&payload) {
                        Ok(event) => {
                            if let Err(e) = handler(event).await {
                                tracing::warn!(%topic, error = %e, "message handler failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%topic, error = %e, "dropping undecodable message");
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(%topic, error = %e, "broker receive error");
                    }
                    None => {
                        tracing::warn!(%topic, "subscription stream ended");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(%topic, "consumer stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::PriorityUpdate;

    #[test]
    fn topic_wire_names() {
        let names: Vec<&str> = Topic::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["item_changed", "priority_update", "notify_user"]);
    }

    #[tokio::test]
    async fn consume_skips_bad_messages_and_continues() {
        let broker = MemoryBroker::new(16);
        let Ok(sub) = broker.subscribe(Topic::PriorityUpdate).await else {
            panic!("subscribe");
        };
        let (trigger, signal) = crate::shutdown::channel();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let task = tokio::spawn(consume(sub, signal, move |event: PriorityUpdate| {
            let counter = Arc::clone(&counter);
            async move {
                if event.priority < 0 {
                    return Err(PipelineError::InvalidPriority(event.priority));
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let _ = broker
            .publish(Topic::PriorityUpdate, "not json".to_string())
            .await;
        let bad = PriorityUpdate {
            item_id: "a".to_string(),
            priority: -1,
        };
        let good = PriorityUpdate {
            item_id: "b".to_string(),
            priority: 3,
        };
        let _ = publish_json(&broker, Topic::PriorityUpdate, &bad).await;
        let _ = publish_json(&broker, Topic::PriorityUpdate, &good).await;

        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        trigger.trigger();
        let Ok(()) = task.await else {
            panic!("consumer task panicked");
        };
    }
}
