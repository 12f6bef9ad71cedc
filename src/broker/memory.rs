//! In-process broker backed by one `tokio::broadcast` channel per topic.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use super::{Broker, BrokerError, Subscription, Topic};

/// In-process broker for the `all` role and for tests.
///
/// Each topic has a ring buffer of `capacity` payloads. A subscriber that
/// falls further behind loses the oldest messages and a warning is logged.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    item_changed: broadcast::Sender<String>,
    priority_update: broadcast::Sender<String>,
    notify_user: broadcast::Sender<String>,
}

impl MemoryBroker {
    /// Creates a broker with the given per-topic capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            item_changed: broadcast::channel(capacity).0,
            priority_update: broadcast::channel(capacity).0,
            notify_user: broadcast::channel(capacity).0,
        }
    }

    const fn sender(&self, topic: Topic) -> &broadcast::Sender<String> {
        match topic {
            Topic::ItemChanged => &self.item_changed,
            Topic::PriorityUpdate => &self.priority_update,
            Topic::NotifyUser => &self.notify_user,
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BrokerError> {
        let delivered = self.sender(topic).send(payload).unwrap_or(0);
        tracing::trace!(%topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BrokerError> {
        let rx = self.sender(topic).subscribe();
        let stream = futures_util::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((Ok(payload), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%topic, skipped, "subscriber lagged behind broker");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Subscription::new(topic, stream.boxed()))
    }
}
