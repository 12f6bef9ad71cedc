//! Notification fan-out: durable records plus live, non-blocking delivery.
//!
//! Each connected user owns at most one live channel: a bounded queue and
//! a close signal held by the [`ChannelRegistry`]. Delivery never waits;
//! a full, closed or missing channel just means the message is not pushed
//! live. The stored record is what the user sees on reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::{Subscription, consume};
use crate::domain::notification::{DEFAULT_RETENTION_DAYS, render_price_drop};
use crate::domain::{NewNotification, NotificationRecord, NotifyUser};
use crate::error::PipelineError;
use crate::persistence::{Page, Store};
use crate::shutdown::ShutdownSignal;

/// Default live queue capacity per user.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// A message pushed to a connected user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePush {
    /// Rendered notification text.
    pub message: String,
    /// Delivery time.
    pub time: DateTime<Utc>,
}

/// Outcome of a live delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Queued on the user's channel.
    Delivered,
    /// The user has no live channel.
    NoChannel,
    /// The user's queue is full; the message was dropped from live delivery.
    Full,
    /// The user's channel is closing.
    Closed,
}

#[derive(Debug)]
struct LiveSender {
    channel_id: u64,
    tx: mpsc::Sender<LivePush>,
    // Dropping this closes the receiving side.
    _close: oneshot::Sender<()>,
}

/// Receiving side of a live channel, owned by one connection.
#[derive(Debug)]
pub struct LiveReceiver {
    channel_id: u64,
    rx: mpsc::Receiver<LivePush>,
    close: oneshot::Receiver<()>,
    terminated: bool,
}

impl LiveReceiver {
    /// Registry-assigned identity of this channel.
    #[must_use]
    pub const fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Waits for the next push. Returns `None` once the channel has been
    /// replaced or disconnected; messages still queued at that point are
    /// discarded.
    pub async fn recv(&mut self) -> Option<LivePush> {
        if self.terminated {
            return None;
        }
        tokio::select! {
            biased;
            _ = &mut self.close => {
                self.terminated = true;
                None
            }
            push = self.rx.recv() => {
                if push.is_none() {
                    self.terminated = true;
                }
                push
            }
        }
    }
}

/// User id → live channel.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<i64, LiveSender>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelRegistry {
    /// Creates a registry whose channels hold `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a channel for `user_id`, closing any previous one.
    pub async fn connect(&self, user_id: i64) -> LiveReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        let (close_tx, close_rx) = oneshot::channel();
        let channel_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let previous = self.channels.write().await.insert(
            user_id,
            LiveSender {
                channel_id,
                tx,
                _close: close_tx,
            },
        );
        if let Some(previous) = previous {
            tracing::info!(user = user_id, replaced = previous.channel_id, "live channel replaced");
        }

        LiveReceiver {
            channel_id,
            rx,
            close: close_rx,
            terminated: false,
        }
    }

    /// Closes and removes the user's channel. Returns `false` if there was
    /// none.
    pub async fn disconnect(&self, user_id: i64) -> bool {
        self.channels.write().await.remove(&user_id).is_some()
    }

    /// Removes the user's channel only if it is still `channel_id`.
    pub async fn release(&self, user_id: i64, channel_id: u64) -> bool {
        let mut channels = self.channels.write().await;
        if channels
            .get(&user_id)
            .is_some_and(|sender| sender.channel_id == channel_id)
        {
            channels.remove(&user_id);
            return true;
        }
        false
    }

    /// Enqueues `push` without waiting.
    pub async fn deliver(&self, user_id: i64, push: LivePush) -> DeliveryStatus {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(&user_id) else {
            return DeliveryStatus::NoChannel;
        };
        match sender.tx.try_send(push) {
            Ok(()) => DeliveryStatus::Delivered,
            Err(TrySendError::Full(_)) => DeliveryStatus::Full,
            Err(TrySendError::Closed(_)) => DeliveryStatus::Closed,
        }
    }

    /// Number of open channels.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Returns `true` if no user is connected.
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}

/// Retention settings.
#[derive(Debug, Clone, Copy)]
pub struct NotifierSettings {
    /// Age after which notifications are deleted.
    pub retention: chrono::Duration,
    /// Period of the cleanup job.
    pub cleanup_interval: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
            cleanup_interval: Duration::from_secs(86_400),
        }
    }
}

/// Persists notifications and pushes them to connected users.
#[derive(Debug)]
pub struct Notifier {
    store: Arc<dyn Store>,
    channels: ChannelRegistry,
    settings: NotifierSettings,
}

impl Notifier {
    /// Creates a notifier.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, channels: ChannelRegistry, settings: NotifierSettings) -> Self {
        Self {
            store,
            channels,
            settings,
        }
    }

    /// The live channel registry.
    #[must_use]
    pub const fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Handles one `notify_user` event: stores an unread record, then tries
    /// live delivery. A store failure is logged and delivery still happens.
    pub async fn handle_notify(&self, event: NotifyUser) -> DeliveryStatus {
        let now = Utc::now();
        let message = render_price_drop(
            &event.item_name,
            event.new_price,
            event.previous_price,
            event.discount_percent,
        );

        let record = NewNotification {
            user_id: event.user_id,
            item_id: event.item_id,
            message: message.clone(),
            delivered_at: now,
        };
        if let Err(e) = self.store.insert_notification(&record).await {
            tracing::warn!(user = event.user_id, item = event.item_id, error = %e, "notification not persisted");
        }

        let status = self
            .channels
            .deliver(event.user_id, LivePush { message, time: now })
            .await;
        tracing::debug!(user = event.user_id, ?status, "live delivery");
        status
    }

    /// Checks that a user exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UserNotFound`] for an unknown user.
    pub async fn ensure_user(&self, user_id: i64) -> Result<(), PipelineError> {
        if self.store.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(PipelineError::UserNotFound(user_id))
        }
    }

    /// Number of unread notifications of a user.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on store failure.
    pub async fn unread_count(&self, user_id: i64) -> Result<u64, PipelineError> {
        self.store.unread_count(user_id).await
    }

    /// A user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UserNotFound`] for an unknown user.
    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        page: Page,
    ) -> Result<(Vec<NotificationRecord>, u64), PipelineError> {
        self.ensure_user(user_id).await?;
        self.store.list_notifications(user_id, unread_only, page).await
    }

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotificationNotFound`] for an unknown id.
    pub async fn mark_read(&self, notification_id: i64) -> Result<(), PipelineError> {
        if self.store.mark_read(notification_id).await? {
            Ok(())
        } else {
            Err(PipelineError::NotificationNotFound(notification_id))
        }
    }

    /// Marks every notification of a user read. Returns the number updated.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UserNotFound`] for an unknown user.
    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, PipelineError> {
        self.ensure_user(user_id).await?;
        self.store.mark_all_read(user_id).await
    }

    /// Deletes notifications older than the retention period.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PersistenceError`] on store failure.
    pub async fn cleanup(&self) -> Result<u64, PipelineError> {
        let cutoff = Utc::now() - self.settings.retention;
        let removed = self.store.delete_notifications_before(cutoff).await?;
        let live_channels = self.channels.len().await;
        tracing::info!(removed, live_channels, "notification retention finished");
        Ok(removed)
    }

    /// Spawns the `notify_user` consumer and the retention timer.
    pub fn spawn(self: &Arc<Self>, notifications: Subscription, shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        let notifier = Arc::clone(self);
        let consumer = tokio::spawn(consume(notifications, shutdown.clone(), move |event: NotifyUser| {
            let notifier = Arc::clone(&notifier);
            async move {
                notifier.handle_notify(event).await;
                Ok(())
            }
        }));
        let timer = tokio::spawn(Arc::clone(self).run_cleanup(shutdown.clone()));
        vec![consumer, timer]
    }

    async fn run_cleanup(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let period = self.settings.cleanup_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup().await {
                        tracing::warn!(error = %e, "notification retention failed");
                    }
                }
            }
        }
        tracing::info!("retention timer stopped");
    }
}
