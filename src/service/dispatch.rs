//! Draining queued messages to users once they become reachable.
//!
//! Delivery is best-effort and at-most-once per attempt: a message that is
//! forwarded is trimmed from its source queue in the same atomic unit, and
//! every message carries a unique id so the consuming node can drop
//! duplicates should a forward partially succeed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::{entries, keys, RelationshipCache};
use crate::chan::WsMessage;
use crate::config::DispatchConfig;
use crate::service::{PresenceRegistry, PresenceStatus};

/// A message waiting in a per-recipient queue
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PendingMessage {
    /// Unique id of this message, used for consumer-side de-duplication
    pub id: Uuid,
    /// The user this message is for
    pub recipient: Uuid,
    /// The payload forwarded to the recipient's connection
    pub message: WsMessage,
    /// When the message was queued
    pub queued_at: DateTime<Utc>,
}

impl PendingMessage {
    /// Wrap a payload for `recipient`
    pub fn new(recipient: Uuid, message: WsMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            message,
            queued_at: Utc::now(),
        }
    }
}

/// Bound and interval of the offline-retry loop
#[derive(Copy, Clone, Debug)]
pub struct RetrySchedule {
    max_retries: u32,
    delay: Duration,
}

impl RetrySchedule {
    /// Construct a schedule of `max_retries` polls, `delay_ms` apart
    pub fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// The delays of this schedule, exactly `max_retries` of them
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        std::iter::repeat(self.delay).take(self.max_retries as usize)
    }
}

/// The result of a drain attempt
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All queued messages were forwarded to the recipient's routing queue
    Delivered(usize),
    /// There was nothing to deliver
    Empty,
    /// The recipient stayed offline for the whole schedule; the messages
    /// stay queued for a later trigger
    GaveUp,
    /// The process is shutting down
    Cancelled,
    /// The cache tier failed mid-drain; the messages stay queued
    Failed,
}

/// Forwards per-recipient message queues to the routing queue of the node
/// currently holding the recipient's connection.
#[derive(Clone)]
pub struct MessageDispatcher {
    cache: RelationshipCache,
    presence: PresenceRegistry,
    schedule: RetrySchedule,
    shutdown: watch::Receiver<bool>,
}

impl MessageDispatcher {
    /// Construct the dispatcher.
    ///
    /// `shutdown` is the process-scoped signal; drains started from a
    /// request must not die with the request, only with the process.
    pub fn new(
        cache: RelationshipCache,
        presence: PresenceRegistry,
        config: &DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            presence,
            schedule: RetrySchedule::new(config.max_retries, config.retry_delay_ms),
            shutdown,
        }
    }

    /// Queue a payload for `recipient` and try to deliver it.
    ///
    /// Runs in its own task so the caller's request can complete
    /// independently of the recipient's reachability.
    pub fn notify(&self, recipient: Uuid, message: WsMessage) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let pending = PendingMessage::new(recipient, message);
            let Some(payload) = entries::encode(&pending) else {
                return;
            };
            if let Err(err) = dispatcher
                .cache
                .queue_push(&keys::messages(recipient), &payload)
                .await
            {
                error!("Could not queue message for {recipient}: {err}");
                return;
            }
            dispatcher.drain(recipient).await;
        });
    }

    /// Run [Self::drain] in its own process-scoped task
    pub fn spawn_drain(&self, recipient: Uuid) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.drain(recipient).await;
        });
    }

    /// Drain the recipient's queue once they are reachable.
    ///
    /// Polls the presence registry up to the configured bound, waiting the
    /// configured delay between polls. Gives up, without dropping anything,
    /// if the recipient stays offline.
    pub async fn drain(&self, recipient: Uuid) -> DrainOutcome {
        let queue_key = keys::messages(recipient);

        match self.cache.queue_snapshot(&queue_key).await {
            Ok(items) if items.is_empty() => return DrainOutcome::Empty,
            Ok(_) => {}
            Err(err) => {
                warn!("Could not read message queue of {recipient}: {err}");
                return DrainOutcome::Failed;
            }
        }

        let mut shutdown = self.shutdown.clone();
        for delay in self.schedule.delays() {
            match self.presence.status(recipient).await {
                Ok(PresenceStatus::Online(address)) => {
                    return self.deliver(recipient, &queue_key, &address).await;
                }
                Ok(PresenceStatus::Offline) => {}
                Err(err) => {
                    warn!("Presence poll for {recipient} failed: {err}, leaving messages queued");
                    return DrainOutcome::Failed;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return DrainOutcome::Cancelled,
            }
        }

        debug!("{recipient} stayed offline, leaving messages queued");
        DrainOutcome::GaveUp
    }

    /// Forward the queued batch to the routing queue at `address`.
    ///
    /// The snapshot is re-read at delivery time; forwarding and trimming the
    /// consumed entries happen as one atomic unit.
    async fn deliver(&self, recipient: Uuid, queue_key: &str, address: &str) -> DrainOutcome {
        let items = match self.cache.queue_snapshot(queue_key).await {
            Ok(items) => items,
            Err(err) => {
                warn!("Could not read message queue of {recipient}: {err}");
                return DrainOutcome::Failed;
            }
        };

        if items.is_empty() {
            return DrainOutcome::Empty;
        }

        match self
            .cache
            .forward_batch(&keys::message_queue(address), &items, queue_key, items.len())
            .await
        {
            Ok(()) => {
                debug!("Forwarded {} messages to {recipient} via {address}", items.len());
                DrainOutcome::Delivered(items.len())
            }
            Err(err) => {
                warn!("Could not forward messages to {recipient}: {err}");
                DrainOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::{PendingMessage, RetrySchedule};
    use crate::cache::entries;
    use crate::chan::WsMessage;

    #[test]
    fn schedule_is_bounded() {
        let schedule = RetrySchedule::new(10, 100);
        let delays: Vec<_> = schedule.delays().collect();
        assert_eq!(delays.len(), 10);
        assert!(delays.iter().all(|d| *d == Duration::from_millis(100)));
    }

    #[test]
    fn zero_retries_means_no_polls() {
        assert_eq!(RetrySchedule::new(0, 100).delays().count(), 0);
    }

    #[test]
    fn queued_messages_keep_their_identity() {
        let recipient = Uuid::new_v4();
        let pending = PendingMessage::new(recipient, WsMessage::InvalidMessage);
        let payload = entries::encode(&pending).unwrap();
        let decoded: PendingMessage = entries::decode(&payload).unwrap();

        assert_eq!(decoded.id, pending.id);
        assert_eq!(decoded.recipient, recipient);
        assert_eq!(decoded.queued_at, pending.queued_at);
    }

    #[test]
    fn every_message_gets_its_own_id() {
        let recipient = Uuid::new_v4();
        let a = PendingMessage::new(recipient, WsMessage::InvalidMessage);
        let b = PendingMessage::new(recipient, WsMessage::InvalidMessage);
        assert_ne!(a.id, b.id);
    }
}
