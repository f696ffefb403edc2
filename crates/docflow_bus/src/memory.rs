//! In-process broker with durable-queue semantics.
//!
//! Used for single-process runs and tests. Queues live as long as the
//! broker; unacknowledged deliveries go back to the head of their queue when
//! nacked with requeue or when the subscription is dropped; rejected
//! messages move to the dead-letter queue when it has been declared.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

use docflow_protocol::queues::DEAD_LETTER;

use crate::broker::{Broker, Delivery, Subscription};
use crate::error::BrokerError;

/// Per-queue counters, for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Clone)]
struct Stored {
    body: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug)]
struct QueueState {
    durable: bool,
    ready: VecDeque<Stored>,
    unacked: HashMap<u64, Stored>,
    has_consumer: bool,
    notify: Arc<Notify>,
    stats: QueueStats,
}

impl QueueState {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            has_consumer: false,
            notify: Arc::new(Notify::new()),
            stats: QueueStats::default(),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    closed: bool,
}

/// Cheap to clone; clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        lock_state(&self.state)
    }

    /// Bodies waiting in `queue` (not yet delivered), oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .ok()
            .and_then(|state| {
                state
                    .queues
                    .get(queue)
                    .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            })
            .unwrap_or_default()
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.ready.len()))
            .unwrap_or(0)
    }

    pub fn stats(&self, queue: &str) -> Option<QueueStats> {
        self.lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.stats))
    }

    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        self.lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.durable))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|state| state.closed).unwrap_or(true)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(durable));
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>, _persistent: bool) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        q.ready.push_back(Stored {
            body,
            deliveries: 0,
        });
        q.stats.published += 1;
        q.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        if q.has_consumer {
            return Err(BrokerError::ConsumerBusy(queue.to_string()));
        }
        q.has_consumer = true;
        Ok(Box::new(MemorySubscription {
            state: Arc::clone(&self.state),
            queue: queue.to_string(),
            notify: Arc::clone(&q.notify),
            prefetch: usize::from(prefetch.max(1)),
            outstanding: HashSet::new(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        state.closed = true;
        for q in state.queues.values() {
            q.notify.notify_waiters();
        }
        Ok(())
    }
}

struct MemorySubscription {
    state: Arc<Mutex<BrokerState>>,
    queue: String,
    notify: Arc<Notify>,
    prefetch: usize,
    outstanding: HashSet<u64>,
}

impl MemorySubscription {
    fn settle(&mut self, tag: u64) -> Result<(MutexGuard<'_, BrokerState>, Stored), BrokerError> {
        if !self.outstanding.remove(&tag) {
            return Err(BrokerError::UnknownDelivery {
                queue: self.queue.clone(),
                tag,
            });
        }
        let mut state = lock_state(&self.state)?;
        let stored = state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.unacked.remove(&tag))
            .ok_or_else(|| BrokerError::UnknownDelivery {
                queue: self.queue.clone(),
                tag,
            })?;
        Ok((state, stored))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let notify = Arc::clone(&self.notify);
        loop {
            // register interest before checking so a publish in between is not missed
            let notified = notify.notified();
            {
                let mut state = match lock_state(&self.state) {
                    Ok(state) => state,
                    Err(e) => return Some(Err(e)),
                };
                if state.closed {
                    return None;
                }
                if self.outstanding.len() < self.prefetch {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    let Some(q) = state.queues.get_mut(&self.queue) else {
                        return Some(Err(BrokerError::UnknownQueue(self.queue.clone())));
                    };
                    if let Some(mut stored) = q.ready.pop_front() {
                        stored.deliveries += 1;
                        let delivery = Delivery {
                            tag,
                            body: stored.body.clone(),
                            attempt: stored.deliveries,
                        };
                        q.unacked.insert(tag, stored);
                        q.stats.delivered += 1;
                        self.outstanding.insert(tag);
                        return Some(Ok(delivery));
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        let queue = self.queue.clone();
        let (mut state, _) = self.settle(tag)?;
        if let Some(q) = state.queues.get_mut(&queue) {
            q.stats.acked += 1;
        }
        Ok(())
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let queue = self.queue.clone();
        let (mut state, stored) = self.settle(tag)?;
        if requeue {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(stored);
                q.stats.requeued += 1;
                q.notify.notify_waiters();
            }
            return Ok(());
        }

        if let Some(q) = state.queues.get_mut(&queue) {
            q.stats.dead_lettered += 1;
        }
        match state.queues.get_mut(DEAD_LETTER) {
            Some(dlq) if queue != DEAD_LETTER => {
                dlq.ready.push_back(Stored {
                    body: stored.body,
                    deliveries: 0,
                });
                dlq.stats.published += 1;
                dlq.notify.notify_waiters();
                debug!(queue = %queue, tag, "Message moved to dead-letter queue");
            }
            _ => {
                warn!(queue = %queue, tag, "Rejected message discarded (no dead-letter queue declared)");
            }
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let Ok(mut state) = lock_state(&self.state) else {
            return;
        };
        if let Some(q) = state.queues.get_mut(&self.queue) {
            let mut tags: Vec<u64> = self.outstanding.drain().collect();
            // newest first so push_front restores original order
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some(stored) = q.unacked.remove(&tag) {
                    q.ready.push_front(stored);
                }
            }
            q.has_consumer = false;
            q.notify.notify_waiters();
        }
    }
}

fn lock_state(state: &Mutex<BrokerState>) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
    state
        .lock()
        .map_err(|_| BrokerError::Protocol("memory broker lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with(queues: &[&str]) -> MemoryBroker {
        let broker = MemoryBroker::new();
        for queue in queues {
            broker.declare_queue(queue, true).await.unwrap();
        }
        broker
    }

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let broker = broker_with(&["q"]).await;
        broker.publish("q", b"a".to_vec(), true).await.unwrap();
        broker.declare_queue("q", true).await.unwrap();
        assert_eq!(broker.depth("q"), 1);
        assert_eq!(broker.is_durable("q"), Some(true));
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.publish("nope", vec![], true).await,
            Err(BrokerError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = broker_with(&["q"]).await;
        broker.publish("q", b"a".to_vec(), true).await.unwrap();

        let mut sub = broker.subscribe("q", 1).await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"a");
        assert_eq!(delivery.attempt, 1);
        sub.ack(delivery.tag).await.unwrap();

        let stats = broker.stats("q").unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(broker.depth("q"), 0);
        assert!(matches!(
            sub.ack(delivery.tag).await,
            Err(BrokerError::UnknownDelivery { .. })
        ));
    }

    #[tokio::test]
    async fn test_requeue_increments_attempt() {
        let broker = broker_with(&["q"]).await;
        broker.publish("q", b"a".to_vec(), true).await.unwrap();

        let mut sub = broker.subscribe("q", 1).await.unwrap();
        let first = sub.next_delivery().await.unwrap().unwrap();
        sub.nack(first.tag, true).await.unwrap();
        let second = sub.next_delivery().await.unwrap().unwrap();

        assert_eq!(second.body, b"a");
        assert_eq!(second.attempt, 2);
        assert_eq!(broker.stats("q").unwrap().requeued, 1);
    }

    #[tokio::test]
    async fn test_reject_moves_to_dead_letter() {
        let broker = broker_with(&["q", DEAD_LETTER]).await;
        broker.publish("q", b"bad".to_vec(), true).await.unwrap();

        let mut sub = broker.subscribe("q", 1).await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        sub.nack(delivery.tag, false).await.unwrap();

        assert_eq!(broker.messages(DEAD_LETTER), vec![b"bad".to_vec()]);
        assert_eq!(broker.depth("q"), 0);
        assert_eq!(broker.stats("q").unwrap().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_single_consumer_per_queue() {
        let broker = broker_with(&["q"]).await;
        let sub = broker.subscribe("q", 1).await.unwrap();
        assert!(matches!(
            broker.subscribe("q", 1).await,
            Err(BrokerError::ConsumerBusy(_))
        ));
        drop(sub);
        assert!(broker.subscribe("q", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_subscription_returns_unacked() {
        let broker = broker_with(&["q"]).await;
        broker.publish("q", b"a".to_vec(), true).await.unwrap();
        broker.publish("q", b"b".to_vec(), true).await.unwrap();

        let mut sub = broker.subscribe("q", 2).await.unwrap();
        sub.next_delivery().await.unwrap().unwrap();
        sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(broker.depth("q"), 0);
        drop(sub);

        assert_eq!(broker.messages("q"), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let broker = broker_with(&["q"]).await;
        let mut sub = broker.subscribe("q", 1).await.unwrap();

        let closer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            closer.close().await.unwrap();
        });

        let next = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next_delivery())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(broker.is_closed());
        assert!(matches!(
            broker.publish("q", vec![], true).await,
            Err(BrokerError::Closed)
        ));
    }
}
