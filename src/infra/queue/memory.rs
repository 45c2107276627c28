use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics::gauge;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::application::fanout::{FanoutEvent, FanoutQueue, FanoutWorker, QueueError};
use crate::cache::lock::mutex_lock;
use crate::lifecycle::ShutdownSignal;

const SOURCE: &str = "infra::queue::memory";
pub(crate) const METRIC_MEMORY_QUEUE_DEPTH: &str = "murmur_memory_queue_depth";

/// One handed-out copy of an event. Must be acked or nacked by `tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub attempt: u32,
    pub event: FanoutEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
    UnknownTag,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<u64, Delivery>,
    dead_letters: Vec<FanoutEvent>,
}

/// In-process fan-out queue with at-least-once delivery.
///
/// A consumed event stays in flight until acked; a nack puts it back at the
/// tail until `max_attempts` deliveries have failed, after which it is kept
/// aside as a dead letter and logged.
pub struct MemoryFanoutQueue {
    state: Mutex<QueueState>,
    next_tag: AtomicU64,
    max_attempts: u32,
    available: Notify,
}

impl MemoryFanoutQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            next_tag: AtomicU64::new(1),
            max_attempts: max_attempts.max(1),
            available: Notify::new(),
        }
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::SeqCst)
    }

    pub fn consume(&self) -> Option<Delivery> {
        let mut state = mutex_lock(&self.state, SOURCE, "consume");
        let delivery = state.ready.pop_front()?;
        state.in_flight.insert(delivery.tag, delivery.clone());
        gauge!(METRIC_MEMORY_QUEUE_DEPTH).set(state.ready.len() as f64);
        Some(delivery)
    }

    pub fn ack(&self, tag: u64) -> bool {
        mutex_lock(&self.state, SOURCE, "ack")
            .in_flight
            .remove(&tag)
            .is_some()
    }

    pub fn nack(&self, tag: u64) -> NackOutcome {
        let mut state = mutex_lock(&self.state, SOURCE, "nack");
        let Some(delivery) = state.in_flight.remove(&tag) else {
            return NackOutcome::UnknownTag;
        };

        if delivery.attempt >= self.max_attempts {
            error!(
                author_id = %delivery.event.author_id,
                publication_id = %delivery.event.publication_id,
                attempts = delivery.attempt,
                "fan-out event exhausted its attempts; dead-lettered"
            );
            state.dead_letters.push(delivery.event);
            return NackOutcome::DeadLettered;
        }

        let retry = Delivery {
            tag: self.next_tag(),
            attempt: delivery.attempt + 1,
            event: delivery.event,
        };
        state.ready.push_back(retry);
        drop(state);
        self.available.notify_one();
        NackOutcome::Requeued
    }

    /// Events waiting to be consumed.
    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "in_flight").in_flight.len()
    }

    pub fn dead_letters(&self) -> Vec<FanoutEvent> {
        mutex_lock(&self.state, SOURCE, "dead_letters")
            .dead_letters
            .clone()
    }

    async fn wait_for_events(&self, poll_interval: Duration) {
        tokio::select! {
            _ = self.available.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[async_trait]
impl FanoutQueue for MemoryFanoutQueue {
    async fn enqueue(&self, event: FanoutEvent) -> Result<(), QueueError> {
        let delivery = Delivery {
            tag: self.next_tag(),
            attempt: 1,
            event,
        };
        {
            let mut state = mutex_lock(&self.state, SOURCE, "enqueue");
            state.ready.push_back(delivery);
            gauge!(METRIC_MEMORY_QUEUE_DEPTH).set(state.ready.len() as f64);
        }
        debug!(
            author_id = %event.author_id,
            publication_id = %event.publication_id,
            "fan-out event enqueued in memory"
        );
        self.available.notify_one();
        Ok(())
    }
}

/// Consume events until shutdown is requested and the queue is empty.
pub async fn run_memory_consumer(
    queue: Arc<MemoryFanoutQueue>,
    worker: Arc<FanoutWorker>,
    mut shutdown: ShutdownSignal,
    poll_interval: Duration,
) {
    loop {
        if let Some(delivery) = queue.consume() {
            match worker.handle(&delivery.event).await {
                Ok(_) => {
                    queue.ack(delivery.tag);
                }
                Err(err) => {
                    let outcome = queue.nack(delivery.tag);
                    warn!(
                        publication_id = %delivery.event.publication_id,
                        attempt = delivery.attempt,
                        outcome = ?outcome,
                        error = %err,
                        "fan-out delivery failed"
                    );
                    tokio::time::sleep(poll_interval).await;
                }
            }
            continue;
        }

        if shutdown.is_triggered() {
            break;
        }
        tokio::select! {
            _ = shutdown.wait() => {}
            _ = queue.wait_for_events(poll_interval) => {}
        }
    }

    info!(
        dead_letters = queue.dead_letters().len(),
        "in-memory fan-out consumer drained"
    );
}
