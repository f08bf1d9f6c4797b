// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Coalescing status fan-out.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: when a queue is full its oldest undelivered value is dropped
//! to make room, so a slow subscriber may skip intermediate values but
//! always ends up seeing the latest one. A new subscriber first receives the
//! value current at subscribe time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;

pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A published value with its position in the broadcast sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<T> {
    pub seq: u64,
    pub value: T,
}

struct SubscriberQueue<T> {
    pending: Mutex<VecDeque<Sequenced<T>>>,
    notify: Notify,
    closed: AtomicBool,
    coalesced: AtomicU64,
    /// The subscribe-time value has not been handed out yet. Guarded by
    /// the `pending` lock.
    first_pending: AtomicBool,
}

impl<T> SubscriberQueue<T> {
    fn new(first: Sequenced<T>, closed: bool) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(first);
        Self {
            pending: Mutex::new(pending),
            notify: Notify::new(),
            closed: AtomicBool::new(closed),
            coalesced: AtomicU64::new(0),
            first_pending: AtomicBool::new(true),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Sequenced<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item`, evicting the oldest entry once `depth` is reached. An
    /// undelivered subscribe-time value is never evicted, so a queue of
    /// depth one holds two entries until the first `pop`.
    fn push(&self, item: Sequenced<T>, depth: usize) {
        {
            let mut pending = self.pending();
            let pinned = usize::from(self.first_pending.load(Ordering::Relaxed));
            let capacity = depth.max(pinned + 1);
            while pending.len() >= capacity {
                pending.remove(pinned);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
            }
            pending.push_back(item);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Sequenced<T>> {
        let mut pending = self.pending();
        let item = pending.pop_front();
        if item.is_some() {
            self.first_pending.store(false, Ordering::Relaxed);
        }
        item
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct BroadcastState<T> {
    seq: u64,
    current: T,
    closed: bool,
    subscribers: HashMap<SubscriberId, Arc<SubscriberQueue<T>>>,
}

struct Shared<T> {
    depth: usize,
    state: Mutex<BroadcastState<T>>,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, BroadcastState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publish/subscribe fan-out of one status value.
pub struct StatusBroadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StatusBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + PartialEq> StatusBroadcaster<T> {
    /// Create a broadcaster holding `initial` with per-subscriber queues of
    /// `depth` entries (at least one).
    pub fn new(initial: T, depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                depth: depth.max(1),
                state: Mutex::new(BroadcastState {
                    seq: 0,
                    current: initial,
                    closed: false,
                    subscribers: HashMap::new(),
                }),
            }),
        }
    }

    pub fn current(&self) -> T {
        self.shared.state().current.clone()
    }

    /// Sequence number of the current value.
    pub fn sequence(&self) -> u64 {
        self.shared.state().seq
    }

    /// Publish a new value. Unchanged values are not re-sent. Returns true if
    /// the value was published.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.shared.state();
        if state.closed || state.current == value {
            return false;
        }
        state.seq += 1;
        state.current = value.clone();
        // Pushing under the state lock keeps every queue in publish order.
        let item = Sequenced {
            seq: state.seq,
            value,
        };
        for queue in state.subscribers.values() {
            queue.push(item.clone(), self.shared.depth);
        }
        true
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let mut state = self.shared.state();
        let id = SubscriberId::new();
        let queue = Arc::new(SubscriberQueue::new(
            Sequenced {
                seq: state.seq,
                value: state.current.clone(),
            },
            state.closed,
        ));
        if !state.closed {
            state.subscribers.insert(id, Arc::clone(&queue));
        }
        Subscription {
            id,
            queue,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state().subscribers.len()
    }

    /// Stop publishing and end every subscription once its queue drains.
    pub fn close(&self) {
        let mut state = self.shared.state();
        state.closed = true;
        for (_, queue) in state.subscribers.drain() {
            queue.close();
        }
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: SubscriberId,
    queue: Arc<SubscriberQueue<T>>,
    shared: Weak<Shared<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next value. Returns `None` once the broadcaster is
    /// closed and everything queued has been delivered.
    pub async fn recv(&mut self) -> Option<T> {
        self.recv_sequenced().await.map(|item| item.value)
    }

    pub async fn recv_sequenced(&mut self) -> Option<Sequenced<T>> {
        loop {
            if let Some(item) = self.queue.pop() {
                return Some(item);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next queued value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.queue.pop().map(|item| item.value)
    }

    /// Number of values this subscriber skipped because its queue was full.
    pub fn coalesced(&self) -> u64 {
        self.queue.coalesced.load(Ordering::Relaxed)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.state().subscribers.remove(&self.id);
        }
        self.queue.closed.store(true, Ordering::Release);
        self.queue.pending().clear();
    }
}
