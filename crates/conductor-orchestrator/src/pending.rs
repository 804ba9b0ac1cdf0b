use conductor_core::Slot;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

/// Key of one resolution slot: a session plus the slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Session the slot belongs to.
    pub correlation_id: Uuid,
    /// Which answer the slot waits for.
    pub slot: Slot,
}

impl SlotKey {
    /// Build a key.
    pub fn new(correlation_id: Uuid, slot: Slot) -> Self {
        Self {
            correlation_id,
            slot,
        }
    }
}

/// A value delivered to a slot, stamped with its global arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival<T> {
    /// The delivered value.
    pub value: T,
    /// Monotonic arrival sequence number across the whole table.
    pub seq: u64,
}

/// What happened to a value handed to [`PendingTable::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting delegation received it.
    Delivered,
    /// The slot was already resolved or abandoned; the value was dropped.
    Duplicate,
    /// No delegation was ever waiting on this key; the value was dropped.
    Unknown,
}

struct Inner<T> {
    open: HashMap<SlotKey, oneshot::Sender<Arrival<T>>>,
    closed: HashSet<SlotKey>,
}

/// Correlation-keyed wait primitive for in-flight delegations.
///
/// At most one unresolved waiter exists per key. A second [`open`](Self::open)
/// for a busy key waits until the first is resolved or abandoned instead of
/// replacing it. A value for a key that is already closed is discarded.
pub struct PendingTable<T> {
    inner: Mutex<Inner<T>>,
    freed: Notify,
    seq: AtomicU64,
}

/// The receiving half of an open slot.
pub struct PendingSlot<T> {
    rx: oneshot::Receiver<Arrival<T>>,
}

impl<T> PendingSlot<T> {
    /// Wait for the single value destined for this slot.
    ///
    /// Returns `None` if the slot was abandoned from another task.
    pub async fn wait(self) -> Option<Arrival<T>> {
        self.rx.await.ok()
    }
}

impl<T> PendingTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                open: HashMap::new(),
                closed: HashSet::new(),
            }),
            freed: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Open a slot for `key`, waiting while another waiter holds it.
    pub async fn open(&self, key: SlotKey) -> PendingSlot<T> {
        loop {
            let freed = self.freed.notified();
            {
                let mut inner = self.inner.lock();
                if !inner.open.contains_key(&key) {
                    let (tx, rx) = oneshot::channel();
                    inner.open.insert(key, tx);
                    inner.closed.remove(&key);
                    return PendingSlot { rx };
                }
            }
            freed.await;
        }
    }

    /// Hand `value` to whoever waits on `key`.
    pub fn resolve(&self, key: SlotKey, value: T) -> Resolution {
        let resolution = {
            let mut inner = self.inner.lock();
            match inner.open.remove(&key) {
                Some(tx) => {
                    inner.closed.insert(key);
                    let seq = self.next_seq();
                    if tx.send(Arrival { value, seq }).is_ok() {
                        Resolution::Delivered
                    } else {
                        Resolution::Duplicate
                    }
                }
                None if inner.closed.contains(&key) => Resolution::Duplicate,
                None => Resolution::Unknown,
            }
        };
        if resolution != Resolution::Unknown {
            self.freed.notify_waiters();
        }
        resolution
    }

    /// Draw an arrival number for a value produced locally, such as a
    /// timeout result, so it orders correctly against delivered values.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Give up on `key` (timeout or cancellation). Later values are discarded.
    pub fn abandon(&self, key: &SlotKey) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.open.remove(key).is_some();
            if removed {
                inner.closed.insert(*key);
            }
            removed
        };
        if removed {
            self.freed.notify_waiters();
        }
        removed
    }

    /// Drop every open and closed slot of a finished session.
    pub fn forget_session(&self, correlation_id: Uuid) {
        {
            let mut inner = self.inner.lock();
            inner.open.retain(|k, _| k.correlation_id != correlation_id);
            inner.closed.retain(|k| k.correlation_id != correlation_id);
        }
        self.freed.notify_waiters();
    }

    /// Whether `key` currently has an unresolved waiter.
    pub fn is_open(&self, key: &SlotKey) -> bool {
        self.inner.lock().open.contains_key(key)
    }

    /// Number of unresolved waiters across all sessions.
    pub fn open_count(&self) -> usize {
        self.inner.lock().open.len()
    }
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
