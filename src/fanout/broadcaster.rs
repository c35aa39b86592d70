//! Drop-oldest broadcaster on top of `tokio::sync::broadcast`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::Notify;
use tracing::debug;

/// Default per-subscriber backlog
pub const DEFAULT_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle the broadcaster keeps to detach a subscriber from the outside
#[derive(Debug, Default)]
struct Detach {
    closed: AtomicBool,
    wake: Notify,
}

impl Detach {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

#[derive(Debug)]
struct Shared<T> {
    sender: broadcast::Sender<T>,
    last: Mutex<Option<T>>,
    subscribers: Mutex<HashMap<u64, Arc<Detach>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Fan one stream of events out to many independent subscribers
///
/// `publish` never blocks. Each subscriber reads the shared ring at its own
/// pace; one that falls more than `capacity` events behind loses its oldest
/// events and resumes with the newest ones. The last published event is
/// cached for late subscribers.
///
/// The ring size is rounded up to a power of two by `tokio`, so a subscriber
/// may retain slightly more than `capacity` events.
///
/// Cloning yields another handle to the same subscriber set.
#[derive(Debug)]
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T: Clone> Broadcaster<T> {
    /// New broadcaster whose subscribers each lag at most `capacity` events
    /// (at least one) before evicting
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                sender,
                last: Mutex::new(None),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Register a new subscriber that sees only future events
    pub fn subscribe(&self) -> Subscription<T> {
        let _last = lock(&self.shared.last);
        self.register(None)
    }

    /// Register a new subscriber with the cached last event already queued
    pub fn subscribe_with_last(&self) -> Subscription<T> {
        // Holding the cache lock keeps publish from slipping an event in
        // between the cached copy and the new receiver.
        let last = lock(&self.shared.last);
        self.register(last.clone())
    }

    fn register(&self, first: Option<T>) -> Subscription<T> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let detach = Arc::new(Detach::default());
        let receiver = self.shared.sender.subscribe();

        let count = {
            let mut subscribers = lock(&self.shared.subscribers);
            subscribers.insert(id, Arc::clone(&detach));
            subscribers.len()
        };
        debug!("Subscriber {} attached ({} total)", id, count);

        Subscription {
            id,
            first,
            receiver,
            detach,
            evicted: 0,
            owner: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        detach(&self.shared, id)
    }

    /// Deliver `event` to every subscriber and cache it as the last event
    pub fn publish(&self, event: T) {
        let mut last = lock(&self.shared.last);
        *last = Some(event.clone());
        // Only fails when nobody is subscribed
        let _ = self.shared.sender.send(event);
    }

    /// The last published event, if any
    pub fn last(&self) -> Option<T> {
        lock(&self.shared.last).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }
}

fn detach<T>(shared: &Shared<T>, id: u64) -> bool {
    let removed = lock(&shared.subscribers).remove(&id);
    match removed {
        Some(handle) => {
            handle.close();
            debug!("Subscriber {} detached", id);
            true
        }
        None => false,
    }
}

/// A subscriber's receiving end
///
/// Dropping the handle unsubscribes it.
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    first: Option<T>,
    receiver: broadcast::Receiver<T>,
    detach: Arc<Detach>,
    evicted: u64,
    owner: Weak<Shared<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next pending event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        if let Some(first) = self.first.take() {
            return Some(first);
        }

        loop {
            match self.receiver.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Lagged(n)) => self.evicted += n,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscriber has been detached or every
    /// broadcaster handle is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        if let Some(first) = self.first.take() {
            return Some(first);
        }

        loop {
            tokio::select! {
                result = self.receiver.recv() => match result {
                    Ok(item) => return Some(item),
                    Err(RecvError::Lagged(n)) => self.evicted += n,
                    Err(RecvError::Closed) => return None,
                },
                _ = self.detach.wake.notified() => {
                    if self.is_closed() {
                        return None;
                    }
                }
            }
        }
    }

    /// Whether the broadcaster detached this subscriber
    pub fn is_closed(&self) -> bool {
        self.detach.closed.load(Ordering::Acquire)
    }

    /// Events this subscriber lost to falling behind
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            detach(&shared, self.id);
        }
    }
}
