//! Subscription manager for standing queries.
//!
//! Each subscription owns a bounded channel and a delivery thread that runs
//! its callbacks, so snapshots reach a subscriber in the order the store
//! queued them and never on the writer's thread.

use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::types::Document;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use super::types::{
    ListenError, ListenerRegistration, QuerySnapshot, SnapshotListener, SubscriptionConfig,
    SubscriptionId,
};

/// Shared between a subscription's delivery thread and its cancel handle.
///
/// Callbacks run while holding `active`, so a cancel that returns has
/// waited out any callback in flight. The lock is reentrant so a callback
/// may cancel its own subscription. `closing` is raised before waiting,
/// so no new callback starts once a cancel has begun.
struct Gate {
    active: ReentrantMutex<Cell<bool>>,
    closing: AtomicBool,
    failure: Mutex<Option<ListenError>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            active: ReentrantMutex::new(Cell::new(true)),
            closing: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.active.lock().set(false);
    }

    fn is_open(&self, active: &Cell<bool>) -> bool {
        active.get() && !self.closing.load(Ordering::SeqCst)
    }

    fn fail(&self, error: ListenError) {
        self.failure.lock().get_or_insert(error);
    }
}

/// Internal subscription state.
struct Subscription {
    query: Query,
    sender: Sender<QuerySnapshot>,
    /// Last snapshot queued, for change detection.
    last: Vec<Document>,
    gate: Arc<Gate>,
}

/// Outcome of queueing a snapshot.
enum Delivery {
    Queued,
    /// Buffer full: the subscriber is too slow.
    Overflow,
    /// Delivery thread is gone (its callback panicked).
    Dead,
}

impl Subscription {
    fn try_send(&self, snapshot: QuerySnapshot) -> Delivery {
        match self.sender.try_send(snapshot) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Overflow,
            Err(TrySendError::Disconnected(_)) => Delivery::Dead,
        }
    }
}

/// Manages standing queries and fans out snapshots.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    config: SubscriptionConfig,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::with_config(SubscriptionConfig::default())
    }

    pub fn with_config(config: SubscriptionConfig) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a standing query whose current result set is `initial`.
    ///
    /// `initial` is queued before this returns, so the listener always sees
    /// at least one snapshot. Callers must hold whatever lock orders their
    /// writes against registration, or a change may slip in between.
    pub fn subscribe(
        self: &Arc<Self>,
        query: Query,
        initial: Vec<Document>,
        listener: SnapshotListener,
    ) -> Result<ListenerRegistration, StoreError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));
        let gate = Arc::new(Gate::new());

        // Buffer holds at least one slot and the channel is fresh.
        let _ = sender.try_send(QuerySnapshot::new(initial.clone()));

        let worker_gate = Arc::clone(&gate);
        thread::Builder::new()
            .name(format!("subscription-{}", id.0))
            .spawn(move || deliver(receiver, worker_gate, listener))?;

        self.subscriptions.write().insert(
            id,
            Subscription {
                query,
                sender,
                last: initial,
                gate: Arc::clone(&gate),
            },
        );
        tracing::info!(subscription = id.0, "subscription registered");

        let manager: Weak<Self> = Arc::downgrade(self);
        Ok(ListenerRegistration::new(id, move || {
            gate.close();
            if let Some(manager) = manager.upgrade() {
                manager.unsubscribe(id);
            }
        }))
    }

    /// Remove a subscription without notifying it.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscriptions.write().remove(&id);
        if let Some(sub) = removed {
            sub.gate.close();
            tracing::info!(subscription = id.0, "subscription cancelled");
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Re-run every standing query on `collection` against its current
    /// documents and queue a snapshot wherever the result changed.
    pub fn broadcast<'a, I>(&self, collection: &str, documents: I)
    where
        I: IntoIterator<Item = &'a Document> + Clone,
    {
        let mut subs = self.subscriptions.write();
        let mut overflowed = Vec::new();
        let mut dead = Vec::new();

        for (id, sub) in subs.iter_mut() {
            if sub.query.collection_name() != collection {
                continue;
            }
            let current = sub.query.evaluate(documents.clone());
            if current == sub.last {
                continue;
            }
            match sub.try_send(QuerySnapshot::new(current.clone())) {
                Delivery::Queued => sub.last = current,
                Delivery::Overflow => overflowed.push(*id),
                Delivery::Dead => dead.push(*id),
            }
        }

        // Nobody is left to hear about it.
        for id in dead {
            if subs.remove(&id).is_some() {
                tracing::warn!(subscription = id.0, "removing subscription with dead delivery thread");
            }
        }

        for id in overflowed {
            if let Some(sub) = subs.remove(&id) {
                tracing::warn!(subscription = id.0, "dropping slow subscriber");
                sub.gate.fail(ListenError::BufferOverflow);
            }
        }
    }

    /// End every subscription on `collection` with `error`.
    pub fn terminate(&self, collection: &str, error: ListenError) {
        let mut subs = self.subscriptions.write();
        let ids: Vec<SubscriptionId> = subs
            .iter()
            .filter(|(_, sub)| sub.query.collection_name() == collection)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            if let Some(sub) = subs.remove(&id) {
                tracing::warn!(subscription = id.0, %error, "terminating subscription");
                sub.gate.fail(error.clone());
            }
        }
    }

    /// Register a subscription that is already over: the listener gets
    /// `error` and nothing else.
    pub fn rejected(&self, error: ListenError, listener: SnapshotListener) -> ListenerRegistration {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let gate = Arc::new(Gate::new());
        gate.fail(error);
        // Dropping the sender right away ends the worker after the error.
        let (_, receiver) = bounded::<QuerySnapshot>(1);

        let worker_gate = Arc::clone(&gate);
        if let Err(e) = thread::Builder::new()
            .name(format!("subscription-{}", id.0))
            .spawn(move || deliver(receiver, worker_gate, listener))
        {
            tracing::warn!(subscription = id.0, error = %e, "failed to report rejected subscription");
        }

        ListenerRegistration::new(id, move || gate.close())
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery loop for one subscription.
fn deliver(receiver: Receiver<QuerySnapshot>, gate: Arc<Gate>, listener: SnapshotListener) {
    let SnapshotListener {
        mut on_next,
        on_error,
    } = listener;

    for snapshot in receiver.iter() {
        let active = gate.active.lock();
        if !gate.is_open(&active) {
            return;
        }
        on_next(snapshot);
    }

    // Sender dropped: cancelled, terminated, or the store went away.
    let active = gate.active.lock();
    if gate.is_open(&active) {
        active.set(false);
        let failure = gate.failure.lock().take();
        if let Some(error) = failure {
            on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use serde_json::json;
    use std::time::Duration;

    fn make_doc(id: &str, n: i64) -> Document {
        match json!({ "n": n }) {
            serde_json::Value::Object(fields) => Document::new(id, fields),
            _ => unreachable!(),
        }
    }

    fn query() -> Query {
        Query::collection("items").order_by("n", Direction::Descending)
    }

    fn channel_listener() -> (
        SnapshotListener,
        crossbeam_channel::Receiver<QuerySnapshot>,
        crossbeam_channel::Receiver<ListenError>,
    ) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        let listener = SnapshotListener::new(move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .on_error(move |e| {
            let _ = err_tx.send(e);
        });
        (listener, rx, err_rx)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = Arc::new(SubscriptionManager::new());
        let (listener, rx, _) = channel_listener();

        let handle = manager.subscribe(query(), vec![], listener).unwrap();
        assert_eq!(manager.subscription_count(), 1);

        let initial = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(initial.is_empty());

        handle.cancel();
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_broadcast_only_on_change() {
        let manager = Arc::new(SubscriptionManager::new());
        let (listener, rx, _) = channel_listener();
        let docs = vec![make_doc("a", 1)];

        let _handle = manager.subscribe(query(), docs.clone(), listener).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().len(), 1);

        // Same result set: nothing queued
        manager.broadcast("items", &docs);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let docs = vec![make_doc("a", 1), make_doc("b", 2)];
        manager.broadcast("items", &docs);
        let snapshot = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(snapshot.documents[0].id.as_str(), "b");
    }

    #[test]
    fn test_broadcast_ignores_other_collections() {
        let manager = Arc::new(SubscriptionManager::new());
        let (listener, rx, _) = channel_listener();

        let _handle = manager.subscribe(query(), vec![], listener).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        manager.broadcast("other", &vec![make_doc("a", 1)]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = Arc::new(SubscriptionManager::with_config(SubscriptionConfig {
            buffer_size: 1,
        }));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (err_tx, err_rx) = crossbeam_channel::unbounded();
        // Block inside the first callback so the buffer fills up.
        let listener = SnapshotListener::new(move |_| {
            let _ = gate_rx.recv();
        })
        .on_error(move |e| {
            let _ = err_tx.send(e);
        });

        let _handle = manager.subscribe(query(), vec![], listener).unwrap();
        let mut docs = Vec::new();
        for i in 0..10 {
            docs.push(make_doc(&format!("d{i}"), i));
            manager.broadcast("items", &docs);
        }

        assert_eq!(manager.subscription_count(), 0);
        drop(gate_tx);
        let err = err_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(err, ListenError::BufferOverflow);
    }

    #[test]
    fn test_terminate_reports_error_once() {
        let manager = Arc::new(SubscriptionManager::new());
        let (listener, rx, err_rx) = channel_listener();

        let _handle = manager.subscribe(query(), vec![], listener).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        manager.terminate("items", ListenError::PermissionDenied("items".into()));
        assert_eq!(manager.subscription_count(), 0);

        let err = err_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(err, ListenError::PermissionDenied("items".into()));
        assert!(err_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_cancelled_subscriber_gets_no_error() {
        let manager = Arc::new(SubscriptionManager::new());
        let (listener, rx, err_rx) = channel_listener();

        let handle = manager.subscribe(query(), vec![], listener).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        handle.cancel();

        manager.terminate("items", ListenError::PermissionDenied("items".into()));
        assert!(err_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_panicked_subscriber_removed_on_next_change() {
        let manager = Arc::new(SubscriptionManager::new());
        let listener = SnapshotListener::new(|_| panic!("callback failure"));

        let _handle = manager.subscribe(query(), vec![], listener).unwrap();
        assert_eq!(manager.subscription_count(), 1);

        // The delivery thread dies on the initial snapshot; keep changing
        // the result until the manager notices.
        let mut docs = Vec::new();
        for i in 0..200 {
            docs.push(make_doc(&format!("d{i}"), i));
            manager.broadcast("items", &docs);
            if manager.subscription_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_rejected_reports_error() {
        let manager = SubscriptionManager::new();
        let (listener, rx, err_rx) = channel_listener();

        let _handle = manager.rejected(ListenError::PermissionDenied("items".into()), listener);
        let err = err_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(err, ListenError::PermissionDenied("items".into()));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
