//! Subscription types for standing queries.

use crate::types::Document;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max queued snapshots before the subscriber is dropped.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Full result set of a standing query at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySnapshot {
    pub documents: Vec<Document>,
}

impl QuerySnapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

/// Why the store ended a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenError {
    /// Snapshot buffer overflowed (slow consumer).
    #[error("subscription buffer overflowed")]
    BufferOverflow,
    /// Read access to the collection was revoked.
    #[error("permission denied on collection: {0}")]
    PermissionDenied(String),
}

type NextFn = Box<dyn FnMut(QuerySnapshot) + Send>;
type ErrorFn = Box<dyn FnOnce(ListenError) + Send>;

/// Callbacks attached to a standing query.
///
/// `on_next` runs once on registration and once per change of the matched
/// set. `on_error` runs at most once, when the store ends the stream.
pub struct SnapshotListener {
    pub(crate) on_next: NextFn,
    pub(crate) on_error: ErrorFn,
}

impl SnapshotListener {
    pub fn new<F>(on_next: F) -> Self
    where
        F: FnMut(QuerySnapshot) + Send + 'static,
    {
        Self {
            on_next: Box::new(on_next),
            on_error: Box::new(|error| {
                tracing::warn!(%error, "subscription ended by store");
            }),
        }
    }

    pub fn on_error<E>(mut self, on_error: E) -> Self
    where
        E: FnOnce(ListenError) + Send + 'static,
    {
        self.on_error = Box::new(on_error);
        self
    }
}

impl fmt::Debug for SnapshotListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotListener").finish_non_exhaustive()
    }
}

/// Handle to a registered standing query.
///
/// [`cancel`](Self::cancel) is the only way to release it: dropping the
/// handle leaves the subscription running.
pub struct ListenerRegistration {
    id: SubscriptionId,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ListenerRegistration {
    pub fn new<F>(id: SubscriptionId, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unregister the standing query. Safe to call more than once; once it
    /// returns, no further callbacks run.
    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
