//! Standing queries with full-snapshot change delivery.
//!
//! A subscription pairs a [`Query`](crate::query::Query) with a
//! [`SnapshotListener`]. The store hands the manager its current documents
//! after every write; the manager re-runs each affected query and queues a
//! new [`QuerySnapshot`] whenever the matched set changed.
//!
//! Subscriptions support:
//! - Initial snapshot on registration (possibly empty)
//! - Full-snapshot replace, never diffs
//! - Bounded buffers with slow-subscriber dropping
//! - Idempotent cancellation that silences the subscriber
//!
//! # Example
//!
//! ```ignore
//! let manager = Arc::new(SubscriptionManager::new());
//! let query = Query::collection("posts").order_by("createdAt", Direction::Descending);
//!
//! let registration = manager.subscribe(
//!     query,
//!     current_docs,
//!     SnapshotListener::new(|snapshot| println!("{} posts", snapshot.len())),
//! )?;
//!
//! // After each write
//! manager.broadcast("posts", docs.values());
//!
//! registration.cancel();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ListenError, ListenerRegistration, QuerySnapshot, SnapshotListener, SubscriptionConfig,
    SubscriptionId,
};
