//! Document store interface.
//!
//! The post repository talks to its backend only through [`DocumentStore`]:
//! one-shot query execution and standing-query registration. A hosted
//! database client implements it by translating [`Query`] constraints into
//! its own SDK calls; [`MemoryStore`] implements it in-process.

mod memory;

pub use memory::{DocumentWrite, MemoryStore, MemoryStoreConfig};

use crate::error::StoreError;
use crate::query::Query;
use crate::subscriptions::{ListenerRegistration, SnapshotListener};
use crate::types::Document;
use std::sync::Arc;

/// Capabilities the post repository needs from a document store.
pub trait DocumentStore: Send + Sync {
    /// Run a query once and return the matched documents in query order.
    fn execute(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Register a standing query.
    ///
    /// The listener receives the full current result set right away and
    /// again after every change to it, until the returned registration is
    /// cancelled or the store ends the stream through `on_error`.
    fn listen(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<ListenerRegistration, StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn execute(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        (**self).execute(query)
    }

    fn listen(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<ListenerRegistration, StoreError> {
        (**self).listen(query, listener)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    fn execute(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        (**self).execute(query)
    }

    fn listen(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<ListenerRegistration, StoreError> {
        (**self).listen(query, listener)
    }
}
