//! In-process document store.

use crate::error::StoreError;
use crate::query::Query;
use crate::subscriptions::{
    ListenError, ListenerRegistration, SnapshotListener, SubscriptionConfig, SubscriptionManager,
};
use crate::types::{Document, DocumentId, Fields, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::DocumentStore;

/// Length of generated document ids (hex chars).
const ID_LEN: usize = 20;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct MemoryStoreConfig {
    /// Snapshots queued per listener before it is dropped as too slow.
    pub listener_buffer_size: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            listener_buffer_size: SubscriptionConfig::default().buffer_size,
        }
    }
}

/// Field values for a write, plus fields the store fills with its own clock.
#[derive(Clone, Debug, Default)]
pub struct DocumentWrite {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            server_timestamps: Vec::new(),
        }
    }

    /// Build from any serializable object.
    pub fn from_serializable(value: &impl serde::Serialize) -> Result<Self, StoreError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(StoreError::Serialization(format!(
                "document must serialize to an object, got {other}"
            ))),
        }
    }

    /// Set `field` to the store's commit time.
    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }

    fn resolve(self, now: Timestamp) -> Fields {
        let mut fields = self.fields;
        for field in self.server_timestamps {
            fields.insert(field, Value::from(now.0));
        }
        fields
    }
}

type Collection = BTreeMap<DocumentId, Document>;

struct Inner {
    /// Documents by collection. Writers hold the write lock across the
    /// broadcast so listeners see changes in commit order.
    collections: RwLock<HashMap<String, Collection>>,
    /// Collections currently closed to reads.
    denied: RwLock<HashSet<String>>,
    subscriptions: Arc<SubscriptionManager>,
    next_id: AtomicU64,
    /// Last server timestamp handed out.
    clock: Mutex<Timestamp>,
}

/// A document store held entirely in memory.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let subscriptions = SubscriptionManager::with_config(SubscriptionConfig {
            buffer_size: config.listener_buffer_size,
        });
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                denied: RwLock::new(HashSet::new()),
                subscriptions: Arc::new(subscriptions),
                next_id: AtomicU64::new(0),
                clock: Mutex::new(Timestamp::default()),
            }),
        }
    }

    // --- Writes ---

    /// Insert a document under a store-assigned id.
    pub fn add(&self, collection: &str, write: DocumentWrite) -> Result<Document, StoreError> {
        let id = self.generate_id(collection);
        self.set(collection, id, write)
    }

    /// Create or replace the document at `id`.
    pub fn set(
        &self,
        collection: &str,
        id: impl Into<DocumentId>,
        write: DocumentWrite,
    ) -> Result<Document, StoreError> {
        let mut collections = self.inner.collections.write();
        let doc = Document::new(id, write.resolve(self.server_now()));
        let docs = collections.entry(collection.to_string()).or_default();
        docs.insert(doc.id.clone(), doc.clone());
        tracing::debug!(collection, id = %doc.id, "document written");

        self.inner.subscriptions.broadcast(collection, docs.values());
        Ok(doc)
    }

    /// Merge `fields` into an existing document.
    pub fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
    ) -> Result<Document, StoreError> {
        let mut collections = self.inner.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, id))?;
        let doc = docs.get_mut(id).ok_or_else(|| not_found(collection, id))?;
        doc.fields.extend(fields);
        let updated = doc.clone();
        tracing::debug!(collection, %id, "document updated");

        self.inner.subscriptions.broadcast(collection, docs.values());
        Ok(updated)
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, StoreError> {
        let mut collections = self.inner.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        if docs.remove(id).is_none() {
            return Ok(false);
        }
        tracing::debug!(collection, %id, "document deleted");

        self.inner.subscriptions.broadcast(collection, docs.values());
        Ok(true)
    }

    // --- Reads ---

    /// Get a document by id.
    pub fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        self.check_readable(collection)?;
        Ok(self
            .inner
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    pub fn listener_count(&self) -> usize {
        self.inner.subscriptions.subscription_count()
    }

    // --- Access control ---

    /// Close a collection to reads and end its listeners.
    pub fn deny_reads(&self, collection: &str) {
        // Hold off registrations racing the revocation.
        let _collections = self.inner.collections.write();
        self.inner.denied.write().insert(collection.to_string());
        self.inner.subscriptions.terminate(
            collection,
            ListenError::PermissionDenied(collection.to_string()),
        );
    }

    pub fn allow_reads(&self, collection: &str) {
        self.inner.denied.write().remove(collection);
    }

    fn check_readable(&self, collection: &str) -> Result<(), StoreError> {
        if self.inner.denied.read().contains(collection) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        Ok(())
    }

    // --- Helpers ---

    /// Strictly increasing commit clock.
    fn server_now(&self) -> Timestamp {
        let mut last = self.inner.clock.lock();
        let now = Timestamp::now().max(last.next());
        *last = now;
        now
    }

    fn generate_id(&self, collection: &str) -> DocumentId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update(n.to_le_bytes());
        hasher.update(Timestamp::now().0.to_le_bytes());
        let digest = hasher.finalize();
        let mut id = hex::encode(digest);
        id.truncate(ID_LEN);
        DocumentId(id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn execute(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        query.validate()?;
        self.check_readable(query.collection_name())?;

        let collections = self.inner.collections.read();
        let docs = match collections.get(query.collection_name()) {
            Some(docs) => query.evaluate(docs.values()),
            None => Vec::new(),
        };
        tracing::debug!(
            collection = query.collection_name(),
            returned = docs.len(),
            "query executed"
        );
        Ok(docs)
    }

    fn listen(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<ListenerRegistration, StoreError> {
        query.validate()?;

        // Read lock keeps writers out until the listener is registered.
        let collections = self.inner.collections.read();
        if self.check_readable(query.collection_name()).is_err() {
            let collection = query.collection_name().to_string();
            return Ok(self
                .inner
                .subscriptions
                .rejected(ListenError::PermissionDenied(collection), listener));
        }

        let initial = match collections.get(query.collection_name()) {
            Some(docs) => query.evaluate(docs.values()),
            None => Vec::new(),
        };
        self.inner.subscriptions.subscribe(query, initial, listener)
    }
}

fn not_found(collection: &str, id: &DocumentId) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use crate::subscriptions::QuerySnapshot;
    use serde_json::json;
    use std::time::Duration;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_add_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let a = store
            .add(
                "posts",
                DocumentWrite::new(fields(json!({"title": "a"}))).server_timestamp("createdAt"),
            )
            .unwrap();
        let b = store
            .add(
                "posts",
                DocumentWrite::new(fields(json!({"title": "b"}))).server_timestamp("createdAt"),
            )
            .unwrap();

        assert_eq!(a.id.as_str().len(), ID_LEN);
        assert_ne!(a.id, b.id);
        assert!(b.get("createdAt").unwrap().as_i64() > a.get("createdAt").unwrap().as_i64());
        assert_eq!(store.document_count("posts"), 2);
    }

    #[test]
    fn test_get_update_delete() {
        let store = MemoryStore::new();
        let doc = store
            .set("posts", "p1", DocumentWrite::new(fields(json!({"title": "old"}))))
            .unwrap();

        let updated = store
            .update("posts", &doc.id, fields(json!({"title": "new", "viewCount": 3})))
            .unwrap();
        assert_eq!(updated.get("title"), Some(&json!("new")));
        assert_eq!(updated.get("viewCount"), Some(&json!(3)));

        let fetched = store.get("posts", &doc.id).unwrap().unwrap();
        assert_eq!(fetched, updated);

        assert!(store.delete("posts", &doc.id).unwrap());
        assert!(!store.delete("posts", &doc.id).unwrap());
        assert!(store.get("posts", &doc.id).unwrap().is_none());
    }

    #[test]
    fn test_update_missing_document() {
        let store = MemoryStore::new();
        let result = store.update("posts", &DocumentId::from("nope"), Fields::new());
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_execute_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        let docs = store.execute(&Query::collection("nothing")).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_deny_reads() {
        let store = MemoryStore::new();
        store
            .set("posts", "p1", DocumentWrite::new(fields(json!({"n": 1}))))
            .unwrap();

        store.deny_reads("posts");
        let result = store.execute(&Query::collection("posts"));
        assert!(matches!(result, Err(StoreError::PermissionDenied(_))));

        store.allow_reads("posts");
        assert_eq!(store.execute(&Query::collection("posts")).unwrap().len(), 1);
    }

    #[test]
    fn test_listen_sees_writes_in_order() {
        let store = MemoryStore::new();
        let (tx, rx) = crossbeam_channel::unbounded::<QuerySnapshot>();
        let query = Query::collection("posts").order_by("n", Direction::Descending);

        let registration = store
            .listen(
                query,
                SnapshotListener::new(move |snapshot| {
                    let _ = tx.send(snapshot);
                }),
            )
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap().is_empty());

        for n in 1..=3 {
            store
                .set("posts", format!("p{n}"), DocumentWrite::new(fields(json!({"n": n}))))
                .unwrap();
        }
        for expected in 1..=3 {
            let snapshot = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(snapshot.len(), expected);
        }

        registration.cancel();
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listen_rejects_zero_limit() {
        let store = MemoryStore::new();
        let result = store.listen(
            Query::collection("posts").limit(0),
            SnapshotListener::new(|_| {}),
        );
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));
    }
}
