//! # Blog Feed
//!
//! Newest-first post listings over a document store.
//!
//! ## Core Concepts
//!
//! - **Pages**: One-shot fetches bounded by a page size, resumed through an
//!   opaque cursor. One extra post is requested to tell whether more remain.
//! - **Subscriptions**: Standing queries that redeliver the full list after
//!   every change until cancelled.
//! - **Stores**: Anything implementing [`DocumentStore`]; [`MemoryStore`]
//!   ships in-process.
//!
//! ## Example
//!
//! ```ignore
//! use blog_feed::{Category, ListenOptions, MemoryStore, PageOptions, PostDraft, PostRepository};
//!
//! let store = MemoryStore::new();
//! store.add("posts", PostDraft::new("Hello").category(Category::Tech).to_write()?)?;
//!
//! let repo = PostRepository::new(store.clone());
//! let page = repo.fetch_page(&PageOptions::new().category(Category::Tech))?;
//! if page.has_more {
//!     let next = repo.fetch_page(&PageOptions::new().after(page.next_cursor.unwrap()))?;
//! }
//!
//! let registration = repo.subscribe(&ListenOptions::new(), |posts| {
//!     println!("{} posts", posts.len());
//! })?;
//! registration.cancel();
//! ```

pub mod config;
pub mod error;
pub mod posts;
pub mod query;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::FeedConfig;
pub use error::{FeedError, Result, StoreError};
pub use posts::{ListenOptions, Page, PageOptions, Pages, PostDraft, PostRepository, PostSummary};
pub use query::{Cursor, Direction, Query};
pub use store::{DocumentStore, DocumentWrite, MemoryStore, MemoryStoreConfig};
pub use subscriptions::{
    ListenError, ListenerRegistration, QuerySnapshot, SnapshotListener, SubscriptionConfig,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
