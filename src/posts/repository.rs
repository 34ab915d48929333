//! Paginated and realtime post listings.

use crate::config::FeedConfig;
use crate::error::Result;
use crate::query::{Cursor, Direction, Query};
use crate::store::DocumentStore;
use crate::subscriptions::{ListenError, ListenerRegistration, SnapshotListener};
use crate::types::{Category, Document};

use super::model::{fields, PostSummary};

/// Options for a one-shot page fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageOptions {
    /// Only posts in this category.
    pub category: Option<Category>,
    /// Posts per page (None = configured default).
    pub page_size: Option<usize>,
    /// Resume after this position, from a previous page.
    pub cursor: Option<Cursor>,
}

impl PageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// One page of a newest-first listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub items: Vec<PostSummary>,
    /// Position of the last document read; None when the page is empty.
    pub next_cursor: Option<Cursor>,
    /// Whether posts remain beyond this page.
    ///
    /// With a page size of 0 this can be true while `next_cursor` is
    /// None: there is nothing to resume from, and [`pages`] stops there.
    ///
    /// [`pages`]: PostRepository::pages
    pub has_more: bool,
}

/// Options for a realtime listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenOptions {
    pub category: Option<Category>,
    /// Max posts per snapshot (None = configured default).
    pub page_size: Option<usize>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Newest-first post listings over a document store.
///
/// Holds no state between calls: every page and every snapshot is
/// normalized fresh from what the store returns.
pub struct PostRepository<S> {
    store: S,
    config: FeedConfig,
}

impl<S: DocumentStore> PostRepository<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, FeedConfig::default())
    }

    pub fn with_config(store: S, config: FeedConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Filter and sort shared by both listing modes.
    fn listing_query(&self, category: Option<Category>) -> Query {
        let query = Query::collection(self.config.collection.as_str());
        let query = match category {
            Some(category) => query.where_eq(fields::CATEGORY, category.as_str()),
            None => query,
        };
        query.order_by(fields::CREATED_AT, Direction::Descending)
    }

    /// Fetch one page, newest first.
    ///
    /// Asks the store for one post more than the page size; its presence
    /// is what sets `has_more`. Store errors come back unchanged.
    /// Documents that fail to normalize are left out of `items`, but the
    /// cursor still moves past them, so a page may hold fewer posts than
    /// the page size.
    pub fn fetch_page(&self, options: &PageOptions) -> Result<Page> {
        let page_size = options.page_size.unwrap_or(self.config.default_page_size);

        let mut query = self.listing_query(options.category);
        if let Some(cursor) = &options.cursor {
            query = query.start_after(cursor.clone());
        }
        let query = query.limit(page_size.saturating_add(1));

        let mut docs = self.store.execute(&query)?;
        let has_more = docs.len() > page_size;
        docs.truncate(page_size);

        let Some(last) = docs.last() else {
            tracing::debug!(category = ?options.category, "empty page");
            return Ok(Page {
                items: Vec::new(),
                next_cursor: None,
                has_more,
            });
        };
        let next_cursor = Some(Cursor::from_document(last.clone()));

        let items = normalize(&docs);
        tracing::debug!(
            category = ?options.category,
            returned = items.len(),
            has_more,
            "fetched page"
        );

        Ok(Page {
            items,
            next_cursor,
            has_more,
        })
    }

    /// Walk every page from `options` onward.
    ///
    /// Stops after the last page or the first error.
    pub fn pages(&self, options: PageOptions) -> Pages<'_, S> {
        Pages {
            repo: self,
            options,
            done: false,
        }
    }

    /// Watch the newest posts.
    ///
    /// `on_change` runs once with the current list and again after every
    /// change to it. Stream errors end the subscription and are logged.
    pub fn subscribe<F>(&self, options: &ListenOptions, on_change: F) -> Result<ListenerRegistration>
    where
        F: FnMut(Vec<PostSummary>) + Send + 'static,
    {
        self.subscribe_with_errors(options, on_change, |error| {
            tracing::warn!(%error, "post subscription ended");
        })
    }

    /// Like [`subscribe`](Self::subscribe), with the terminating error
    /// handed to `on_error` instead of the log.
    pub fn subscribe_with_errors<F, E>(
        &self,
        options: &ListenOptions,
        mut on_change: F,
        on_error: E,
    ) -> Result<ListenerRegistration>
    where
        F: FnMut(Vec<PostSummary>) + Send + 'static,
        E: FnOnce(ListenError) + Send + 'static,
    {
        let page_size = options.page_size.unwrap_or(self.config.realtime_page_size);
        let query = self.listing_query(options.category).limit(page_size);

        let listener = SnapshotListener::new(move |snapshot| {
            on_change(normalize(snapshot.iter()));
        })
        .on_error(on_error);

        let registration = self.store.listen(query, listener)?;
        tracing::debug!(
            subscription = registration.id().0,
            category = ?options.category,
            page_size,
            "watching posts"
        );
        Ok(registration)
    }
}

/// Normalize store documents, skipping any that are malformed.
fn normalize<'a, I>(docs: I) -> Vec<PostSummary>
where
    I: IntoIterator<Item = &'a Document>,
{
    docs.into_iter()
        .filter_map(|doc| match PostSummary::from_document(doc) {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed post");
                None
            }
        })
        .collect()
}

/// Iterator over consecutive pages, following each page's cursor.
pub struct Pages<'a, S> {
    repo: &'a PostRepository<S>,
    options: PageOptions,
    done: bool,
}

impl<S: DocumentStore> Iterator for Pages<'_, S> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.repo.fetch_page(&self.options) {
            Ok(page) => {
                match (&page.next_cursor, page.has_more) {
                    (Some(cursor), true) => self.options.cursor = Some(cursor.clone()),
                    _ => self.done = true,
                }
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
