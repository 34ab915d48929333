//! Post documents and their listing projection.

use crate::error::{FeedError, Result, StoreError};
use crate::store::DocumentWrite;
use crate::types::{Category, Document, DocumentId, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};

/// Stored field names.
pub mod fields {
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const CATEGORY: &str = "category";
    pub const CREATED_AT: &str = "createdAt";
    pub const AUTHOR_ID: &str = "authorId";
    pub const AUTHOR_EMAIL: &str = "authorEmail";
    pub const AUTHOR_DISPLAY_NAME: &str = "authorDisplayName";
    pub const VIEW_COUNT: &str = "viewCount";
    pub const THUMBNAIL_URL: &str = "thumbnailUrl";
}

/// Read-side projection of a post used by listings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: DocumentId,
    pub title: String,
    pub category: Option<Category>,
    pub created_at: Timestamp,
    pub author_id: String,
    pub author_email: String,
    pub author_display_name: String,
    pub view_count: u64,
    pub thumbnail_url: Option<String>,
}

/// Shape of a stored post as far as listings care.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPost {
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default)]
    category: Option<String>,
    created_at: Timestamp,
    #[serde(default, deserialize_with = "null_as_default")]
    author_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    author_email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    author_display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    view_count: u64,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

/// Explicit nulls read the same as absent fields.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PostSummary {
    /// Normalize a raw store document.
    ///
    /// Missing or null attributes take empty defaults and unknown
    /// categories read as absent. Only a missing or non-integer
    /// `createdAt` is an error.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let stored: StoredPost = serde_json::from_value(serde_json::Value::Object(
            doc.fields.clone(),
        ))
        .map_err(|source| FeedError::Malformed {
            id: doc.id.clone(),
            source,
        })?;

        let category = stored.category.and_then(|tag| match tag.parse::<Category>() {
            Ok(category) => Some(category),
            Err(e) => {
                tracing::debug!(id = %doc.id, error = %e, "ignoring category");
                None
            }
        });

        Ok(Self {
            id: doc.id.clone(),
            title: stored.title,
            category,
            created_at: stored.created_at,
            author_id: stored.author_id,
            author_email: stored.author_email,
            author_display_name: stored.author_display_name,
            view_count: stored.view_count,
            thumbnail_url: stored.thumbnail_url,
        })
    }
}

/// A new post, ready to be written to the store.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub category: Option<Category>,
    pub author_id: String,
    pub author_email: String,
    pub author_display_name: String,
    pub thumbnail_url: Option<String>,
}

impl PostDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Denormalized author attributes, captured as of this write.
    pub fn author(
        mut self,
        id: impl Into<String>,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.author_id = id.into();
        self.author_email = email.into();
        self.author_display_name = display_name.into();
        self
    }

    pub fn thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    /// Document write with a zero view count and a server-assigned
    /// creation time.
    pub fn to_write(&self) -> Result<DocumentWrite, StoreError> {
        let mut write = DocumentWrite::from_serializable(self)?;
        write
            .fields
            .insert(fields::VIEW_COUNT.to_string(), serde_json::Value::from(0u64));
        Ok(write.server_timestamp(fields::CREATED_AT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(id: &str, value: Value) -> Document {
        match value {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_from_document_full() {
        let d = doc(
            "p1",
            json!({
                "title": "Hello",
                "content": "ignored by listings",
                "category": "tech",
                "createdAt": 1_000,
                "authorId": "u1",
                "authorEmail": "u1@example.com",
                "authorDisplayName": "User One",
                "viewCount": 12,
                "thumbnailUrl": "https://example.com/t.png"
            }),
        );

        let post = PostSummary::from_document(&d).unwrap();
        assert_eq!(post.id.as_str(), "p1");
        assert_eq!(post.title, "Hello");
        assert_eq!(post.category, Some(Category::Tech));
        assert_eq!(post.created_at, Timestamp(1_000));
        assert_eq!(post.author_display_name, "User One");
        assert_eq!(post.view_count, 12);
        assert_eq!(post.thumbnail_url.as_deref(), Some("https://example.com/t.png"));
    }

    #[test]
    fn test_from_document_defaults() {
        let d = doc("p2", json!({ "createdAt": 5, "thumbnailUrl": null }));
        let post = PostSummary::from_document(&d).unwrap();
        assert_eq!(post.title, "");
        assert_eq!(post.category, None);
        assert_eq!(post.view_count, 0);
        assert_eq!(post.thumbnail_url, None);
    }

    #[test]
    fn test_null_attributes_read_as_empty() {
        let d = doc(
            "p5",
            json!({
                "title": null,
                "createdAt": 2,
                "authorId": null,
                "authorEmail": null,
                "authorDisplayName": null,
                "viewCount": null,
                "category": null
            }),
        );
        let post = PostSummary::from_document(&d).unwrap();
        assert_eq!(post.title, "");
        assert_eq!(post.author_email, "");
        assert_eq!(post.author_display_name, "");
        assert_eq!(post.view_count, 0);
        assert_eq!(post.category, None);
        assert_eq!(post.created_at, Timestamp(2));
    }

    #[test]
    fn test_unknown_category_reads_as_absent() {
        let d = doc("p3", json!({ "createdAt": 5, "category": "gardening" }));
        assert_eq!(PostSummary::from_document(&d).unwrap().category, None);
    }

    #[test]
    fn test_missing_created_at_is_malformed() {
        let d = doc("p4", json!({ "title": "no time" }));
        let err = PostSummary::from_document(&d).unwrap_err();
        assert!(matches!(err, FeedError::Malformed { ref id, .. } if id.as_str() == "p4"));
    }

    #[test]
    fn test_draft_to_write() {
        let write = PostDraft::new("Title")
            .content("Body")
            .category(Category::Life)
            .author("u1", "u1@example.com", "User One")
            .to_write()
            .unwrap();

        assert_eq!(write.fields.get(fields::TITLE), Some(&json!("Title")));
        assert_eq!(write.fields.get(fields::CATEGORY), Some(&json!("life")));
        assert_eq!(write.fields.get(fields::AUTHOR_ID), Some(&json!("u1")));
        assert_eq!(write.fields.get(fields::VIEW_COUNT), Some(&json!(0)));
        assert_eq!(write.server_timestamps, vec![fields::CREATED_AT.to_string()]);
    }
}
