//! Query construction and evaluation.
//!
//! A [`Query`] names a collection and carries the constraints a document
//! store understands: equality filters, sort orders, a resume-after cursor
//! and a result bound. Stores that execute queries themselves (a hosted
//! backend) only read the constraints; [`Query::evaluate`] is the reference
//! semantics used by [`MemoryStore`](crate::store::MemoryStore).

use crate::error::StoreError;
use crate::types::{Document, DocumentId};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

/// Equality filter on a named field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// Sort constraint on a named field.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Opaque position in a sorted result: the document a scan resumes after.
///
/// Callers get cursors from a previous page and hand them back unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    document: Document,
}

impl Cursor {
    /// Wrap a store document handle.
    pub fn from_document(document: Document) -> Self {
        Self { document }
    }

    /// Id of the document this cursor points at.
    pub fn document_id(&self) -> &DocumentId {
        &self.document.id
    }

    pub(crate) fn document(&self) -> &Document {
        &self.document
    }
}

/// A query against one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<FieldFilter>,
    order: Vec<OrderBy>,
    start_after: Option<Cursor>,
    limit: Option<usize>,
}

impl Query {
    /// Start a query over all documents of a collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order: Vec::new(),
            start_after: None,
            limit: None,
        }
    }

    /// Keep only documents whose `field` equals `value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Add a sort key. Earlier keys take precedence.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Resume strictly after the cursor's position.
    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Bound the number of results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.start_after.as_ref()
    }

    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Reject constraint combinations no store can run.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.limit == Some(0) {
            return Err(StoreError::InvalidQuery(
                "limit must be at least 1".to_string(),
            ));
        }
        if self.collection.is_empty() {
            return Err(StoreError::InvalidQuery(
                "collection name is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a document passes every filter and carries every sort field.
    pub fn matches(&self, doc: &Document) -> bool {
        let filtered = self
            .filters
            .iter()
            .all(|f| doc.get(&f.field) == Some(&f.value));
        filtered && self.order.iter().all(|o| doc.get(&o.field).is_some())
    }

    /// Compare two documents in this query's sort order.
    ///
    /// Ties on every sort key fall back to the document id, in the direction
    /// of the last sort key.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.order {
            let ordering = compare_values(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );
            if ordering != Ordering::Equal {
                return key.direction.apply(ordering);
            }
        }
        let tie_break = self
            .order
            .last()
            .map(|o| o.direction)
            .unwrap_or(Direction::Ascending);
        tie_break.apply(a.id.cmp(&b.id))
    }

    /// Run the query over a set of documents.
    pub fn evaluate<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut matched: Vec<&Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        matched.sort_by(|a, b| self.compare(a, b));

        let start = match &self.start_after {
            // The cursor carries field values captured when it was issued, so
            // the position survives deletion of the document itself.
            Some(cursor) => matched
                .iter()
                .position(|d| self.compare(d, cursor.document()) == Ordering::Greater)
                .unwrap_or(matched.len()),
            None => 0,
        };

        let remaining = matched.into_iter().skip(start);
        match self.limit {
            Some(n) => remaining.take(n).cloned().collect(),
            None => remaining.cloned().collect(),
        }
    }
}

/// Rank of a JSON value type in cross-type ordering.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over field values: type rank first, then value.
/// Arrays and objects compare equal within their type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
