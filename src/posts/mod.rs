//! Post listings: the read model and the repository that serves it.

pub mod model;
mod repository;

pub use model::{fields, PostDraft, PostSummary};
pub use repository::{ListenOptions, Page, PageOptions, Pages, PostRepository};
