//! Full-text search over floors.
//!
//! The relational store is the source of truth. An external index, when
//! configured, is kept eventually consistent through [`SearchQueue`] and is
//! consulted first at read time; the store answers on its own when the index
//! is absent or failing.

pub mod elastic;
pub mod fallback;
pub mod queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::{Floor, FloorId};
use crate::error::AppResult;

pub use elastic::ElasticIndex;
pub use fallback::search_floors;
pub use queue::{spawn_workers, IndexTask, SearchQueue};

/// What the index stores for one floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorDocument {
    pub id: FloorId,
    pub updated_at: String,
    pub content: String,
}

impl From<&Floor> for FloorDocument {
    fn from(floor: &Floor) -> Self {
        Self {
            id: floor.id,
            updated_at: floor.updated_at.clone(),
            content: floor.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keyword: String,
    pub offset: usize,
    pub size: usize,
    /// Phrase match instead of token match.
    pub accurate: bool,
    /// Inclusive `updated_at` bounds, RFC 3339.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            offset: 0,
            size: 10,
            accurate: false,
            start_time: None,
            end_time: None,
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, doc: &FloorDocument) -> AppResult<()>;

    async fn delete(&self, id: FloorId) -> AppResult<()>;

    async fn bulk_index(&self, docs: &[FloorDocument]) -> AppResult<()>;

    async fn bulk_delete(&self, ids: &[FloorId]) -> AppResult<()>;

    /// Matching floor ids, best match first.
    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<FloorId>>;
}
