use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::anonyname::NamePool;
use crate::config::Config;
use crate::floor::{FloorSequencer, Moderation};
use crate::search::{SearchIndex, SearchQueue};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub sequencer: FloorSequencer,
    pub moderation: Moderation,
    pub search: SearchQueue,
    /// Read side of the index; `None` when search is not configured.
    pub index: Option<Arc<dyn SearchIndex>>,
}

impl AppState {
    pub fn new(
        db: DbPool,
        config: Config,
        names: Arc<NamePool>,
        search: SearchQueue,
        index: Option<Arc<dyn SearchIndex>>,
    ) -> Self {
        let max_len = config.floors.max_content_length;
        Self {
            sequencer: FloorSequencer::new(db.clone(), names, search.clone())
                .with_max_content_length(max_len),
            moderation: Moderation::new(db.clone(), search.clone()).with_max_content_length(max_len),
            db,
            config,
            search,
            index,
        }
    }
}
