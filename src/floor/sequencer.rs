//! The write path for new holes and floors.
//!
//! Positions inside a hole come from two schemes kept side by side:
//!
//! * `storey`/`path`: the reading order. Storeys are dense `1..=N` per hole
//!   and follow a pre-order walk of the reply tree, so a reply lands right
//!   after the last floor in its parent's subtree and everything below it
//!   moves down by one. `path` holds the ancestor ids, `"/"` for top level.
//! * `ranking`: zero-based insertion index. Never changes once assigned.
//!   Only the prefetch loader reads it.
//!
//! Both are assigned while holding the hole's [`SequencingLock`].

use std::sync::Arc;

use rusqlite::{params, Transaction};

use super::{get_floor, validate_content, DEFAULT_MAX_CONTENT_LENGTH};
use crate::anonyname::{self, NamePool};
use crate::db::lock::{SequencingLock, SqliteWriteLock};
use crate::db::models::{Floor, FloorId, Hole, HoleId, UserId};
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::mention;
use crate::search::SearchQueue;
use crate::state::DbPool;

#[derive(Clone)]
pub struct FloorSequencer {
    db: DbPool,
    names: Arc<NamePool>,
    lock: Arc<dyn SequencingLock>,
    search: SearchQueue,
    max_content_length: usize,
}

struct Position {
    storey: i64,
    ranking: i64,
    path: String,
}

impl FloorSequencer {
    pub fn new(db: DbPool, names: Arc<NamePool>, search: SearchQueue) -> Self {
        Self {
            db,
            names,
            lock: Arc::new(SqliteWriteLock),
            search,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn SequencingLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    /// Open a new hole with `content` as its first floor.
    pub fn create_hole(&self, user_id: UserId, content: &str) -> AppResult<(Hole, Floor)> {
        validate_content(content, self.max_content_length)?;

        let mut conn = self.db.get()?;
        let tx = self.lock.begin(&mut conn)?;

        tx.execute("INSERT INTO hole (user_id) VALUES (?1)", params![user_id])?;
        let hole_id = tx.last_insert_rowid();
        if !self.lock.lock_hole(&tx, hole_id)? {
            return Err(AppError::Internal(format!("hole {} vanished", hole_id)));
        }

        let position = Position {
            storey: 1,
            ranking: 0,
            path: "/".to_string(),
        };
        let floor = self.insert_floor(&tx, hole_id, user_id, content, 0, position)?;
        let hole = super::get_hole(&tx, hole_id)?;
        tx.commit()?;

        tracing::info!(hole_id, floor_id = floor.id, "hole created");
        self.search.index_floor(&floor);
        Ok((hole, floor))
    }

    /// Append a floor to `hole_id`. `reply_to` is 0 for a top-level floor,
    /// otherwise the id of a floor in the same hole.
    pub fn create_floor(
        &self,
        hole_id: HoleId,
        user_id: UserId,
        content: &str,
        reply_to: FloorId,
    ) -> AppResult<Floor> {
        validate_content(content, self.max_content_length)?;

        let mut conn = self.db.get()?;
        let tx = self.lock.begin(&mut conn)?;
        if !self.lock.lock_hole(&tx, hole_id)? {
            return Err(AppError::not_found(format!("hole {}", hole_id)));
        }

        let position = next_position(&tx, hole_id, reply_to)?;
        let floor = self.insert_floor(&tx, hole_id, user_id, content, reply_to, position)?;
        tx.commit()?;

        tracing::debug!(
            hole_id,
            floor_id = floor.id,
            storey = floor.storey,
            reply_to,
            "floor created"
        );
        self.search.index_floor(&floor);
        Ok(floor)
    }

    fn insert_floor(
        &self,
        tx: &Transaction<'_>,
        hole_id: HoleId,
        user_id: UserId,
        content: &str,
        reply_to: FloorId,
        position: Position,
    ) -> AppResult<Floor> {
        let name = anonyname::find_or_generate(tx, &self.names, hole_id, user_id)?;
        let mentions = mention::resolve(tx, content)?;
        let now = now_timestamp();

        tx.execute(
            "INSERT INTO floor
                (hole_id, user_id, content, anonyname, storey, ranking, path, reply_to,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                hole_id,
                user_id,
                content,
                name,
                position.storey,
                position.ranking,
                position.path,
                reply_to,
                now
            ],
        )?;
        let floor_id = tx.last_insert_rowid();
        mention::store(tx, floor_id, &mentions)?;

        // reply tracks the ranking of the newest floor
        tx.execute(
            "UPDATE hole SET reply = ?2, updated_at = ?3 WHERE id = ?1",
            params![hole_id, position.ranking, now],
        )?;

        get_floor(tx, floor_id)
    }
}

fn next_position(tx: &Transaction<'_>, hole_id: HoleId, reply_to: FloorId) -> AppResult<Position> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM floor WHERE hole_id = ?1",
        params![hole_id],
        |row| row.get(0),
    )?;

    if reply_to == 0 {
        return Ok(Position {
            storey: count + 1,
            ranking: count,
            path: "/".to_string(),
        });
    }

    let parent = super::find_floor(tx, reply_to)?
        .filter(|parent| parent.hole_id == hole_id)
        .ok_or_else(|| {
            AppError::BadRequest(format!("floor {} is not in hole {}", reply_to, hole_id))
        })?;

    let child_path = parent.child_path();
    // last storey inside the parent's subtree
    let subtree_end: i64 = tx.query_row(
        "SELECT MAX(storey) FROM floor
         WHERE hole_id = ?1 AND (id = ?2 OR path LIKE ?3 || '%')",
        params![hole_id, parent.id, child_path],
        |row| row.get(0),
    )?;

    tx.execute(
        "UPDATE floor SET storey = storey + 1 WHERE hole_id = ?1 AND storey > ?2",
        params![hole_id, subtree_end],
    )?;

    Ok(Position {
        storey: subtree_end + 1,
        ranking: count,
        path: child_path,
    })
}
