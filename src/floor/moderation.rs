//! Edits that change a floor after it was posted.
//!
//! Content changes keep the previous text in `floor_history`. Floors are
//! never removed; deletion blanks the content in place.

use rusqlite::{params, Transaction};

use super::{get_floor, get_hole, list_floors, validate_content, DEFAULT_MAX_CONTENT_LENGTH};
use crate::db::models::{Floor, FloorHistory, FloorId, Hole, HoleId, UserId};
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::mention;
use crate::search::SearchQueue;
use crate::state::DbPool;

#[derive(Clone)]
pub struct Moderation {
    db: DbPool,
    search: SearchQueue,
    max_content_length: usize,
}

impl Moderation {
    pub fn new(db: DbPool, search: SearchQueue) -> Self {
        Self {
            db,
            search,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    pub fn modify_floor(&self, floor_id: FloorId, editor: UserId, content: &str) -> AppResult<Floor> {
        validate_content(content, self.max_content_length)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction()?;
        let old = get_floor(&tx, floor_id)?;
        if old.deleted {
            return Err(AppError::Conflict(format!("floor {} is deleted", floor_id)));
        }

        record_history(&tx, &old, "modify", editor)?;
        tx.execute(
            "UPDATE floor SET content = ?2, updated_at = ?3 WHERE id = ?1",
            params![floor_id, content, now_timestamp()],
        )?;
        let mentions = mention::resolve(&tx, content)?;
        mention::store(&tx, floor_id, &mentions)?;
        let floor = get_floor(&tx, floor_id)?;
        tx.commit()?;

        tracing::info!(floor_id, editor, "floor modified");
        self.search.index_floor(&floor);
        Ok(floor)
    }

    /// Soft delete. The content becomes `reason`; deleting twice is a no-op.
    pub fn delete_floor(&self, floor_id: FloorId, editor: UserId, reason: &str) -> AppResult<Floor> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction()?;
        let old = get_floor(&tx, floor_id)?;
        if old.deleted {
            return Ok(old);
        }

        record_history(&tx, &old, reason, editor)?;
        tx.execute(
            "UPDATE floor SET deleted = 1, content = ?2, updated_at = ?3 WHERE id = ?1",
            params![floor_id, reason, now_timestamp()],
        )?;
        let floor = get_floor(&tx, floor_id)?;
        tx.commit()?;

        tracing::info!(floor_id, editor, "floor deleted");
        self.search.delete_floor(floor_id);
        Ok(floor)
    }

    pub fn set_fold(&self, floor_id: FloorId, fold: &str) -> AppResult<Floor> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE floor SET fold = ?2 WHERE id = ?1",
            params![floor_id, fold],
        )?;
        if updated == 0 {
            return Err(AppError::not_found(format!("floor {}", floor_id)));
        }
        get_floor(&conn, floor_id)
    }

    pub fn set_special_tag(&self, floor_id: FloorId, tag: &str) -> AppResult<Floor> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE floor SET special_tag = ?2 WHERE id = ?1",
            params![floor_id, tag],
        )?;
        if updated == 0 {
            return Err(AppError::not_found(format!("floor {}", floor_id)));
        }
        get_floor(&conn, floor_id)
    }

    /// Sensitive floors are pulled from the index; clearing the flag puts
    /// them back.
    pub fn set_sensitive(&self, floor_id: FloorId, sensitive: bool) -> AppResult<Floor> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE floor SET sensitive = ?2 WHERE id = ?1",
            params![floor_id, sensitive],
        )?;
        if updated == 0 {
            return Err(AppError::not_found(format!("floor {}", floor_id)));
        }
        let floor = get_floor(&conn, floor_id)?;

        if sensitive {
            self.search.delete_floor(floor_id);
        } else {
            self.search.index_floor(&floor);
        }
        Ok(floor)
    }

    /// Hiding a hole removes all of its floors from the index.
    pub fn hide_hole(&self, hole_id: HoleId, hidden: bool) -> AppResult<Hole> {
        let conn = self.db.get()?;
        let updated = conn.execute(
            "UPDATE hole SET hidden = ?2 WHERE id = ?1",
            params![hole_id, hidden],
        )?;
        if updated == 0 {
            return Err(AppError::not_found(format!("hole {}", hole_id)));
        }
        let floors = list_floors(&conn, hole_id)?;
        let hole = get_hole(&conn, hole_id)?;

        if hidden {
            self.search.bulk_delete(floors.iter().map(|f| f.id).collect());
        } else {
            self.search.bulk_index(&floors);
        }
        tracing::info!(hole_id, hidden, floors = floors.len(), "hole visibility changed");
        Ok(hole)
    }

    /// Earlier versions of a floor, oldest first.
    pub fn floor_history(&self, floor_id: FloorId) -> AppResult<Vec<FloorHistory>> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, floor_id, content, reason, user_id, created_at
             FROM floor_history WHERE floor_id = ?1 ORDER BY id",
        )?;
        let history = stmt
            .query_map(params![floor_id], |row| {
                Ok(FloorHistory {
                    id: row.get(0)?,
                    floor_id: row.get(1)?,
                    content: row.get(2)?,
                    reason: row.get(3)?,
                    user_id: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }
}

fn record_history(tx: &Transaction<'_>, old: &Floor, reason: &str, editor: UserId) -> AppResult<()> {
    tx.execute(
        "INSERT INTO floor_history (floor_id, content, reason, user_id) VALUES (?1, ?2, ?3, ?4)",
        params![old.id, old.content, reason, editor],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonyname::NamePool;
    use crate::db::testing;
    use crate::floor::FloorSequencer;
    use crate::search::IndexTask;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        seq: FloorSequencer,
        moderation: Moderation,
        rx: UnboundedReceiver<IndexTask>,
        db: DbPool,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (db, tmp) = testing::temp_pool();
        let (queue, mut lanes) = SearchQueue::channel(1);
        let rx = lanes.remove(0);
        let names = Arc::new(NamePool::embedded().unwrap());
        Fixture {
            seq: FloorSequencer::new(db.clone(), names, queue.clone()),
            moderation: Moderation::new(db.clone(), queue),
            rx,
            db,
            _tmp: tmp,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<IndexTask>) -> Vec<IndexTask> {
        let mut tasks = Vec::new();
        while let Ok(task) = rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }

    #[test]
    fn modify_keeps_history_and_reindexes() {
        let mut fx = fixture();
        let (_, floor) = fx.seq.create_hole(1, "first draft").unwrap();
        drain(&mut fx.rx);

        let edited = fx.moderation.modify_floor(floor.id, 1, "second draft").unwrap();
        assert_eq!(edited.content, "second draft");

        let history = fx.moderation.floor_history(floor.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "first draft");
        assert_eq!(history[0].reason, "modify");

        match drain(&mut fx.rx).as_slice() {
            [IndexTask::Index(doc)] => assert_eq!(doc.content, "second draft"),
            other => panic!("unexpected tasks {:?}", other),
        }
    }

    #[test]
    fn modify_reresolves_mentions() {
        let fx = fixture();
        let (_, a) = fx.seq.create_hole(1, "a").unwrap();
        let (_, b) = fx.seq.create_hole(1, "b").unwrap();
        let (_, floor) = fx.seq.create_hole(1, &format!("see ##{}", a.id)).unwrap();

        fx.moderation
            .modify_floor(floor.id, 1, &format!("see ##{} instead", b.id))
            .unwrap();
        let conn = fx.db.get().unwrap();
        assert_eq!(mention::floor_mentions(&conn, floor.id).unwrap(), vec![b.id]);
    }

    #[test]
    fn delete_replaces_content_and_unindexes() {
        let mut fx = fixture();
        let (_, floor) = fx.seq.create_hole(1, "regrettable").unwrap();
        drain(&mut fx.rx);

        let deleted = fx.moderation.delete_floor(floor.id, 2, "removed by author").unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.content, "removed by author");
        assert_eq!(deleted.storey, floor.storey);

        let again = fx.moderation.delete_floor(floor.id, 2, "twice").unwrap();
        assert_eq!(again.content, "removed by author");
        assert_eq!(fx.moderation.floor_history(floor.id).unwrap().len(), 1);

        assert_eq!(drain(&mut fx.rx), vec![IndexTask::Delete(floor.id)]);
    }

    #[test]
    fn deleted_floor_cannot_be_modified() {
        let fx = fixture();
        let (_, floor) = fx.seq.create_hole(1, "x").unwrap();
        fx.moderation.delete_floor(floor.id, 1, "gone").unwrap();
        assert!(matches!(
            fx.moderation.modify_floor(floor.id, 1, "back"),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn sensitive_toggle_moves_floor_in_and_out_of_index() {
        let mut fx = fixture();
        let (_, floor) = fx.seq.create_hole(1, "borderline").unwrap();
        drain(&mut fx.rx);

        let flagged = fx.moderation.set_sensitive(floor.id, true).unwrap();
        assert!(flagged.sensitive);
        assert_eq!(drain(&mut fx.rx), vec![IndexTask::Delete(floor.id)]);

        // editing a sensitive floor does not leak it back into the index
        fx.moderation.modify_floor(floor.id, 1, "still borderline").unwrap();
        assert!(drain(&mut fx.rx).is_empty());

        fx.moderation.set_sensitive(floor.id, false).unwrap();
        match drain(&mut fx.rx).as_slice() {
            [IndexTask::Index(doc)] => assert_eq!(doc.id, floor.id),
            other => panic!("unexpected tasks {:?}", other),
        }
    }

    #[test]
    fn hide_hole_bulk_deletes_its_floors() {
        let mut fx = fixture();
        let (hole, first) = fx.seq.create_hole(1, "op").unwrap();
        let second = fx.seq.create_floor(hole.id, 2, "reply", 0).unwrap();
        drain(&mut fx.rx);

        let hidden = fx.moderation.hide_hole(hole.id, true).unwrap();
        assert!(hidden.hidden);
        assert_eq!(
            drain(&mut fx.rx),
            vec![IndexTask::BulkDelete(vec![first.id, second.id])]
        );

        fx.moderation.hide_hole(hole.id, false).unwrap();
        match drain(&mut fx.rx).as_slice() {
            [IndexTask::BulkIndex(docs)] => assert_eq!(docs.len(), 2),
            other => panic!("unexpected tasks {:?}", other),
        }
    }

    #[test]
    fn fold_and_tag_are_set() {
        let fx = fixture();
        let (_, floor) = fx.seq.create_hole(1, "x").unwrap();
        assert_eq!(fx.moderation.set_fold(floor.id, "spoiler").unwrap().fold, "spoiler");
        assert_eq!(
            fx.moderation.set_special_tag(floor.id, "op").unwrap().special_tag,
            "op"
        );
        assert!(matches!(
            fx.moderation.set_fold(9999, "x"),
            Err(AppError::NotFound(_))
        ));
    }
}
