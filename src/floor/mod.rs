pub mod moderation;
pub mod prefetch;
pub mod reaction;
pub mod sequencer;

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Floor, FloorId, Hole, HoleId};
use crate::error::{AppError, AppResult};

pub use moderation::Moderation;
pub use prefetch::attach_prefetch;
pub use reaction::{reaction_summary, set_reaction, ReactionSummary};
pub use sequencer::FloorSequencer;

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;
pub const DEFAULT_PREFETCH_SIZE: usize = 10;

/// Content must be non-blank and at most `max_chars` characters.
pub fn validate_content(content: &str, max_chars: usize) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("content is empty".into()));
    }
    let chars = content.chars().count();
    if chars > max_chars {
        return Err(AppError::BadRequest(format!(
            "content is {} characters, limit is {}",
            chars, max_chars
        )));
    }
    Ok(())
}

pub fn find_floor(conn: &Connection, floor_id: FloorId) -> AppResult<Option<Floor>> {
    let floor = conn
        .query_row(
            &format!("SELECT {} FROM floor WHERE id = ?1", Floor::COLUMNS),
            params![floor_id],
            Floor::from_row,
        )
        .optional()?;
    Ok(floor)
}

pub fn get_floor(conn: &Connection, floor_id: FloorId) -> AppResult<Floor> {
    find_floor(conn, floor_id)?.ok_or_else(|| AppError::not_found(format!("floor {}", floor_id)))
}

pub fn get_hole(conn: &Connection, hole_id: HoleId) -> AppResult<Hole> {
    conn.query_row(
        &format!("SELECT {} FROM hole WHERE id = ?1", Hole::COLUMNS),
        params![hole_id],
        Hole::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found(format!("hole {}", hole_id)))
}

/// Every floor of a hole in reading order, deleted ones included.
pub fn list_floors(conn: &Connection, hole_id: HoleId) -> AppResult<Vec<Floor>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM floor WHERE hole_id = ?1 ORDER BY storey",
        Floor::COLUMNS
    ))?;
    let floors = stmt
        .query_map(params![hole_id], Floor::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(floors)
}

/// Visible holes, most recently active first.
pub fn list_holes(conn: &Connection, limit: usize) -> AppResult<Vec<Hole>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM hole WHERE hidden = 0 ORDER BY updated_at DESC, id DESC LIMIT ?1",
        Hole::COLUMNS
    ))?;
    let holes = stmt
        .query_map(params![limit as i64], Hole::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(holes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[test]
    fn blank_content_is_rejected() {
        assert!(matches!(validate_content("", 10), Err(AppError::BadRequest(_))));
        assert!(matches!(validate_content("  \n", 10), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn content_limit_counts_characters() {
        // four characters, twelve bytes
        assert!(validate_content("树洞树洞", 4).is_ok());
        assert!(matches!(validate_content("树洞树洞树", 4), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let (db, _tmp) = testing::temp_pool();
        let conn = db.get().unwrap();
        assert!(matches!(get_floor(&conn, 1), Err(AppError::NotFound(_))));
        assert!(matches!(get_hole(&conn, 1), Err(AppError::NotFound(_))));
        assert!(find_floor(&conn, 1).unwrap().is_none());
    }

    #[test]
    fn list_holes_skips_hidden() {
        let (db, _tmp) = testing::temp_pool();
        let visible = testing::insert_hole(&db, 1);
        let hidden = testing::insert_hole(&db, 1);
        let conn = db.get().unwrap();
        conn.execute("UPDATE hole SET hidden = 1 WHERE id = ?1", params![hidden])
            .unwrap();

        let holes = list_holes(&conn, 10).unwrap();
        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].id, visible);
    }
}
