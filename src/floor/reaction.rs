use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::models::{FloorId, UserId};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionSummary {
    pub like: i64,
    pub dislike: i64,
    /// -1, 0 or 1
    pub liked: i64,
}

/// Set `user_id`'s reaction on a floor and return the floor's new score.
///
/// `value` is 1 (like), -1 (dislike) or 0 (clear). Setting the same value
/// twice leaves the score unchanged.
pub fn set_reaction(db: &DbPool, floor_id: FloorId, user_id: UserId, value: i64) -> AppResult<i64> {
    if !(-1..=1).contains(&value) {
        return Err(AppError::BadRequest(format!(
            "reaction must be -1, 0 or 1, got {}",
            value
        )));
    }

    let mut conn = db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists = tx
        .query_row("SELECT 1 FROM floor WHERE id = ?1", params![floor_id], |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        return Err(AppError::not_found(format!("floor {}", floor_id)));
    }

    tx.execute(
        "DELETE FROM floor_like WHERE floor_id = ?1 AND user_id = ?2",
        params![floor_id, user_id],
    )?;
    if value != 0 {
        tx.execute(
            "INSERT INTO floor_like (floor_id, user_id, like_data) VALUES (?1, ?2, ?3)",
            params![floor_id, user_id, value],
        )?;
    }

    let score: i64 = tx.query_row(
        "SELECT COALESCE(SUM(like_data), 0) FROM floor_like WHERE floor_id = ?1",
        params![floor_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "UPDATE floor SET score = ?2 WHERE id = ?1",
        params![floor_id, score],
    )?;
    tx.commit()?;

    tracing::debug!(floor_id, user_id, value, score, "reaction set");
    Ok(score)
}

pub fn reaction_summary(
    conn: &Connection,
    floor_id: FloorId,
    user_id: UserId,
) -> AppResult<ReactionSummary> {
    let (like, dislike): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(like_data = 1), 0), COALESCE(SUM(like_data = -1), 0)
         FROM floor_like WHERE floor_id = ?1",
        params![floor_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let liked: Option<i64> = conn
        .query_row(
            "SELECT like_data FROM floor_like WHERE floor_id = ?1 AND user_id = ?2",
            params![floor_id, user_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(ReactionSummary {
        like,
        dislike,
        liked: liked.unwrap_or(0),
    })
}
