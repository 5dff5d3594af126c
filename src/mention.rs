//! Cross references inside floor content.
//!
//! `#123` points at hole 123 and resolves to its first floor; `##456` points
//! at floor 456 directly. A token only counts when the character before it is
//! not `#`, so `###7` references nothing.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, params_from_iter, Connection};

use crate::db::models::{FloorId, HoleId};
use crate::db::placeholders;
use crate::error::AppResult;

fn hole_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^#]#(\d+)").expect("valid hole mention regex"))
}

fn floor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^#]##(\d+)").expect("valid floor mention regex"))
}

/// Raw ids found in a piece of content, before resolution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MentionTokens {
    pub holes: Vec<HoleId>,
    pub floors: Vec<FloorId>,
}

impl MentionTokens {
    pub fn is_empty(&self) -> bool {
        self.holes.is_empty() && self.floors.is_empty()
    }
}

pub fn parse(content: &str) -> MentionTokens {
    // leading space lets a token at the very start match the guard character
    let guarded = format!(" {}", content);
    MentionTokens {
        holes: capture_ids(hole_re(), &guarded),
        floors: capture_ids(floor_re(), &guarded),
    }
}

fn capture_ids(re: &Regex, text: &str) -> Vec<i64> {
    let mut seen = HashSet::new();
    re.captures_iter(text)
        // digits too long for i64 cannot name a row
        .filter_map(|caps| caps[1].parse::<i64>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Resolve every mention in `content` to a floor id.
///
/// Hole references become the hole's first floor. Deleted or missing targets
/// are dropped. The result has no duplicates; hole references come first.
pub fn resolve(conn: &Connection, content: &str) -> AppResult<Vec<FloorId>> {
    let tokens = parse(content);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut resolved = Vec::new();

    if !tokens.holes.is_empty() {
        let sql = format!(
            "SELECT id FROM floor
             WHERE hole_id IN ({}) AND storey = 1 AND deleted = 0
             ORDER BY hole_id",
            placeholders(1, tokens.holes.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(tokens.holes.iter()), |row| row.get(0))?;
        for id in rows {
            resolved.push(id?);
        }
    }

    if !tokens.floors.is_empty() {
        let sql = format!(
            "SELECT id FROM floor WHERE id IN ({}) AND deleted = 0 ORDER BY id",
            placeholders(1, tokens.floors.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(tokens.floors.iter()), |row| row.get(0))?;
        for id in rows {
            let id: FloorId = id?;
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }

    Ok(resolved)
}

/// Replace the stored mentions of `floor_id` with `mention_ids`.
pub fn store(conn: &Connection, floor_id: FloorId, mention_ids: &[FloorId]) -> AppResult<()> {
    conn.execute(
        "DELETE FROM floor_mention WHERE floor_id = ?1",
        params![floor_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO floor_mention (floor_id, mention_id) VALUES (?1, ?2)",
    )?;
    for mention_id in mention_ids {
        stmt.execute(params![floor_id, mention_id])?;
    }
    Ok(())
}

/// Mention ids stored for a floor.
pub fn floor_mentions(conn: &Connection, floor_id: FloorId) -> AppResult<Vec<FloorId>> {
    let mut stmt = conn.prepare(
        "SELECT mention_id FROM floor_mention WHERE floor_id = ?1 ORDER BY mention_id",
    )?;
    let rows = stmt.query_map(params![floor_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
