use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};

use crate::db::models::{Floor, Hole, HoleFloors};
use crate::db::placeholders;
use crate::error::AppResult;

/// Fill `hole_floors` for every hole with one query.
///
/// Each hole gets its first `k` non-deleted floors by ranking, its first
/// floor and its last floor (`ranking = reply`, fetched even when it lies
/// beyond the first `k`). Holes with no visible floors get empty values.
pub fn attach_prefetch(conn: &Connection, holes: &mut [Hole], k: usize) -> AppResult<()> {
    for hole in holes.iter_mut() {
        hole.hole_floors = HoleFloors::default();
    }
    if holes.is_empty() {
        return Ok(());
    }

    let ids = placeholders(1, holes.len());
    let limit_param = holes.len() + 1;
    let sql = format!(
        "SELECT {cols} FROM floor
         WHERE hole_id IN ({ids}) AND ranking < ?{limit_param} AND deleted = 0
         UNION
         SELECT {cols} FROM floor
         WHERE (hole_id, ranking) IN (SELECT id, reply FROM hole WHERE id IN ({ids}))
           AND deleted = 0
         ORDER BY hole_id, ranking",
        cols = Floor::COLUMNS,
    );

    let mut args: Vec<SqlValue> = holes.iter().map(|h| SqlValue::Integer(h.id)).collect();
    args.push(SqlValue::Integer(k as i64));

    let mut stmt = conn.prepare(&sql)?;
    let floors = stmt
        .query_map(params_from_iter(args.iter()), Floor::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    // floors arrive grouped by hole; split into runs and bind each run
    let mut start = 0;
    while start < floors.len() {
        let hole_id = floors[start].hole_id;
        let mut end = start + 1;
        while end < floors.len() && floors[end].hole_id == hole_id {
            end += 1;
        }
        if let Some(hole) = holes.iter_mut().find(|h| h.id == hole_id) {
            hole.hole_floors = split_run(&floors[start..end], k);
        }
        start = end;
    }

    Ok(())
}

fn split_run(run: &[Floor], k: usize) -> HoleFloors {
    HoleFloors {
        first_floor: run.first().cloned(),
        last_floor: run.last().cloned(),
        prefetch: run
            .iter()
            .filter(|f| f.ranking < k as i64)
            .take(k)
            .cloned()
            .collect(),
    }
}
