use std::collections::HashMap;

use rusqlite::{params_from_iter, types::Value as SqlValue};

use super::{SearchIndex, SearchQuery};
use crate::db::models::{Floor, FloorId};
use crate::db::placeholders;
use crate::error::AppResult;
use crate::state::DbPool;

const VISIBLE: &str = "deleted = 0 AND hole_id IN (SELECT id FROM hole WHERE hidden = 0)";

/// Index hits may be stale; a floor marked sensitive after indexing is still dropped.
const INDEXED_VISIBLE: &str =
    "deleted = 0 AND sensitive = 0 AND hole_id IN (SELECT id FROM hole WHERE hidden = 0)";

/// Search floors, preferring the index and falling back to the store.
pub async fn search_floors(
    db: &DbPool,
    index: Option<&dyn SearchIndex>,
    query: &SearchQuery,
) -> AppResult<Vec<Floor>> {
    if let Some(index) = index {
        match index.search(query).await {
            Ok(ids) => return load_hits(db, &ids),
            Err(e) => {
                tracing::warn!(error = %e, "search index unavailable, using database fallback");
            }
        }
    }
    like_search(db, query)
}

/// Re-read hits from the store, keeping the index's order.
fn load_hits(db: &DbPool, ids: &[FloorId]) -> AppResult<Vec<Floor>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = db.get()?;
    let sql = format!(
        "SELECT {} FROM floor WHERE id IN ({}) AND {}",
        Floor::COLUMNS,
        placeholders(1, ids.len()),
        INDEXED_VISIBLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut by_id: HashMap<FloorId, Floor> = stmt
        .query_map(params_from_iter(ids.iter()), Floor::from_row)?
        .map(|r| r.map(|f| (f.id, f)))
        .collect::<Result<_, _>>()?;

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

fn like_search(db: &DbPool, query: &SearchQuery) -> AppResult<Vec<Floor>> {
    let conn = db.get()?;

    let mut sql = format!(
        "SELECT {} FROM floor WHERE content LIKE ?1 ESCAPE '\\' AND {}",
        Floor::COLUMNS,
        VISIBLE
    );
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(format!(
        "%{}%",
        escape_like(&query.keyword)
    ))];
    if let Some(start) = &query.start_time {
        args.push(SqlValue::Text(start.clone()));
        sql.push_str(&format!(" AND updated_at >= ?{}", args.len()));
    }
    if let Some(end) = &query.end_time {
        args.push(SqlValue::Text(end.clone()));
        sql.push_str(&format!(" AND updated_at <= ?{}", args.len()));
    }
    args.push(SqlValue::Integer(query.size as i64));
    args.push(SqlValue::Integer(query.offset as i64));
    sql.push_str(&format!(
        " ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
        args.len() - 1,
        args.len()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let floors = stmt
        .query_map(params_from_iter(args.iter()), Floor::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(floors)
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
