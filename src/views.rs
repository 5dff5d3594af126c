//! Batched hole view counters.
//!
//! Readers push hole ids into an unbounded channel; one task owns the pending
//! counts and writes them out on a fixed interval, up to `FLUSH_CHUNK` holes
//! per statement.
//! Counts still pending when the process dies, or whose flush fails, are
//! lost.

use std::collections::HashMap;
use std::time::Duration;

use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::models::HoleId;
use crate::error::AppResult;
use crate::state::DbPool;

/// Holes per flush statement. Each hole binds two parameters and SQLite
/// allows at most 32766 per statement.
const FLUSH_CHUNK: usize = 16_000;

/// Producer handle. Cheap to clone; recording never blocks.
#[derive(Debug, Clone)]
pub struct ViewCounter {
    tx: mpsc::UnboundedSender<HoleId>,
}

impl ViewCounter {
    pub fn record(&self, hole_id: HoleId) {
        if self.tx.send(hole_id).is_err() {
            tracing::debug!(hole_id, "view batcher stopped, view dropped");
        }
    }
}

pub struct ViewCountBatcher;

impl ViewCountBatcher {
    /// Start the consumer task. It flushes every `interval` and once more
    /// after the last [`ViewCounter`] is dropped, then exits.
    pub fn spawn(db: DbPool, interval: Duration) -> (ViewCounter, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(db, rx, interval));
        (ViewCounter { tx }, handle)
    }
}

async fn run(db: DbPool, mut rx: mpsc::UnboundedReceiver<HoleId>, interval: Duration) {
    let mut pending: HashMap<HoleId, u64> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    tracing::info!("View batcher started with {}s interval", interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_in_background(&db, &mut pending).await;
            }
            received = rx.recv() => match received {
                Some(hole_id) => *pending.entry(hole_id).or_insert(0) += 1,
                None => break,
            },
        }
    }

    flush_in_background(&db, &mut pending).await;
    tracing::info!("View batcher stopped");
}

/// Hand the pending counts to the blocking pool; the map is empty afterwards.
async fn flush_in_background(db: &DbPool, pending: &mut HashMap<HoleId, u64>) {
    if pending.is_empty() {
        return;
    }
    let mut batch = std::mem::take(pending);
    let db = db.clone();
    match tokio::task::spawn_blocking(move || flush_views(&db, &mut batch)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "failed to flush hole views"),
        Err(e) => tracing::error!(error = %e, "view flush task failed"),
    }
}

/// Add every pending count to its hole and clear the map.
///
/// Holes are written `FLUSH_CHUNK` at a time, one `UPDATE ... CASE`
/// statement per chunk. A failed chunk is logged and its counts dropped;
/// the remaining chunks are still written and the first error is returned.
pub fn flush_views(db: &DbPool, pending: &mut HashMap<HoleId, u64>) -> AppResult<usize> {
    if pending.is_empty() {
        return Ok(0);
    }

    let entries: Vec<(HoleId, u64)> = pending.drain().collect();
    let conn = db.get()?;

    let mut updated = 0;
    let mut first_error = None;
    for chunk in entries.chunks(FLUSH_CHUNK) {
        match flush_chunk(&conn, chunk) {
            Ok(n) => updated += n,
            Err(e) => {
                let dropped: u64 = chunk.iter().map(|(_, count)| count).sum();
                tracing::warn!(
                    error = %e,
                    holes = chunk.len(),
                    views = dropped,
                    "dropping hole views after failed flush"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    tracing::debug!(holes = entries.len(), updated, "flushed hole views");
    match first_error {
        Some(e) => Err(e),
        None => Ok(updated),
    }
}

fn flush_chunk(conn: &Connection, chunk: &[(HoleId, u64)]) -> AppResult<usize> {
    let mut cases = String::new();
    let mut ids = String::new();
    let mut args: Vec<SqlValue> = Vec::with_capacity(chunk.len() * 2);
    for (hole_id, count) in chunk {
        args.push(SqlValue::Integer(*hole_id));
        let id_param = args.len();
        args.push(SqlValue::Integer(*count as i64));
        cases.push_str(&format!(" WHEN ?{} THEN ?{}", id_param, id_param + 1));
        if !ids.is_empty() {
            ids.push_str(", ");
        }
        ids.push_str(&format!("?{}", id_param));
    }

    let sql = format!(
        "UPDATE hole SET view = view + CASE id{} ELSE 0 END WHERE id IN ({})",
        cases, ids
    );
    Ok(conn.execute(&sql, params_from_iter(args.iter()))?)
}
