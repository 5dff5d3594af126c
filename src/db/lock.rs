use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::db::models::HoleId;

/// Serializes writers that assign positions inside one hole.
///
/// Implementations decide how the lock is taken (row lock, advisory lock,
/// database write lock). Whatever the mechanism, two transactions that both
/// returned `Ok(true)` from [`SequencingLock::lock_hole`] for the same hole
/// must not overlap.
pub trait SequencingLock: Send + Sync {
    /// Open the transaction the lock will live in.
    fn begin<'c>(&self, conn: &'c mut Connection) -> rusqlite::Result<Transaction<'c>>;

    /// Take the lock for `hole_id`. Returns `false` when the hole does not exist.
    fn lock_hole(&self, tx: &Transaction<'_>, hole_id: HoleId) -> rusqlite::Result<bool>;
}

/// SQLite has no row locks: `BEGIN IMMEDIATE` takes the database write lock
/// up front, and touching the hole row proves it exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteWriteLock;

impl SequencingLock for SqliteWriteLock {
    fn begin<'c>(&self, conn: &'c mut Connection) -> rusqlite::Result<Transaction<'c>> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
    }

    fn lock_hole(&self, tx: &Transaction<'_>, hole_id: HoleId) -> rusqlite::Result<bool> {
        let touched = tx.execute(
            "UPDATE hole SET reply = reply WHERE id = ?1",
            params![hole_id],
        )?;
        Ok(touched == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[test]
    fn lock_reports_missing_hole() {
        let (pool, _tmp) = testing::temp_pool();
        let mut conn = pool.get().unwrap();
        let lock = SqliteWriteLock;
        let tx = lock.begin(&mut conn).unwrap();
        assert!(!lock.lock_hole(&tx, 42).unwrap());
    }

    #[test]
    fn lock_excludes_second_writer() {
        let (pool, _tmp) = testing::temp_pool();
        let hole_id = testing::insert_hole(&pool, 1);
        let lock = SqliteWriteLock;

        let mut first = pool.get().unwrap();
        let tx = lock.begin(&mut first).unwrap();
        assert!(lock.lock_hole(&tx, hole_id).unwrap());

        let mut second = pool.get().unwrap();
        second
            .busy_timeout(std::time::Duration::from_millis(50))
            .unwrap();
        assert!(lock.begin(&mut second).is_err());

        tx.commit().unwrap();
        assert!(lock.begin(&mut second).is_ok());
    }
}
