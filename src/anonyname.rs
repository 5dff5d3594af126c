//! Per-hole pseudonyms.
//!
//! Every user gets one stable name per hole, drawn from a fixed pool. The
//! allocation strategy depends on how much of the pool the hole already uses:
//! rejection sampling while usage is low, a single merge pass over the sorted
//! pool once collisions become likely, and suffixed names once the pool is
//! exhausted.

use std::path::Path;

use rand::Rng;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::db::models::{HoleId, UserId};
use crate::error::{AppError, AppResult};

const EMBEDDED_NAMES: &str = include_str!("../data/names.json");
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;

/// Sorted, de-duplicated list of candidate pseudonyms.
#[derive(Debug, Clone)]
pub struct NamePool {
    names: Vec<String>,
}

impl NamePool {
    pub fn new(names: Vec<String>) -> AppResult<Self> {
        let mut names = names;
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(AppError::BadRequest("name pool is empty".into()));
        }
        Ok(Self { names })
    }

    /// The pool shipped with the crate.
    pub fn embedded() -> AppResult<Self> {
        Self::new(serde_json::from_str(EMBEDDED_NAMES)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let names: Vec<String> = serde_json::from_str(&content)?;
        Ok(Self::new(names)?)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Pick a name not present in `used`.
    pub fn generate(&self, used: &[String]) -> String {
        self.generate_with(used, &mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, used: &[String], rng: &mut R) -> String {
        let mut used = used.to_vec();
        used.sort();
        used.dedup();

        let length = self.names.len();
        let taken = |name: &str| used.binary_search_by(|u| u.as_str().cmp(name)).is_ok();

        if used.len() < length >> 3 {
            loop {
                let name = &self.names[rng.gen_range(0..length)];
                if !taken(name) {
                    return name.clone();
                }
            }
        }

        if used.len() < length {
            let free = self.free_names(&used);
            // A used set may contain suffixed names that are not in the pool,
            // so the pool can be exhausted before `used.len()` reaches `length`.
            if !free.is_empty() {
                return free[rng.gen_range(0..free.len())].to_string();
            }
        }

        loop {
            let base = &self.names[rng.gen_range(0..length)];
            let name = format!("{}_{}", base, random_suffix(rng));
            if !taken(&name) {
                return name;
            }
        }
    }

    /// Pool minus `used`, in one merge pass. Both sides must be sorted.
    fn free_names<'a>(&'a self, used: &[String]) -> Vec<&'a str> {
        let mut free = Vec::with_capacity(self.names.len());
        let mut j = 0;
        for name in &self.names {
            while j < used.len() && used[j] < *name {
                j += 1;
            }
            if j < used.len() && used[j] == *name {
                j += 1;
            } else {
                free.push(name.as_str());
            }
        }
        free
    }
}

fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// The user's pseudonym in this hole, allocating one on first use.
///
/// Must run inside a transaction that already holds the hole's sequencing
/// lock, so two first posts by different users cannot pick the same name.
pub fn find_or_generate(
    tx: &Transaction<'_>,
    pool: &NamePool,
    hole_id: HoleId,
    user_id: UserId,
) -> AppResult<String> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT anonyname FROM anonyname_mapping WHERE hole_id = ?1 AND user_id = ?2",
            params![hole_id, user_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(name) = existing {
        return Ok(name);
    }

    let used: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT anonyname FROM anonyname_mapping WHERE hole_id = ?1 ORDER BY anonyname",
        )?;
        let rows = stmt.query_map(params![hole_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let name = pool.generate(&used);
    tx.execute(
        "INSERT INTO anonyname_mapping (hole_id, user_id, anonyname) VALUES (?1, ?2, ?3)",
        params![hole_id, user_id, name],
    )?;

    tracing::debug!(hole_id, user_id, anonyname = %name, "allocated anonyname");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::lock::{SequencingLock, SqliteWriteLock};
    use crate::db::testing;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn pool_of(n: usize) -> NamePool {
        NamePool::new((0..n).map(|i| format!("name{:03}", i)).collect()).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(NamePool::new(vec![]), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn embedded_pool_loads() {
        let pool = NamePool::embedded().unwrap();
        assert!(pool.len() >= 100);
    }

    #[test]
    fn low_usage_picks_from_pool() {
        let pool = pool_of(64);
        let mut rng = StdRng::seed_from_u64(7);
        let name = pool.generate_with(&["name000".to_string()], &mut rng);
        assert!(pool.names.contains(&name));
        assert_ne!(name, "name000");
    }

    #[test]
    fn merge_regime_never_collides() {
        let pool = pool_of(16);
        let mut rng = StdRng::seed_from_u64(11);
        // 15 of 16 used: only one valid answer
        let used: Vec<String> = (0..16)
            .filter(|i| *i != 9)
            .map(|i| format!("name{:03}", i))
            .collect();
        for _ in 0..20 {
            assert_eq!(pool.generate_with(&used, &mut rng), "name009");
        }
    }

    #[test]
    fn exhausted_pool_suffixes_names() {
        let pool = pool_of(8);
        let used: Vec<String> = pool.names.clone();
        let name = pool.generate(&used);
        let (base, suffix) = name.rsplit_once('_').unwrap();
        assert!(pool.names.iter().any(|n| n == base));
        assert_eq!(suffix.len(), SUFFIX_LEN);
    }

    #[test]
    fn suffixed_names_in_used_set_do_not_hide_exhaustion() {
        let pool = pool_of(8);
        // all 8 pool names taken plus nothing else, but given in random order
        let mut used: Vec<String> = pool.names.iter().rev().cloned().collect();
        used.push("name001_abcdef".to_string());
        let name = pool.generate(&used);
        assert!(!used.contains(&name));
    }

    #[test]
    fn allocation_fills_whole_pool_without_duplicates() {
        let pool = pool_of(40);
        let mut used = Vec::new();
        for _ in 0..60 {
            let name = pool.generate(&used);
            assert!(!used.contains(&name));
            used.push(name);
        }
        let unique: HashSet<_> = used.iter().collect();
        assert_eq!(unique.len(), 60);
    }

    #[test]
    fn find_or_generate_is_stable_per_user() {
        let (db, _tmp) = testing::temp_pool();
        let hole_id = testing::insert_hole(&db, 1);
        let names = pool_of(32);
        let lock = SqliteWriteLock;

        let mut conn = db.get().unwrap();
        let tx = lock.begin(&mut conn).unwrap();
        let first = find_or_generate(&tx, &names, hole_id, 1).unwrap();
        let again = find_or_generate(&tx, &names, hole_id, 1).unwrap();
        let other = find_or_generate(&tx, &names, hole_id, 2).unwrap();
        tx.commit().unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn rolled_back_allocation_leaves_no_mapping() {
        let (db, _tmp) = testing::temp_pool();
        let hole_id = testing::insert_hole(&db, 1);
        let names = pool_of(32);
        let lock = SqliteWriteLock;

        let mut conn = db.get().unwrap();
        {
            let tx = lock.begin(&mut conn).unwrap();
            find_or_generate(&tx, &names, hole_id, 5).unwrap();
            // dropped without commit
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM anonyname_mapping", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
