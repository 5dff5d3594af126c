use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub type HoleId = i64;
pub type FloorId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hole {
    pub id: HoleId,
    #[serde(skip_serializing)]
    pub user_id: UserId,
    /// Number of floors minus one; equals the ranking of the last floor.
    pub reply: i64,
    pub view: i64,
    pub hidden: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Filled in by the prefetch loader.
    #[serde(rename = "floors")]
    pub hole_floors: HoleFloors,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoleFloors {
    pub first_floor: Option<Floor>,
    pub last_floor: Option<Floor>,
    pub prefetch: Vec<Floor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Floor {
    pub id: FloorId,
    pub hole_id: HoleId,
    #[serde(skip_serializing)]
    pub user_id: UserId,
    pub content: String,
    pub anonyname: String,
    pub storey: i64,
    pub ranking: i64,
    pub path: String,
    pub reply_to: FloorId,
    /// likes minus dislikes
    pub score: i64,
    pub deleted: bool,
    pub sensitive: bool,
    pub fold: String,
    pub special_tag: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Hole {
    pub const COLUMNS: &'static str = "id, user_id, reply, view, hidden, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            reply: row.get(2)?,
            view: row.get(3)?,
            hidden: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            hole_floors: HoleFloors::default(),
        })
    }
}

impl Floor {
    pub const COLUMNS: &'static str = "id, hole_id, user_id, content, anonyname, storey, ranking, \
         path, reply_to, score, deleted, sensitive, fold, special_tag, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hole_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            anonyname: row.get(4)?,
            storey: row.get(5)?,
            ranking: row.get(6)?,
            path: row.get(7)?,
            reply_to: row.get(8)?,
            score: row.get(9)?,
            deleted: row.get(10)?,
            sensitive: row.get(11)?,
            fold: row.get(12)?,
            special_tag: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    /// Ancestor ids from the root down to the direct parent.
    pub fn ancestors(&self) -> Vec<FloorId> {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Prefix shared by the paths of every descendant of this floor.
    pub fn child_path(&self) -> String {
        format!("{}{}/", self.path, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorHistory {
    pub id: i64,
    pub floor_id: FloorId,
    pub content: String,
    pub reason: String,
    pub user_id: UserId,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor(id: FloorId, path: &str) -> Floor {
        Floor {
            id,
            hole_id: 1,
            user_id: 1,
            content: String::new(),
            anonyname: String::new(),
            storey: 1,
            ranking: 0,
            path: path.to_string(),
            reply_to: 0,
            score: 0,
            deleted: false,
            sensitive: false,
            fold: String::new(),
            special_tag: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn root_floor_has_no_ancestors() {
        assert!(floor(1, "/").ancestors().is_empty());
    }

    #[test]
    fn ancestors_follow_path_order() {
        assert_eq!(floor(9, "/1/4/").ancestors(), vec![1, 4]);
    }

    #[test]
    fn child_path_appends_own_id() {
        assert_eq!(floor(4, "/1/").child_path(), "/1/4/");
        assert_eq!(floor(1, "/").child_path(), "/1/");
    }
}
