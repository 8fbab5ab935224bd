use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;
use vigil_core::{EnrolledIdentity, IdentityStore, NewIdentity, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    email       TEXT,
    department  TEXT,
    encoding    TEXT NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_active ON identities (active);";

const SELECT_COLUMNS: &str =
    "SELECT id, name, email, department, encoding, active, created_at, updated_at FROM identities";

/// Identity store backed by a SQLite file. Encodings are stored as JSON arrays.
pub struct SqliteIdentityStore {
    conn: Connection,
}

/// Columns as read, before the encoding and timestamps are parsed.
struct RawRow {
    id: String,
    name: String,
    email: Option<String>,
    department: Option<String>,
    encoding: String,
    active: bool,
    created_at: String,
    updated_at: String,
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl SqliteIdentityStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "identity database opened");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { conn })
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            department: row.get(3)?,
            encoding: row.get(4)?,
            active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_identity(raw: RawRow) -> Result<EnrolledIdentity, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: raw.id.clone(),
            reason,
        };
        let encoding: Vec<f32> =
            serde_json::from_str(&raw.encoding).map_err(|e| corrupt(format!("encoding: {e}")))?;
        let created_at = parse_timestamp(&raw.created_at).map_err(|e| corrupt(format!("created_at: {e}")))?;
        let updated_at = parse_timestamp(&raw.updated_at).map_err(|e| corrupt(format!("updated_at: {e}")))?;
        Ok(EnrolledIdentity {
            id: raw.id,
            name: raw.name,
            email: raw.email,
            department: raw.department,
            encoding,
            active: raw.active,
            created_at,
            updated_at,
        })
    }

    fn encode(encoding: &[f32]) -> Result<String, StoreError> {
        serde_json::to_string(encoding).map_err(|e| StoreError::Backend(format!("encode embedding: {e}")))
    }

    fn require(&self, id: &str) -> Result<EnrolledIdentity, StoreError> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

impl IdentityStore for SqliteIdentityStore {
    fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at, rowid"))
            .map_err(backend)?;
        let rows = stmt
            .query_map([], Self::read_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(Self::into_identity).collect()
    }

    fn active_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE active = 1 ORDER BY created_at, rowid"))
            .map_err(backend)?;
        let rows = stmt
            .query_map([], Self::read_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(Self::into_identity).collect()
    }

    fn get(&self, id: &str) -> Result<Option<EnrolledIdentity>, StoreError> {
        let raw = self
            .conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], Self::read_row)
            .optional()
            .map_err(backend)?;
        raw.map(Self::into_identity).transpose()
    }

    fn create(&mut self, identity: &NewIdentity, encoding: &[f32]) -> Result<EnrolledIdentity, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO identities (id, name, email, department, encoding, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    id,
                    identity.name,
                    identity.email,
                    identity.department,
                    Self::encode(encoding)?,
                    now
                ],
            )
            .map_err(backend)?;
        tracing::info!(id = %id, name = %identity.name, "identity created");
        self.require(&id)
    }

    fn set_encoding(&mut self, id: &str, encoding: &[f32]) -> Result<EnrolledIdentity, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE identities SET encoding = ?1, updated_at = ?2 WHERE id = ?3",
                params![Self::encode(encoding)?, Utc::now().to_rfc3339(), id],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    fn set_active(&mut self, id: &str, active: bool) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE identities SET active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active, Utc::now().to_rfc3339(), id],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> NewIdentity {
        NewIdentity {
            name: "Jane".into(),
            email: Some("jane@company.com".into()),
            department: Some("Security".into()),
        }
    }

    #[test]
    fn test_create_get_round_trip() {
        let mut store = SqliteIdentityStore::open_in_memory().unwrap();
        let created = store.create(&jane(), &[0.25, -0.5, 1.0]).unwrap();
        assert!(created.active);
        assert_eq!(created.encoding, vec![0.25, -0.5, 1.0]);

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Jane");
        assert_eq!(fetched.department.as_deref(), Some("Security"));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_encoding_overwrites() {
        let mut store = SqliteIdentityStore::open_in_memory().unwrap();
        let created = store.create(&jane(), &[0.1]).unwrap();
        let updated = store.set_encoding(&created.id, &[0.9, 0.9]).unwrap();
        assert_eq!(updated.encoding, vec![0.9, 0.9]);
        assert!(matches!(store.set_encoding("missing", &[0.0]), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_set_active_filters_matching_set() {
        let mut store = SqliteIdentityStore::open_in_memory().unwrap();
        let a = store.create(&NewIdentity::named("A"), &[0.0]).unwrap();
        store.create(&NewIdentity::named("B"), &[1.0]).unwrap();

        assert!(store.set_active(&a.id, false).unwrap());
        assert!(!store.set_active("missing", false).unwrap());
        assert_eq!(store.list().unwrap().len(), 2);
        let active = store.active_identities().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "B");
    }

    #[test]
    fn test_corrupt_encoding_reported() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let now = Utc::now().to_rfc3339();
        store
            .conn
            .execute(
                "INSERT INTO identities (id, name, encoding, active, created_at, updated_at)
                 VALUES ('x', 'X', 'not json', 1, ?1, ?1)",
                params![now],
            )
            .unwrap();
        assert!(matches!(store.get("x"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/identities.db");
        let id = {
            let mut store = SqliteIdentityStore::open(&path).unwrap();
            store.create(&jane(), &[0.5]).unwrap().id
        };
        let store = SqliteIdentityStore::open(&path).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().encoding, vec![0.5]);
    }
}
