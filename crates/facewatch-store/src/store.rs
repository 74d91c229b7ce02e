//! [`PersonStore`]: people and their reference photos in a single SQLite file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension as _};
use serde::Serialize;

use crate::{
    schema::{SCHEMA, TIMESTAMP_FORMAT},
    Error, Result,
};

/// One enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub photo_path: PathBuf,
    /// Insertion time, UTC, second resolution.
    pub created_at: NaiveDateTime,
}

/// SQLite-backed person store. Share it behind an `Arc`; calls serialize on
/// the inner connection.
pub struct PersonStore {
    conn: Mutex<Connection>,
}

const SELECT_PEOPLE: &str = "SELECT id, name, photo_path, created_at FROM people";

impl PersonStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), people = store.count()?, "opened person store");
        Ok(store)
    }

    /// Open an in-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-call leaves no partial state behind in SQLite
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a person and return the generated id.
    pub fn add_person(&self, name: &str, photo_path: &Path) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO people (name, photo_path) VALUES (?1, ?2)",
            rusqlite::params![name, photo_path.to_string_lossy()],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, name, photo = %photo_path.display(), "inserted person");
        Ok(id)
    }

    /// Every person, newest first. Rows inserted within the same second are
    /// ordered by descending id.
    pub fn all_people(&self) -> Result<Vec<Person>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_PEOPLE} ORDER BY created_at DESC, id DESC"))?;
        let raw = stmt
            .query_map([], RawPerson::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawPerson::into_person).collect()
    }

    pub fn person(&self, id: i64) -> Result<Option<Person>> {
        let raw = self
            .conn()
            .query_row(
                &format!("{SELECT_PEOPLE} WHERE id = ?1"),
                rusqlite::params![id],
                RawPerson::from_row,
            )
            .optional()?;
        raw.map(RawPerson::into_person).transpose()
    }

    /// Delete a person and, if the row existed, their photo. Returns whether
    /// a row was found.
    ///
    /// A photo that is already gone is fine; any other removal failure is
    /// logged and does not fail the call.
    pub fn delete_person(&self, id: i64) -> Result<bool> {
        let photo: Option<String> = {
            let conn = self.conn();
            let photo = conn
                .query_row(
                    "SELECT photo_path FROM people WHERE id = ?1",
                    rusqlite::params![id],
                    |r| r.get(0),
                )
                .optional()?;
            if photo.is_some() {
                conn.execute("DELETE FROM people WHERE id = ?1", rusqlite::params![id])?;
            }
            photo
        };

        let Some(photo) = photo else {
            return Ok(false);
        };

        match std::fs::remove_file(&photo) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(id, photo = %photo, "photo already absent");
            }
            Err(e) => tracing::warn!(id, photo = %photo, error = %e, "failed to remove photo"),
        }

        tracing::info!(id, "deleted person");
        Ok(true)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM people", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

/// Row as SQLite hands it back, before timestamp parsing.
struct RawPerson {
    id: i64,
    name: String,
    photo_path: String,
    created_at: Option<String>,
}

impl RawPerson {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            photo_path: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_person(self) -> Result<Person> {
        let raw = self
            .created_at
            .ok_or_else(|| Error::DateParse(format!("person {} has no created_at", self.id)))?;
        let created_at = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map_err(|e| Error::DateParse(format!("{raw:?}: {e}")))?;
        Ok(Person {
            id: self.id,
            name: self.name,
            photo_path: PathBuf::from(self.photo_path),
            created_at,
        })
    }
}
