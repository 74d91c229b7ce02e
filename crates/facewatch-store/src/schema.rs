//! SQL schema for the person store.
//!
//! Executed at every open; `PRAGMA user_version` records the layout version.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS people (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    photo_path  TEXT NOT NULL,
    created_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS people_created_idx ON people(created_at);

PRAGMA user_version = 1;
";

/// Format SQLite's `CURRENT_TIMESTAMP` writes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
