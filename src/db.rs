use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

/// Columns introduced after the first schema release. Each is added to
/// existing installations with `ALTER TABLE ... ADD COLUMN`.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("total_position_ms", "INTEGER"),
    ("total_duration_ms", "INTEGER"),
];

const SELECT_COLUMNS: &str = "id, book_id, title, authors, readers, cover, book_url, audio_url, \
     track_index, position_ms, duration_ms, total_position_ms, total_duration_ms, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("history storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Resume state for one book, as written by the playback side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryEntry {
    pub book_id: String,
    pub title: String,
    pub authors: String,
    pub readers: String,
    pub cover: String,
    pub book_url: String,
    pub audio_url: String,
    pub track_index: usize,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// `None` while the whole-book position cannot be estimated yet.
    pub total_position_ms: Option<u64>,
    pub total_duration_ms: Option<u64>,
}

/// A stored [`HistoryEntry`] plus its row id and write stamp (unix millis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: i64,
    pub entry: HistoryEntry,
    pub updated_at: i64,
}

impl HistoryRecord {
    /// Fraction of the current track already played.
    pub fn track_progress(&self) -> f64 {
        if self.entry.duration_ms == 0 {
            return 0.0;
        }
        (self.entry.position_ms as f64 / self.entry.duration_ms as f64).clamp(0.0, 1.0)
    }

    /// Fraction of the whole book already played, when the total is known.
    pub fn book_progress(&self) -> Option<f64> {
        let total = self.entry.total_duration_ms.filter(|total| *total > 0)?;
        let position = self.entry.total_position_ms?;
        Some((position as f64 / total as f64).clamp(0.0, 1.0))
    }
}

pub struct Database {
    conn: Connection,
    last_stamp: Cell<i64>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            last_stamp: Cell::new(0),
        }
    }

    /// Creates the history table when absent and applies additive column
    /// migrations. Safe to call any number of times.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL DEFAULT '',
                authors TEXT NOT NULL DEFAULT '',
                readers TEXT NOT NULL DEFAULT '',
                cover TEXT NOT NULL DEFAULT '',
                book_url TEXT NOT NULL DEFAULT '',
                audio_url TEXT NOT NULL DEFAULT '',
                track_index INTEGER NOT NULL DEFAULT 0,
                position_ms INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_history_updated_at ON history(updated_at DESC);
            "#,
        )?;
        for (column, decl) in ADDITIVE_COLUMNS {
            if self.add_column_if_absent("history", column, decl)? {
                debug!(column, "added history column");
            }
        }

        let latest: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(updated_at), 0) FROM history",
            [],
            |row| row.get(0),
        )?;
        self.last_stamp.set(self.last_stamp.get().max(latest));
        Ok(())
    }

    /// Returns `Ok(false)` when the column already existed.
    fn add_column_if_absent(&self, table: &str, column: &str, decl: &str) -> Result<bool, StoreError> {
        match self
            .conn
            .execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])
        {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(_, Some(message)))
                if message.contains("duplicate column name") =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Inserts or overwrites the row for `entry.book_id` and returns the
    /// stamp written to `updated_at`.
    pub fn upsert(&self, entry: &HistoryEntry) -> Result<i64, StoreError> {
        let stamp = self.next_stamp();
        self.conn.execute(
            r#"
            INSERT INTO history (
                book_id, title, authors, readers, cover, book_url, audio_url,
                track_index, position_ms, duration_ms, total_position_ms, total_duration_ms, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(book_id) DO UPDATE SET
                title = excluded.title,
                authors = excluded.authors,
                readers = excluded.readers,
                cover = excluded.cover,
                book_url = excluded.book_url,
                audio_url = excluded.audio_url,
                track_index = excluded.track_index,
                position_ms = excluded.position_ms,
                duration_ms = excluded.duration_ms,
                total_position_ms = excluded.total_position_ms,
                total_duration_ms = excluded.total_duration_ms,
                updated_at = excluded.updated_at
            "#,
            params![
                entry.book_id,
                entry.title,
                entry.authors,
                entry.readers,
                entry.cover,
                entry.book_url,
                entry.audio_url,
                to_sql_int(entry.track_index as u64),
                to_sql_int(entry.position_ms),
                to_sql_int(entry.duration_ms),
                entry.total_position_ms.map(to_sql_int),
                entry.total_duration_ms.map(to_sql_int),
                stamp,
            ],
        )?;
        Ok(stamp)
    }

    /// All records, most recently played first.
    pub fn list(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM history ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], record_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get(&self, book_id: &str) -> Result<Option<HistoryRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM history WHERE book_id = ?1"),
                params![book_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Removes the record for `book_id`. Returns whether a row was deleted;
    /// an absent key is not an error.
    pub fn delete(&self, book_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM history WHERE book_id = ?1", params![book_id])?;
        Ok(removed > 0)
    }

    /// Wall-clock millis, bumped past the previous stamp so every write is
    /// strictly newer than the one before it.
    fn next_stamp(&self) -> i64 {
        let stamp = Utc::now().timestamp_millis().max(self.last_stamp.get() + 1);
        self.last_stamp.set(stamp);
        stamp
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get(0)?,
        entry: HistoryEntry {
            book_id: row.get(1)?,
            title: row.get(2)?,
            authors: row.get(3)?,
            readers: row.get(4)?,
            cover: row.get(5)?,
            book_url: row.get(6)?,
            audio_url: row.get(7)?,
            track_index: from_sql_int(row.get(8)?) as usize,
            position_ms: from_sql_int(row.get(9)?),
            duration_ms: from_sql_int(row.get(10)?),
            total_position_ms: row.get::<_, Option<i64>>(11)?.map(from_sql_int),
            total_duration_ms: row.get::<_, Option<i64>>(12)?.map(from_sql_int),
        },
        updated_at: row.get(13)?,
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(book_id: &str, position_ms: u64) -> HistoryEntry {
        HistoryEntry {
            book_id: book_id.to_string(),
            title: format!("Book {book_id}"),
            authors: "Автор".to_string(),
            readers: "Чтец".to_string(),
            cover: String::new(),
            book_url: format!("https://site.test/book/{book_id}/"),
            audio_url: format!("https://site.test/audio/{book_id}/01.mp3"),
            track_index: 0,
            position_ms,
            duration_ms: 600_000,
            total_position_ms: Some(position_ms),
            total_duration_ms: Some(1_200_000),
        }
    }

    fn store() -> Database {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.initialize().expect("initialize schema");
        db
    }

    #[test]
    fn repeated_upsert_keeps_one_row_and_bumps_stamp() {
        let db = store();
        let payload = entry("42", 1_000);

        let first = db.upsert(&payload).expect("first upsert");
        let second = db.upsert(&payload).expect("second upsert");
        assert!(second > first, "stamp must strictly increase");

        let rows = db.list().expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry, payload);
        assert_eq!(rows[0].updated_at, second);
    }

    #[test]
    fn upsert_overwrites_every_field_but_id() {
        let db = store();
        db.upsert(&entry("42", 1_000)).expect("insert");
        let original_id = db.get("42").expect("get").expect("row exists").id;

        let mut changed = entry("42", 9_000);
        changed.title = "Renamed".to_string();
        changed.track_index = 3;
        changed.total_duration_ms = None;
        db.upsert(&changed).expect("update");

        let row = db.get("42").expect("get").expect("row exists");
        assert_eq!(row.id, original_id);
        assert_eq!(row.entry, changed);
    }

    #[test]
    fn list_orders_most_recent_first() {
        let db = store();
        db.upsert(&entry("a", 1)).expect("upsert a");
        db.upsert(&entry("b", 2)).expect("upsert b");

        let ids: Vec<String> = db
            .list()
            .expect("list")
            .into_iter()
            .map(|row| row.entry.book_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        db.upsert(&entry("a", 3)).expect("touch a");
        let ids: Vec<String> = db
            .list()
            .expect("list")
            .into_iter()
            .map(|row| row.entry.book_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_store_lists_nothing() {
        assert!(store().list().expect("list").is_empty());
    }

    #[test]
    fn delete_absent_key_is_a_noop() {
        let db = store();
        db.upsert(&entry("keep", 1)).expect("upsert");

        assert!(!db.delete("missing").expect("delete missing"));
        assert_eq!(db.list().expect("list").len(), 1);

        assert!(db.delete("keep").expect("delete existing"));
        assert!(db.list().expect("list").is_empty());
    }

    #[test]
    fn initialize_migrates_legacy_schema_without_losing_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("history.db");
        {
            let db = Database::open(&path).expect("open legacy");
            db.conn
                .execute_batch(
                    r#"
                    CREATE TABLE history (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        book_id TEXT NOT NULL UNIQUE,
                        title TEXT NOT NULL DEFAULT '',
                        authors TEXT NOT NULL DEFAULT '',
                        readers TEXT NOT NULL DEFAULT '',
                        cover TEXT NOT NULL DEFAULT '',
                        book_url TEXT NOT NULL DEFAULT '',
                        audio_url TEXT NOT NULL DEFAULT '',
                        track_index INTEGER NOT NULL DEFAULT 0,
                        position_ms INTEGER NOT NULL DEFAULT 0,
                        duration_ms INTEGER NOT NULL DEFAULT 0,
                        updated_at INTEGER NOT NULL DEFAULT 0
                    );
                    INSERT INTO history (book_id, title, position_ms, duration_ms, updated_at)
                    VALUES ('old', 'Old Book', 5000, 60000, 4102444800000);
                    "#,
                )
                .expect("seed legacy schema");
        }

        let db = Database::open(&path).expect("reopen");
        db.initialize().expect("first migration");
        db.initialize().expect("second migration is a no-op");

        let rows = db.list().expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.title, "Old Book");
        assert_eq!(rows[0].entry.position_ms, 5000);
        assert_eq!(rows[0].entry.total_position_ms, None);
        assert_eq!(rows[0].entry.total_duration_ms, None);

        let stamp = db.upsert(&entry("new", 1)).expect("upsert after migration");
        assert!(stamp > 4_102_444_800_000, "stamps stay ahead of stored rows");
    }

    #[test]
    fn add_column_surfaces_errors_other_than_duplicates() {
        let db = store();
        assert!(!db
            .add_column_if_absent("history", "total_duration_ms", "INTEGER")
            .expect("duplicate is absorbed"));
        let err = db
            .add_column_if_absent("no_such_table", "x", "INTEGER")
            .expect_err("missing table must fail");
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn progress_ratios_clamp_and_respect_unknown_totals() {
        let db = store();
        let mut payload = entry("r", 700_000);
        payload.total_position_ms = Some(300_000);
        payload.total_duration_ms = Some(1_200_000);
        db.upsert(&payload).expect("upsert");
        let row = db.get("r").expect("get").expect("exists");
        assert!((row.track_progress() - 1.0).abs() < 1e-9);
        assert!((row.book_progress().expect("known total") - 0.25).abs() < 1e-9);

        payload.total_duration_ms = None;
        db.upsert(&payload).expect("upsert unknown total");
        let row = db.get("r").expect("get").expect("exists");
        assert!(row.book_progress().is_none());
    }
}
