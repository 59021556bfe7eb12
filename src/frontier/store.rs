//! SQLite frontier store
//!
//! Single-writer access to the frontier database. All mutation goes
//! through `&mut self` so one owner serializes writes; the engine keeps
//! the store inside its own task.

use crate::frontier::record::{LinkType, UrlRecord, UrlStatus};
use crate::frontier::schema::initialize_schema;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during frontier operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("URL not found: {0}")]
    UrlNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for frontier operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Fields that can change after a fetch completes
#[derive(Debug, Default, Clone)]
pub struct RecordUpdate {
    pub status: Option<UrlStatus>,
    pub try_count: Option<u32>,
    pub status_code: Option<u16>,
    pub filename: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: UrlStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// A completed exchange remembered for revisit dedup
#[derive(Debug, Clone)]
pub struct VisitRecord {
    pub warc_record_id: String,
    pub target_uri: String,
    pub warc_date: String,
}

/// SQLite-backed frontier
pub struct FrontierStore {
    conn: Connection,
}

const RECORD_COLUMNS: &str = "
    u.url_key, us.value, p.value, r.value, u.status, u.try_count, u.level,
    u.inline_requisite, u.link_type, u.post_data, rf.value, u.status_code, u.filename
";

const RECORD_JOINS: &str = "
    FROM urls u
    JOIN url_strings us ON us.id = u.url_id
    LEFT JOIN url_strings p ON p.id = u.parent_id
    LEFT JOIN url_strings r ON r.id = u.root_id
    LEFT JOIN url_strings rf ON rf.id = u.referer_id
";

impl FrontierStore {
    /// Opens (or creates) a frontier database at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory frontier (for tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Inserts records, skipping any whose `url_key` already exists
    ///
    /// The whole batch commits in one transaction.
    ///
    /// # Returns
    ///
    /// The number of records actually inserted.
    pub fn add_many(&mut self, records: &[UrlRecord]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        for rec in records {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM urls WHERE url_key = ?1",
                    params![rec.url_key],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                continue;
            }

            let url_id = intern(&tx, &rec.url)?;
            let parent_id = rec
                .parent_url
                .as_deref()
                .map(|u| intern(&tx, u))
                .transpose()?;
            let root_id = rec
                .root_url
                .as_deref()
                .map(|u| intern(&tx, u))
                .transpose()?;
            let referer_id = rec
                .referer
                .as_deref()
                .map(|u| intern(&tx, u))
                .transpose()?;

            tx.execute(
                "INSERT INTO urls
                 (url_key, url_id, parent_id, root_id, status, try_count, level,
                  inline_requisite, link_type, post_data, referer_id, status_code, filename)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    rec.url_key,
                    url_id,
                    parent_id,
                    root_id,
                    rec.status.to_db_string(),
                    rec.try_count,
                    rec.level,
                    rec.inline as i32,
                    rec.link_type.map(|t| t.to_db_string()),
                    rec.post_data,
                    referer_id,
                    rec.status_code,
                    rec.filename,
                ],
            )?;
            inserted += 1;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Checks out the next TODO record, marking it IN_PROGRESS
    ///
    /// Records come out in `(level, insertion order)` order so shallow
    /// URLs finish before deep ones and page requisites enqueued first
    /// stay first within a level.
    ///
    /// # Returns
    ///
    /// * `Some(UrlRecord)` - A record now owned by the caller
    /// * `None` - No TODO record remains
    pub fn check_out(&mut self) -> StoreResult<Option<UrlRecord>> {
        let tx = self.conn.transaction()?;

        let query = format!(
            "SELECT {RECORD_COLUMNS} {RECORD_JOINS}
             WHERE u.status = 'todo'
             ORDER BY u.level ASC, u.id ASC
             LIMIT 1"
        );

        let record = tx
            .query_row(&query, [], row_to_record)
            .optional()?;

        if let Some(ref rec) = record {
            tx.execute(
                "UPDATE urls SET status = 'in_progress' WHERE url_key = ?1",
                params![rec.url_key],
            )?;
        }

        tx.commit()?;

        Ok(record.map(|mut rec| {
            rec.status = UrlStatus::InProgress;
            rec
        }))
    }

    /// Applies an update to one record
    pub fn update(&mut self, url_key: &str, update: &RecordUpdate) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE urls SET
                status = COALESCE(?1, status),
                try_count = COALESCE(?2, try_count),
                status_code = COALESCE(?3, status_code),
                filename = COALESCE(?4, filename)
             WHERE url_key = ?5",
            params![
                update.status.map(|s| s.to_db_string()),
                update.try_count,
                update.status_code,
                update.filename,
                url_key,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::UrlNotFound(url_key.to_string()));
        }
        Ok(())
    }

    /// Flips every IN_PROGRESS record back to TODO
    ///
    /// Run at startup so work lost to a crash is retried, and at
    /// immediate-stop shutdown so nothing stays checked out.
    ///
    /// # Returns
    ///
    /// The number of records released.
    pub fn release_in_progress(&mut self) -> StoreResult<usize> {
        let changed = self.conn.execute(
            "UPDATE urls SET status = 'todo' WHERE status = 'in_progress'",
            [],
        )?;
        Ok(changed)
    }

    /// Fetches one record by key
    pub fn get(&self, url_key: &str) -> StoreResult<Option<UrlRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} {RECORD_JOINS} WHERE u.url_key = ?1");
        Ok(self
            .conn
            .query_row(&query, params![url_key], row_to_record)
            .optional()?)
    }

    /// Counts records per status
    pub fn count_by_status(&self) -> StoreResult<HashMap<UrlStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM urls GROUP BY status")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status_str, count) = row?;
            if let Some(status) = UrlStatus::from_db_string(&status_str) {
                counts.insert(status, count as u64);
            }
        }

        Ok(counts)
    }

    /// Counts records in one status
    pub fn count_with_status(&self, status: UrlStatus) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM urls WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Remembers a completed exchange for revisit dedup
    pub fn record_visit(
        &mut self,
        url_key: &str,
        payload_digest: &str,
        visit: &VisitRecord,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO visits
             (url_key, payload_digest, warc_record_id, target_uri, warc_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                url_key,
                payload_digest,
                visit.warc_record_id,
                visit.target_uri,
                visit.warc_date,
            ],
        )?;
        Ok(())
    }

    /// Looks up a previous exchange with the same payload digest
    ///
    /// The earliest matching record wins so every later duplicate
    /// points at the same original.
    pub fn find_visit_by_digest(&self, payload_digest: &str) -> StoreResult<Option<VisitRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT warc_record_id, target_uri, warc_date FROM visits
                 WHERE payload_digest = ?1
                 ORDER BY rowid ASC LIMIT 1",
                params![payload_digest],
                |row| {
                    Ok(VisitRecord {
                        warc_record_id: row.get(0)?,
                        target_uri: row.get(1)?,
                        warc_date: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }
}

/// Interns a URL string, returning its id
fn intern(conn: &Connection, value: &str) -> rusqlite::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM url_strings WHERE value = ?1",
            params![value],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO url_strings (value) VALUES (?1)",
        params![value],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        url_key: row.get(0)?,
        url: row.get(1)?,
        parent_url: row.get(2)?,
        root_url: row.get(3)?,
        status: UrlStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(UrlStatus::Error),
        try_count: row.get(5)?,
        level: row.get(6)?,
        inline: row.get::<_, i32>(7)? != 0,
        link_type: row
            .get::<_, Option<String>>(8)?
            .as_deref()
            .and_then(LinkType::from_db_string),
        post_data: row.get(9)?,
        referer: row.get(10)?,
        status_code: row.get(11)?,
        filename: row.get(12)?,
    })
}
