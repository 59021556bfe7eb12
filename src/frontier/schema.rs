//! Database schema for the frontier
//!
//! Full URL strings are interned in `url_strings` so the main `urls`
//! table stays compact; the bookkeeping columns reference them by id.

/// SQL schema for the frontier database
pub const SCHEMA_SQL: &str = r#"
-- Interned URL strings
CREATE TABLE IF NOT EXISTS url_strings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    value TEXT NOT NULL UNIQUE
);

-- One row per discovered URL
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_key TEXT NOT NULL UNIQUE,
    url_id INTEGER NOT NULL REFERENCES url_strings(id),
    parent_id INTEGER REFERENCES url_strings(id),
    root_id INTEGER REFERENCES url_strings(id),
    status TEXT NOT NULL,
    try_count INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 0,
    inline_requisite INTEGER NOT NULL DEFAULT 0,
    link_type TEXT,
    post_data TEXT,
    referer_id INTEGER REFERENCES url_strings(id),
    status_code INTEGER,
    filename TEXT
);

CREATE INDEX IF NOT EXISTS idx_urls_status ON urls(status);
CREATE INDEX IF NOT EXISTS idx_urls_checkout ON urls(status, level, id);

-- Completed exchanges, for WARC revisit dedup across runs
CREATE TABLE IF NOT EXISTS visits (
    url_key TEXT NOT NULL,
    payload_digest TEXT NOT NULL,
    warc_record_id TEXT NOT NULL,
    target_uri TEXT NOT NULL,
    warc_date TEXT NOT NULL,
    PRIMARY KEY (url_key, payload_digest)
);

CREATE INDEX IF NOT EXISTS idx_visits_digest ON visits(payload_digest);
"#;

/// Initializes the frontier schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
