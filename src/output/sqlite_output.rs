//! SQLite export of the persisted crawl
//!
//! Records and completed coordinates are copied into a SQLite database for
//! downstream querying. The JSON document stays the source of truth; an export
//! replaces whatever the database held before.

use crate::output::OutputResult;
use crate::state::CrawlState;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;

/// SQL schema for the export database
pub const EXPORT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    identity TEXT PRIMARY KEY,
    detail_ref TEXT NOT NULL,
    display_name TEXT NOT NULL,
    category TEXT NOT NULL,
    attribution_name TEXT NOT NULL,
    composite_description TEXT NOT NULL,
    partition TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_partition ON records(partition, page_index);
CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);

CREATE TABLE IF NOT EXISTS completed_coordinates (
    partition TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    PRIMARY KEY (partition, page_index)
);

CREATE TABLE IF NOT EXISTS exports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exported_at TEXT NOT NULL,
    config_hash TEXT,
    total_records INTEGER NOT NULL
);
"#;

/// What one export wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub records: usize,
    pub coordinates: usize,
}

/// SQLite export target
pub struct SqliteExporter {
    conn: Connection,
}

impl SqliteExporter {
    /// Opens or creates the export database at `path`
    pub fn new(path: &Path) -> OutputResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.execute_batch(EXPORT_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(EXPORT_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Replaces the database contents with `state` in one transaction
    pub fn export(&mut self, state: &CrawlState, config_hash: Option<&str>) -> OutputResult<ExportSummary> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        tx.execute("DELETE FROM completed_coordinates", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO records (identity, detail_ref, display_name, category, \
                 attribution_name, composite_description, partition, page_index, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for record in &state.records {
                insert.execute(params![
                    record.identity,
                    record.detail_ref,
                    record.display_name,
                    record.category,
                    record.attribution_name,
                    record.composite_description,
                    record.partition,
                    record.page_index,
                    record.fetched_at.map(|t| t.to_rfc3339()),
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO completed_coordinates (partition, page_index) VALUES (?1, ?2)",
            )?;
            for coordinate in &state.completed {
                insert.execute(params![coordinate.partition, coordinate.page])?;
            }
        }

        tx.execute(
            "INSERT INTO exports (exported_at, config_hash, total_records) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), config_hash, state.records.len() as i64],
        )?;
        tx.commit()?;

        Ok(ExportSummary {
            records: state.records.len(),
            coordinates: state.completed.len(),
        })
    }

    pub fn count_records(&self) -> OutputResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_coordinates(&self) -> OutputResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM completed_coordinates", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Record counts per category, largest first
    pub fn category_counts(&self) -> OutputResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) AS n FROM records GROUP BY category ORDER BY n DESC, category",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}
