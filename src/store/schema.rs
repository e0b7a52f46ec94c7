//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{CrowdError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    match current_version {
        0 => {
            info!("Creating new database schema v{}", SCHEMA_VERSION);
            create_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)?;
        }
        SCHEMA_VERSION => info!("Database schema is up to date (v{})", current_version),
        v if v > SCHEMA_VERSION => {
            return Err(CrowdError::Storage(format!(
                "Database schema v{} is newer than supported v{}",
                v, SCHEMA_VERSION
            )));
        }
        v => return Err(CrowdError::Storage(format!("Unknown database schema v{}", v))),
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| CrowdError::Storage(format!("Failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| CrowdError::Storage(format!("Failed to read schema_version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| CrowdError::Storage(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| CrowdError::Storage(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(REPORTS_SCHEMA)
        .map_err(|e| CrowdError::Storage(format!("Failed to create report tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| CrowdError::Storage(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Reports, topics and votes
const REPORTS_SCHEMA: &str = r#"
-- Timestamps are fixed-width RFC 3339 UTC strings so text order is time order
CREATE TABLE IF NOT EXISTS crowd_reports (
    id TEXT PRIMARY KEY NOT NULL,
    author TEXT,
    text TEXT NOT NULL,

    -- Both NULL when the report has no location
    latitude REAL,
    longitude REAL,

    submitted TEXT NOT NULL,
    effective TEXT NOT NULL,
    updated TEXT NOT NULL,

    -- Moderation and crowd score
    reviewed INTEGER NOT NULL DEFAULT 0,
    upvote_count INTEGER NOT NULL DEFAULT 0,
    downvote_count INTEGER NOT NULL DEFAULT 0,
    score INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0,
    score_override INTEGER NOT NULL DEFAULT 0,

    -- Bumped by every commit; guards read-modify-write
    version INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS crowd_report_topics (
    report_id TEXT NOT NULL,
    topic_id TEXT NOT NULL,
    PRIMARY KEY (report_id, topic_id),
    FOREIGN KEY (report_id) REFERENCES crowd_reports(id) ON DELETE CASCADE
);

-- At most one vote per (report, voter)
CREATE TABLE IF NOT EXISTS crowd_votes (
    report_id TEXT NOT NULL,
    voter TEXT NOT NULL,
    vote_type TEXT NOT NULL,
    PRIMARY KEY (report_id, voter),
    FOREIGN KEY (report_id) REFERENCES crowd_reports(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_reports_author ON crowd_reports(author, effective);
CREATE INDEX IF NOT EXISTS idx_reports_effective ON crowd_reports(effective);
CREATE INDEX IF NOT EXISTS idx_reports_updated ON crowd_reports(updated);
CREATE INDEX IF NOT EXISTS idx_reports_location ON crowd_reports(latitude, longitude);

CREATE INDEX IF NOT EXISTS idx_report_topics_topic ON crowd_report_topics(topic_id);

CREATE INDEX IF NOT EXISTS idx_votes_voter ON crowd_votes(voter);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(init_schema(&conn).is_err());
    }

    #[test]
    fn test_unreadable_version_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_version (other TEXT)").unwrap();
        assert!(matches!(init_schema(&conn), Err(CrowdError::Storage(_))));

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_version (version TEXT); INSERT INTO schema_version VALUES ('one');",
        )
        .unwrap();
        assert!(matches!(init_schema(&conn), Err(CrowdError::Storage(_))));
    }

    #[test]
    fn test_rejects_unknown_older_version() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, -1).unwrap();
        assert!(init_schema(&conn).is_err());
    }
}
