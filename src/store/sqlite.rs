//! SQLite report store
//!
//! ## Tables
//!
//! - `crowd_reports` - one row per report, with a `version` column bumped by
//!   every commit
//! - `crowd_report_topics` - topic membership index
//! - `crowd_votes` - one row per (report, voter)
//!
//! A commit writes the report row and the vote row in one transaction and
//! only if `version` still matches what the caller read.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{schema, CommitOutcome, LocationHint, ReportStore, ScanHint, StoredReport, UnitOfWork};
use crate::error::{CrowdError, Result};
use crate::geo::GeoPoint;
use crate::model::{CrowdReport, VoteType};

/// Longest `IN (...)` list bound in one statement, well under SQLite's
/// host parameter limit
const MAX_IN_LIST: usize = 500;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn db_err(what: &'static str) -> impl FnOnce(rusqlite::Error) -> CrowdError {
    move |e| CrowdError::Storage(format!("{}: {}", what, e))
}

/// Fixed-width UTC timestamp so that text comparison matches time order
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_column(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            let idx = row.as_ref().column_index(name).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

fn vote_column(row: &Row, idx: usize) -> rusqlite::Result<VoteType> {
    let raw: String = row.get(idx)?;
    raw.parse::<VoteType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Report row without topics (loaded separately) and its version
fn report_from_row(row: &Row) -> rusqlite::Result<(CrowdReport, u64)> {
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let version: i64 = row.get("version")?;

    let report = CrowdReport {
        id: row.get("id")?,
        author: row.get("author")?,
        text: row.get("text")?,
        location: latitude.zip(longitude).map(|(lat, lng)| GeoPoint { lat, lng }),
        topic_ids: BTreeSet::new(),
        submitted: ts_column(row, "submitted")?,
        effective: ts_column(row, "effective")?,
        updated: ts_column(row, "updated")?,
        reviewed: row.get("reviewed")?,
        upvote_count: row.get("upvote_count")?,
        downvote_count: row.get("downvote_count")?,
        score: row.get("score")?,
        hidden: row.get("hidden")?,
        score_override: row.get("score_override")?,
    };
    Ok((report, version as u64))
}

fn get_report_topics(conn: &Connection, report_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare_cached("SELECT topic_id FROM crowd_report_topics WHERE report_id = ?")
        .map_err(db_err("Prepare failed"))?;

    let topics = stmt
        .query_map(params![report_id], |row| row.get(0))
        .map_err(db_err("Query failed"))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()
        .map_err(db_err("Row parse failed"))?;

    Ok(topics)
}

/// Fill `topic_ids` for every report, one query per `MAX_IN_LIST` ids
fn load_topics(conn: &Connection, reports: &mut BTreeMap<String, CrowdReport>) -> Result<()> {
    let ids: Vec<String> = reports.keys().cloned().collect();

    for chunk in ids.chunks(MAX_IN_LIST) {
        let sql = format!(
            "SELECT report_id, topic_id FROM crowd_report_topics WHERE report_id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(db_err("Prepare failed"))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(chunk), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err("Query failed"))?;

        for row in rows {
            let (report_id, topic_id) = row.map_err(db_err("Row parse failed"))?;
            if let Some(report) = reports.get_mut(&report_id) {
                report.topic_ids.insert(topic_id);
            }
        }
    }

    Ok(())
}

/// SQLite database for reports and votes
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open or create the report database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path).map_err(db_err("Failed to open SQLite"))?;

        // WAL for concurrent readers from other processes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err("Failed to set PRAGMA"))?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open in-memory SQLite"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(db_err("Failed to set PRAGMA"))?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CrowdError::Storage(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CrowdError::Storage(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(db_err("Query failed"))
            };
            Ok(StoreStats {
                report_count: count("SELECT COUNT(*) FROM crowd_reports")?,
                vote_count: count("SELECT COUNT(*) FROM crowd_votes")?,
                unique_topics: count("SELECT COUNT(DISTINCT topic_id) FROM crowd_report_topics")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub report_count: u64,
    pub vote_count: u64,
    pub unique_topics: u64,
}

impl ReportStore for SqliteReportStore {
    fn insert(&self, report: &CrowdReport) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(db_err("Transaction failed"))?;

            let exists = tx
                .query_row("SELECT 1 FROM crowd_reports WHERE id = ?", params![report.id], |_| Ok(()))
                .optional()
                .map_err(db_err("Query failed"))?
                .is_some();
            if exists {
                return Err(CrowdError::Validation(format!("report already exists: {}", report.id)));
            }

            tx.execute(
                r#"
                INSERT INTO crowd_reports (
                    id, author, text, latitude, longitude,
                    submitted, effective, updated,
                    reviewed, upvote_count, downvote_count, score, hidden, score_override,
                    version
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
                params![
                    report.id,
                    report.author,
                    report.text,
                    report.location.map(|l| l.lat),
                    report.location.map(|l| l.lng),
                    format_ts(&report.submitted),
                    format_ts(&report.effective),
                    format_ts(&report.updated),
                    report.reviewed,
                    report.upvote_count,
                    report.downvote_count,
                    report.score,
                    report.hidden,
                    report.score_override,
                ],
            )
            .map_err(db_err("Insert failed"))?;

            for topic in &report.topic_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO crowd_report_topics (report_id, topic_id) VALUES (?, ?)",
                    params![report.id, topic],
                )
                .map_err(db_err("Topic insert failed"))?;
            }

            tx.commit().map_err(db_err("Commit failed"))
        })
    }

    fn get(&self, id: &str) -> Result<Option<StoredReport>> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT * FROM crowd_reports WHERE id = ?", params![id], report_from_row)
                .optional()
                .map_err(db_err("Query failed"))?;

            match found {
                Some((mut report, version)) => {
                    report.topic_ids = get_report_topics(conn, id)?;
                    Ok(Some(StoredReport { report, version }))
                }
                None => Ok(None),
            }
        })
    }

    fn scan(&self, hint: &ScanHint) -> Result<Vec<CrowdReport>> {
        let topics: Option<Vec<&String>> = hint.topics.as_ref().map(|t| t.iter().collect());
        let topic_chunks: Vec<Option<&[&String]>> = match &topics {
            Some(topics) if topics.is_empty() => return Ok(vec![]),
            Some(topics) => topics.chunks(MAX_IN_LIST).map(Some).collect(),
            None => vec![None],
        };

        let mut conditions = vec![];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(author) = &hint.author {
            conditions.push("r.author = ?".to_string());
            params.push(Box::new(author.clone()));
        }

        if let Some(bound) = &hint.max_updated {
            conditions.push("r.updated <= ?".to_string());
            params.push(Box::new(format_ts(bound)));
        }

        match &hint.location {
            LocationHint::Any => {}
            LocationHint::Absent => conditions.push("r.latitude IS NULL".to_string()),
            LocationHint::Within(bbox) => {
                conditions.push("r.latitude BETWEEN ? AND ?".to_string());
                conditions.push("r.longitude BETWEEN ? AND ?".to_string());
                params.push(Box::new(bbox.min_lat));
                params.push(Box::new(bbox.max_lat));
                params.push(Box::new(bbox.min_lng));
                params.push(Box::new(bbox.max_lng));
            }
        }

        self.with_conn(|conn| {
            // Keyed by id so a report matched through several topic chunks appears once
            let mut found: BTreeMap<String, CrowdReport> = BTreeMap::new();

            for chunk in topic_chunks {
                let mut sql = String::from("SELECT DISTINCT r.* FROM crowd_reports r");
                let mut chunk_conditions = vec![];
                let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![];

                if let Some(chunk) = chunk {
                    sql.push_str(" INNER JOIN crowd_report_topics t ON r.id = t.report_id");
                    chunk_conditions.push(format!("t.topic_id IN ({})", placeholders(chunk.len())));
                    param_refs.extend(chunk.iter().map(|t| *t as &dyn rusqlite::ToSql));
                }
                chunk_conditions.extend(conditions.iter().cloned());
                param_refs.extend(params.iter().map(|p| p.as_ref()));

                if !chunk_conditions.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&chunk_conditions.join(" AND "));
                }

                debug!("Executing scan: {}", sql);

                let mut stmt = conn.prepare(&sql).map_err(db_err("Prepare failed"))?;
                let rows = stmt
                    .query_map(param_refs.as_slice(), report_from_row)
                    .map_err(db_err("Query failed"))?;

                for row_result in rows {
                    let (report, _) = row_result.map_err(db_err("Row parse failed"))?;
                    found.entry(report.id.clone()).or_insert(report);
                }
            }

            load_topics(conn, &mut found)?;
            Ok(found.into_values().collect())
        })
    }

    fn get_vote(&self, report_id: &str, voter: &str) -> Result<Option<VoteType>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT vote_type FROM crowd_votes WHERE report_id = ? AND voter = ?",
                params![report_id, voter],
                |row| vote_column(row, 0),
            )
            .optional()
            .map_err(db_err("Query failed"))
        })
    }

    fn get_votes(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, VoteType>> {
        self.with_conn(|conn| {
            let mut votes = HashMap::new();

            for chunk in report_ids.chunks(MAX_IN_LIST) {
                let sql = format!(
                    "SELECT report_id, vote_type FROM crowd_votes WHERE voter = ? AND report_id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare_cached(&sql).map_err(db_err("Prepare failed"))?;

                let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![&voter];
                param_refs.extend(chunk.iter().map(|id| id as &dyn rusqlite::ToSql));

                let rows = stmt
                    .query_map(param_refs.as_slice(), |row| {
                        Ok((row.get::<_, String>(0)?, vote_column(row, 1)?))
                    })
                    .map_err(db_err("Query failed"))?;
                for row in rows {
                    let (report_id, vote_type) = row.map_err(db_err("Row parse failed"))?;
                    votes.insert(report_id, vote_type);
                }
            }

            Ok(votes)
        })
    }

    fn commit(&self, unit: UnitOfWork) -> Result<CommitOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(db_err("Transaction failed"))?;
            let report = &unit.report;

            // Identity and content columns never change after insert
            let changed = tx
                .execute(
                    r#"
                    UPDATE crowd_reports SET
                        updated = ?, reviewed = ?,
                        upvote_count = ?, downvote_count = ?, score = ?,
                        hidden = ?, score_override = ?,
                        version = version + 1
                    WHERE id = ? AND version = ?
                    "#,
                    params![
                        format_ts(&report.updated),
                        report.reviewed,
                        report.upvote_count,
                        report.downvote_count,
                        report.score,
                        report.hidden,
                        report.score_override,
                        report.id,
                        unit.expected_version as i64,
                    ],
                )
                .map_err(db_err("Update failed"))?;

            if changed == 0 {
                let exists = tx
                    .query_row("SELECT 1 FROM crowd_reports WHERE id = ?", params![report.id], |_| Ok(()))
                    .optional()
                    .map_err(db_err("Query failed"))?
                    .is_some();
                return if exists {
                    Ok(CommitOutcome::Conflict)
                } else {
                    Err(CrowdError::NotFound(report.id.clone()))
                };
            }

            if let Some(change) = &unit.vote {
                let written = match change.vote_type {
                    Some(vote_type) => tx.execute(
                        r#"
                        INSERT INTO crowd_votes (report_id, voter, vote_type) VALUES (?, ?, ?)
                        ON CONFLICT(report_id, voter) DO UPDATE SET vote_type = excluded.vote_type
                        "#,
                        params![report.id, change.voter, vote_type.as_str()],
                    ),
                    None => tx.execute(
                        "DELETE FROM crowd_votes WHERE report_id = ? AND voter = ?",
                        params![report.id, change.voter],
                    ),
                };
                written.map_err(db_err("Vote write failed"))?;
            }

            tx.commit().map_err(db_err("Commit failed"))?;

            Ok(CommitOutcome::Committed {
                version: unit.expected_version + 1,
            })
        })
    }
}
