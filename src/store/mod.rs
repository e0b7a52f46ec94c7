//! Report storage
//!
//! The engine talks to storage only through [`ReportStore`]. A store keeps
//! reports, their topic sets and the votes cast on them, and offers one
//! write primitive for existing reports: [`ReportStore::commit`], an atomic
//! compare-and-swap of a report together with at most one vote change.
//!
//! ## Implementations
//!
//! - [`SqliteReportStore`] - SQLite file (or in-memory) database
//! - [`MemoryReportStore`] - process-local dashmap, one entry per report

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::geo::BoundingBox;
use crate::model::{CrowdReport, VoteType};

pub use memory::MemoryReportStore;
pub use sqlite::SqliteReportStore;

/// A report plus the store version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReport {
    pub report: CrowdReport,
    pub version: u64,
}

/// New vote state for one voter; `None` removes the vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteChange {
    pub voter: String,
    pub vote_type: Option<VoteType>,
}

/// Replacement report state, applied only if the stored version still
/// equals `expected_version`
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOfWork {
    pub report: CrowdReport,
    pub expected_version: u64,
    pub vote: Option<VoteChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { version: u64 },
    /// Someone else committed first; re-read and try again
    Conflict,
}

/// Location constraint a store may use to narrow a scan
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum LocationHint {
    #[default]
    Any,
    Absent,
    Within(BoundingBox),
}

/// Coarse constraints a store may use to avoid loading every report.
///
/// Stores may return a superset; callers always re-check with the full
/// predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanHint {
    pub author: Option<String>,
    /// Report must carry at least one of these topics
    pub topics: Option<BTreeSet<String>>,
    pub max_updated: Option<DateTime<Utc>>,
    pub location: LocationHint,
}

impl ScanHint {
    pub fn admits(&self, report: &CrowdReport) -> bool {
        if let Some(author) = &self.author {
            if report.author.as_deref() != Some(author.as_str()) {
                return false;
            }
        }
        if let Some(topics) = &self.topics {
            if !topics.iter().any(|t| report.has_topic(t)) {
                return false;
            }
        }
        if let Some(bound) = self.max_updated {
            if report.updated > bound {
                return false;
            }
        }
        match (&self.location, &report.location) {
            (LocationHint::Any, _) => true,
            (LocationHint::Absent, loc) => loc.is_none(),
            (LocationHint::Within(bbox), Some(loc)) => bbox.contains(loc),
            (LocationHint::Within(_), None) => false,
        }
    }
}

pub trait ReportStore: Send + Sync {
    /// Store a new report. Fails with `Validation` if the id is taken.
    fn insert(&self, report: &CrowdReport) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<StoredReport>>;

    /// Reports admitted by `hint`, in no particular order
    fn scan(&self, hint: &ScanHint) -> Result<Vec<CrowdReport>>;

    fn get_vote(&self, report_id: &str, voter: &str) -> Result<Option<VoteType>>;

    /// Votes by `voter` on any of `report_ids`, keyed by report id
    fn get_votes(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, VoteType>>;

    /// Atomically replace a report and apply its vote change.
    ///
    /// Fails with `NotFound` if the report does not exist.
    fn commit(&self, unit: UnitOfWork) -> Result<CommitOutcome>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the store tests

    use super::*;
    use crate::geo::GeoPoint;

    pub fn report(id: &str, topics: &[&str], secs: i64) -> CrowdReport {
        let t = DateTime::from_timestamp(secs, 0).unwrap();
        CrowdReport {
            id: id.to_string(),
            author: Some("alpha@gmail.test".to_string()),
            text: format!("report {}", id),
            location: None,
            topic_ids: topics.iter().map(|s| s.to_string()).collect(),
            submitted: t,
            effective: t,
            updated: t,
            reviewed: false,
            upvote_count: 0,
            downvote_count: 0,
            score: 0,
            hidden: false,
            score_override: false,
        }
    }

    /// Behavior every store must share
    pub fn exercise_store(store: &dyn ReportStore) {
        let mut located = report("b", &["bar", "baz"], 1_300_000_002);
        located.location = Some(GeoPoint::new(37.0, -74.0).unwrap());
        located.author = Some("beta@gmail.test".to_string());
        store.insert(&report("a", &["foo"], 1_300_000_001)).unwrap();
        store.insert(&located).unwrap();

        // Duplicate id
        assert!(store.insert(&report("a", &["foo"], 1)).is_err());

        let stored = store.get("b").unwrap().unwrap();
        assert_eq!(stored.report, located);
        assert!(store.get("missing").unwrap().is_none());

        // Scans
        let ids = |hint: &ScanHint| {
            let mut ids: Vec<String> =
                store.scan(hint).unwrap().into_iter().map(|r| r.id).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&ScanHint::default()), vec!["a", "b"]);
        assert_eq!(
            ids(&ScanHint { topics: Some(BTreeSet::from(["baz".to_string()])), ..Default::default() }),
            vec!["b"]
        );
        assert!(ids(&ScanHint { topics: Some(BTreeSet::new()), ..Default::default() }).is_empty());
        assert_eq!(
            ids(&ScanHint { author: Some("alpha@gmail.test".into()), ..Default::default() }),
            vec!["a"]
        );
        assert_eq!(
            ids(&ScanHint { location: LocationHint::Absent, ..Default::default() }),
            vec!["a"]
        );
        let bbox = BoundingBox::around(&GeoPoint::new(37.0, -74.0).unwrap(), 100.0);
        assert_eq!(
            ids(&ScanHint { location: LocationHint::Within(bbox), ..Default::default() }),
            vec!["b"]
        );
        assert_eq!(
            ids(&ScanHint {
                max_updated: DateTime::from_timestamp(1_300_000_001, 0),
                ..Default::default()
            }),
            vec!["a"]
        );

        // Commit with a vote, then a stale commit
        let mut next = stored.report.clone();
        next.upvote_count = 1;
        next.score = 1;
        let outcome = store
            .commit(UnitOfWork {
                report: next.clone(),
                expected_version: stored.version,
                vote: Some(VoteChange { voter: "v1".into(), vote_type: Some(VoteType::AnonymousUp) }),
            })
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed { version: stored.version + 1 });
        assert_eq!(store.get("b").unwrap().unwrap().report, next);
        assert_eq!(store.get_vote("b", "v1").unwrap(), Some(VoteType::AnonymousUp));

        let stale = store
            .commit(UnitOfWork {
                report: stored.report.clone(),
                expected_version: stored.version,
                vote: Some(VoteChange { voter: "v1".into(), vote_type: None }),
            })
            .unwrap();
        assert_eq!(stale, CommitOutcome::Conflict);
        assert_eq!(store.get_vote("b", "v1").unwrap(), Some(VoteType::AnonymousUp));
        assert_eq!(store.get("b").unwrap().unwrap().report.score, 1);

        // Vote removal
        store
            .commit(UnitOfWork {
                report: next,
                expected_version: stored.version + 1,
                vote: Some(VoteChange { voter: "v1".into(), vote_type: None }),
            })
            .unwrap();
        assert_eq!(store.get_vote("b", "v1").unwrap(), None);

        // Batched vote lookup
        let a = store.get("a").unwrap().unwrap();
        store
            .commit(UnitOfWork {
                report: a.report,
                expected_version: a.version,
                vote: Some(VoteChange { voter: "v2".into(), vote_type: Some(VoteType::ReviewerDown) }),
            })
            .unwrap();
        let votes = store
            .get_votes(&["a".to_string(), "b".to_string(), "zzz".to_string()], "v2")
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes.get("a"), Some(&VoteType::ReviewerDown));

        // Id and topic lists far longer than one SQL statement can bind
        let many_ids: Vec<String> = (0..40_000)
            .map(|i| format!("id-{}", i))
            .chain(["a".to_string()])
            .collect();
        let votes = store.get_votes(&many_ids, "v2").unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes.get("a"), Some(&VoteType::ReviewerDown));

        let many_topics: BTreeSet<String> = (0..40_000)
            .map(|i| format!("topic-{}", i))
            .chain(["baz".to_string()])
            .collect();
        assert_eq!(ids(&ScanHint { topics: Some(many_topics), ..Default::default() }), vec!["b"]);

        // Unknown report
        let err = store.commit(UnitOfWork {
            report: report("nope", &[], 1),
            expected_version: 0,
            vote: None,
        });
        assert!(matches!(err, Err(crate::error::CrowdError::NotFound(_))));
    }
}
