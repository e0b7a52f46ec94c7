//! Vote ledger
//!
//! Keeps at most one vote per (report, voter) and folds every vote change
//! into the report's aggregate in the same unit of work. Units of work are
//! optimistic: read the report and its version, decide, commit if the
//! version is unchanged, otherwise read again. Only the report being voted
//! on is ever contended.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{self, Clock};
use crate::error::{CrowdError, Result};
use crate::model::{CrowdReport, CrowdVote, VoteType};
use crate::score::{self, VoteDelta};
use crate::store::{CommitOutcome, ReportStore, StoredReport, UnitOfWork, VoteChange};

/// Outcome of one read-decide step inside a unit of work
pub(crate) enum Step {
    /// Nothing to write; return the report as read
    Unchanged,
    Write {
        report: CrowdReport,
        vote: Option<VoteChange>,
    },
}

/// Run `decide` against fresh reads of `report_id` until a commit lands.
///
/// Returns the report as committed (or as read, for `Step::Unchanged`).
pub(crate) fn update_report<F>(
    store: &dyn ReportStore,
    max_attempts: u32,
    report_id: &str,
    mut decide: F,
) -> Result<CrowdReport>
where
    F: FnMut(&StoredReport) -> Result<Step>,
{
    for attempt in 1..=max_attempts {
        let stored = store
            .get(report_id)?
            .ok_or_else(|| CrowdError::NotFound(report_id.to_string()))?;

        let (report, vote) = match decide(&stored)? {
            Step::Unchanged => return Ok(stored.report),
            Step::Write { report, vote } => (report, vote),
        };

        let unit = UnitOfWork {
            report: report.clone(),
            expected_version: stored.version,
            vote,
        };
        match store.commit(unit)? {
            CommitOutcome::Committed { version } => {
                debug!(report_id, version, attempt, "Committed report update");
                return Ok(report);
            }
            CommitOutcome::Conflict => {
                warn!(report_id, attempt, "Report changed underneath update, retrying");
            }
        }
    }

    Err(CrowdError::Conflict {
        report_id: report_id.to_string(),
        attempts: max_attempts,
    })
}

pub struct VoteLedger {
    store: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn ReportStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts,
        }
    }

    /// Record `voter`'s vote on a report; `None` retracts it.
    ///
    /// Returns the report with its updated tallies. Repeating the current
    /// vote writes nothing.
    pub fn put(&self, report_id: &str, voter: &str, vote_type: Option<VoteType>) -> Result<CrowdReport> {
        let store = self.store.as_ref();
        update_report(store, self.max_attempts, report_id, |stored| {
            // Read after the report so a concurrent commit shows up as a
            // version conflict rather than a stale prior vote.
            let prior = store.get_vote(report_id, voter)?;
            if prior == vote_type {
                return Ok(Step::Unchanged);
            }

            let delta = VoteDelta::between(prior, vote_type);
            let mut report = stored.report.clone();
            score::apply_delta(&mut report, delta, clock::stamp(self.clock.as_ref()));
            debug!(
                report_id,
                voter,
                ?prior,
                ?vote_type,
                score = report.score,
                hidden = report.hidden,
                "Applying vote"
            );

            Ok(Step::Write {
                report,
                vote: Some(VoteChange {
                    voter: voter.to_string(),
                    vote_type,
                }),
            })
        })
    }

    pub fn get(&self, report_id: &str, voter: &str) -> Result<Option<CrowdVote>> {
        Ok(self
            .store
            .get_vote(report_id, voter)?
            .map(|vote_type| CrowdVote {
                report_id: report_id.to_string(),
                voter: voter.to_string(),
                vote_type,
            }))
    }

    /// `voter`'s votes on `report_ids`; reports without one are absent
    pub fn get_multi(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, CrowdVote>> {
        let votes = self.store.get_votes(report_ids, voter)?;
        Ok(votes
            .into_iter()
            .map(|(report_id, vote_type)| {
                let vote = CrowdVote {
                    report_id: report_id.clone(),
                    voter: voter.to_string(),
                    vote_type,
                };
                (report_id, vote)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{testing, MemoryReportStore, ScanHint, SqliteReportStore};

    use VoteType::*;

    fn ledger_on(store: Arc<dyn ReportStore>) -> VoteLedger {
        store.insert(&testing::report("r1", &["foo"], 1_300_000_000)).unwrap();
        let clock = Arc::new(ManualClock::at_timestamp(1_300_000_100));
        VoteLedger::new(store, clock, 8)
    }

    fn tallies(r: &CrowdReport) -> (u32, u32, i64, bool) {
        (r.upvote_count, r.downvote_count, r.score, r.hidden)
    }

    fn check_update_score(ledger: &VoteLedger) {
        assert_eq!(tallies(&ledger.put("r1", "voter1", Some(AnonymousUp)).unwrap()), (1, 0, 1, false));
        assert_eq!(tallies(&ledger.put("r1", "voter1", Some(AnonymousDown)).unwrap()), (0, 1, -1, false));
        assert_eq!(tallies(&ledger.put("r1", "voter1", None).unwrap()), (0, 0, 0, false));

        ledger.put("r1", "voter1", Some(AnonymousDown)).unwrap();
        assert_eq!(tallies(&ledger.put("r1", "voter2", Some(AnonymousDown)).unwrap()), (0, 2, -2, true));
        assert_eq!(tallies(&ledger.put("r1", "voter2", None).unwrap()), (0, 1, -1, false));
        assert_eq!(tallies(&ledger.put("r1", "voter1", None).unwrap()), (0, 0, 0, false));

        // Reviewer votes weigh more but count once
        assert_eq!(tallies(&ledger.put("r1", "reviewer1", Some(ReviewerDown)).unwrap()), (0, 1, -2, true));
        assert_eq!(tallies(&ledger.put("r1", "reviewer1", Some(ReviewerUp)).unwrap()), (1, 0, 2, false));
    }

    #[test]
    fn test_update_score_memory() {
        check_update_score(&ledger_on(Arc::new(MemoryReportStore::new())));
    }

    #[test]
    fn test_update_score_sqlite() {
        check_update_score(&ledger_on(Arc::new(SqliteReportStore::open_in_memory().unwrap())));
    }

    #[test]
    fn test_put_get() {
        let ledger = ledger_on(Arc::new(MemoryReportStore::new()));
        ledger.put("r1", "voter1", Some(AnonymousUp)).unwrap();

        let vote = ledger.get("r1", "voter1").unwrap().unwrap();
        assert_eq!(vote.report_id, "r1");
        assert_eq!(vote.voter, "voter1");
        assert_eq!(vote.vote_type, AnonymousUp);
        assert!(ledger.get("r1", "voter2").unwrap().is_none());
    }

    #[test]
    fn test_repeated_vote_is_noop() {
        let store: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
        let ledger = ledger_on(store.clone());

        let first = ledger.put("r1", "voter1", Some(AnonymousDown)).unwrap();
        let version = store.get("r1").unwrap().unwrap().version;
        let second = ledger.put("r1", "voter1", Some(AnonymousDown)).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get("r1").unwrap().unwrap().version, version);
        // Retracting a vote that does not exist is also a no-op
        ledger.put("r1", "nobody", None).unwrap();
        assert_eq!(store.get("r1").unwrap().unwrap().version, version);
    }

    #[test]
    fn test_unknown_report() {
        let ledger = ledger_on(Arc::new(MemoryReportStore::new()));
        let err = ledger.put("missing", "voter1", Some(AnonymousUp)).unwrap_err();
        assert!(matches!(err, CrowdError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn test_vote_sets_updated() {
        let ledger = ledger_on(Arc::new(MemoryReportStore::new()));
        let report = ledger.put("r1", "voter1", Some(AnonymousUp)).unwrap();
        assert_eq!(report.updated.timestamp(), 1_300_000_100);
        assert_eq!(report.submitted.timestamp(), 1_300_000_000);
    }

    /// Store whose commits always lose the race
    struct AlwaysConflicting(MemoryReportStore);

    impl ReportStore for AlwaysConflicting {
        fn insert(&self, report: &CrowdReport) -> Result<()> {
            self.0.insert(report)
        }
        fn get(&self, id: &str) -> Result<Option<StoredReport>> {
            self.0.get(id)
        }
        fn scan(&self, hint: &ScanHint) -> Result<Vec<CrowdReport>> {
            self.0.scan(hint)
        }
        fn get_vote(&self, report_id: &str, voter: &str) -> Result<Option<VoteType>> {
            self.0.get_vote(report_id, voter)
        }
        fn get_votes(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, VoteType>> {
            self.0.get_votes(report_ids, voter)
        }
        fn commit(&self, _unit: UnitOfWork) -> Result<CommitOutcome> {
            Ok(CommitOutcome::Conflict)
        }
    }

    #[test]
    fn test_exhausted_retries_surface_conflict() {
        let store: Arc<dyn ReportStore> = Arc::new(AlwaysConflicting(MemoryReportStore::new()));
        store.insert(&testing::report("r1", &[], 1)).unwrap();
        let ledger = VoteLedger::new(store.clone(), Arc::new(ManualClock::at_timestamp(2)), 3);

        let err = ledger.put("r1", "voter1", Some(AnonymousUp)).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, CrowdError::Conflict { attempts: 3, .. }));
        assert!(store.get_vote("r1", "voter1").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_votes_on_one_report() {
        let store: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
        store.insert(&testing::report("r1", &[], 1)).unwrap();
        let ledger = VoteLedger::new(store, Arc::new(ManualClock::at_timestamp(2)), 10_000);

        std::thread::scope(|s| {
            for t in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..25 {
                        let voter = format!("voter-{}-{}", t, i);
                        ledger.put("r1", &voter, Some(AnonymousDown)).unwrap();
                    }
                });
            }
        });

        let ids = vec!["r1".to_string()];
        let report = ledger.store.get("r1").unwrap().unwrap().report;
        assert_eq!(report.downvote_count, 200);
        assert_eq!(report.score, -200);
        assert!(report.hidden);
        assert_eq!(ledger.get_multi(&ids, "voter-3-7").unwrap().len(), 1);
    }

    #[test]
    fn test_get_multi() {
        let store: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::open_in_memory().unwrap());
        let ledger = ledger_on(store.clone());
        store.insert(&testing::report("r2", &[], 1_300_000_001)).unwrap();
        store.insert(&testing::report("r3", &[], 1_300_000_002)).unwrap();

        ledger.put("r1", "voter1", Some(AnonymousUp)).unwrap();
        ledger.put("r2", "voter1", Some(AnonymousDown)).unwrap();
        ledger.put("r3", "voter2", Some(AnonymousUp)).unwrap();

        let ids: Vec<String> = ["r1", "r2", "r3"].iter().map(|s| s.to_string()).collect();
        let votes = ledger.get_multi(&ids, "voter1").unwrap();
        assert_eq!(votes.get("r1").map(|v| v.vote_type), Some(AnonymousUp));
        assert_eq!(votes.get("r2").map(|v| v.vote_type), Some(AnonymousDown));
        assert!(votes.get("r3").is_none());
    }
}
