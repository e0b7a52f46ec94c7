//! Crowd report engine
//!
//! Wires the store, clock, vote ledger and report index together and adds
//! report submission and moderation. Holds no mutable state of its own;
//! share it across threads behind an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

use crate::clock::{self, Clock, SystemClock};
use crate::config::Config;
use crate::error::{CrowdError, Result};
use crate::filter::{self, ReportFilter};
use crate::geo::GeoPoint;
use crate::index::{ReportIndex, ReportQuery};
use crate::ledger::{self, Step, VoteLedger};
use crate::model::{CrowdReport, CrowdVote, NewCrowdReport, ScoreOverride, VoteType};
use crate::query;
use crate::score;
use crate::store::{MemoryReportStore, ReportStore, ScanHint, SqliteReportStore};

pub struct CrowdEngine {
    store: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    ledger: VoteLedger,
    index: ReportIndex,
}

impl CrowdEngine {
    pub fn new(store: Arc<dyn ReportStore>, clock: Arc<dyn Clock>, config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = VoteLedger::new(store.clone(), clock.clone(), config.max_txn_attempts);
        let index = ReportIndex::new(store.clone(), config.default_page_size, config.max_page_size);
        Ok(Self {
            store,
            clock,
            config,
            ledger,
            index,
        })
    }

    /// Engine over the SQLite database in `config.storage_dir`
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteReportStore::open(&config.database_path())?);
        Self::new(store, Arc::new(SystemClock), config)
    }

    /// Engine over a fresh process-local store
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(Arc::new(MemoryReportStore::new()), clock, Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn index(&self) -> &ReportIndex {
        &self.index
    }

    // =========================================================================
    // Reports and moderation
    // =========================================================================

    /// Store a new report stamped with the current time
    pub fn submit(&self, input: NewCrowdReport) -> Result<CrowdReport> {
        if let Some(location) = &input.location {
            location.validate()?;
        }
        if input.topic_ids.iter().any(|t| t.is_empty()) {
            return Err(CrowdError::Validation("topic ids must not be empty".to_string()));
        }
        if matches!(&input.id, Some(id) if id.is_empty()) {
            return Err(CrowdError::Validation("report id must not be empty".to_string()));
        }

        let now = clock::stamp(self.clock.as_ref());
        let report = CrowdReport {
            id: input.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            author: input.author,
            text: input.text,
            location: input.location,
            topic_ids: input.topic_ids.into_iter().collect::<BTreeSet<_>>(),
            submitted: now,
            effective: input.effective.map(|t| t.trunc_subsecs(6)).unwrap_or(now),
            updated: now,
            reviewed: false,
            upvote_count: 0,
            downvote_count: 0,
            score: 0,
            hidden: false,
            score_override: false,
        };

        self.store.insert(&report)?;
        info!(report_id = %report.id, topics = report.topic_ids.len(), "Report submitted");
        Ok(report)
    }

    pub fn get(&self, report_id: &str) -> Result<Option<CrowdReport>> {
        self.index.get(report_id)
    }

    /// Set the moderator `reviewed` flag on each report.
    ///
    /// Each report is updated on its own; on `NotFound` the reports listed
    /// before the missing one keep their new flag.
    pub fn mark_reviewed<I, S>(&self, report_ids: I, reviewed: bool) -> Result<Vec<CrowdReport>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut updated = vec![];
        for report_id in report_ids {
            let report_id = report_id.as_ref();
            let report = ledger::update_report(
                self.store.as_ref(),
                self.config.max_txn_attempts,
                report_id,
                |stored| {
                    if stored.report.reviewed == reviewed {
                        return Ok(Step::Unchanged);
                    }
                    let mut report = stored.report.clone();
                    report.reviewed = reviewed;
                    report.updated = clock::stamp(self.clock.as_ref());
                    Ok(Step::Write { report, vote: None })
                },
            )?;
            info!(report_id, reviewed, "Report review flag set");
            updated.push(report);
        }
        Ok(updated)
    }

    /// Administrative override of the derived score fields.
    ///
    /// The values stand until the next vote on the report recomputes
    /// `hidden` from the score.
    pub fn put_score(&self, report_id: &str, values: ScoreOverride) -> Result<CrowdReport> {
        let report = ledger::update_report(
            self.store.as_ref(),
            self.config.max_txn_attempts,
            report_id,
            |stored| {
                let mut report = stored.report.clone();
                score::apply_override(&mut report, values, clock::stamp(self.clock.as_ref()));
                Ok(Step::Write { report, vote: None })
            },
        )?;
        info!(report_id, ?values, "Score override applied");
        Ok(report)
    }

    // =========================================================================
    // Votes
    // =========================================================================

    pub fn vote(&self, report_id: &str, voter: &str, vote_type: Option<VoteType>) -> Result<CrowdReport> {
        self.ledger.put(report_id, voter, vote_type)
    }

    pub fn get_vote(&self, report_id: &str, voter: &str) -> Result<Option<CrowdVote>> {
        self.ledger.get(report_id, voter)
    }

    pub fn get_votes(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, CrowdVote>> {
        self.ledger.get_multi(report_ids, voter)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_for_author(&self, author: Option<&str>, query: &ReportQuery) -> Result<Vec<CrowdReport>> {
        self.index.get_for_author(author, query)
    }

    pub fn get_for_topics<I, S>(&self, topic_ids: I, query: &ReportQuery) -> Result<Vec<CrowdReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index.get_for_topics(topic_ids, query)
    }

    pub fn get_without_location<I, S>(&self, topic_ids: I, query: &ReportQuery) -> Result<Vec<CrowdReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index.get_without_location(topic_ids, query)
    }

    pub fn get_by_location(
        &self,
        center: GeoPoint,
        topic_radii: &HashMap<String, f64>,
        query: &ReportQuery,
    ) -> Result<Vec<CrowdReport>> {
        self.index.get_by_location(center, topic_radii, query)
    }

    /// Evaluate a search string; see [`crate::query`] for the syntax
    pub fn search(
        &self,
        query_string: &str,
        count: usize,
        max_updated: Option<DateTime<Utc>>,
    ) -> Result<Vec<CrowdReport>> {
        let options = ReportQuery {
            count: Some(count),
            max_updated,
            ..Default::default()
        };
        self.search_page(query_string, &options)
    }

    /// Search with the full set of paging options.
    ///
    /// `reviewed`, `hidden` and `author` in `options` narrow the result in
    /// addition to the search string.
    pub fn search_page(&self, query_string: &str, options: &ReportQuery) -> Result<Vec<CrowdReport>> {
        let expr = query::parse_query(query_string)?;
        debug!(query = query_string, ?expr, "Parsed search");

        let required = expr.required_topics();
        let hint = ScanHint {
            author: options.author.clone(),
            topics: (!required.is_empty()).then_some(required),
            max_updated: options.max_updated,
            ..Default::default()
        };
        let filter = ReportFilter::all_of([
            Some(expr.to_filter()),
            filter::reviewed(options.reviewed),
            filter::hidden(options.hidden),
            options.author.clone().map(ReportFilter::Author),
            filter::updated_at_most(options.max_updated),
        ]);
        self.index.select(hint, &filter, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine() -> (CrowdEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_timestamp(1_300_000_000));
        (CrowdEngine::in_memory(clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_submit_defaults() {
        let (engine, _) = engine();
        let report = engine
            .submit(NewCrowdReport::new("hello").with_topics(["b", "a", "b"]))
            .unwrap();

        assert!(!report.id.is_empty());
        assert_eq!(report.submitted.timestamp(), 1_300_000_000);
        assert_eq!(report.effective, report.submitted);
        assert_eq!(report.updated, report.submitted);
        assert_eq!(report.topic_ids.len(), 2);
        assert_eq!(engine.get(&report.id).unwrap(), Some(report));
        assert_eq!(engine.get("unknown").unwrap(), None);
    }

    #[test]
    fn test_submit_validation() {
        let (engine, _) = engine();
        let bad_location = NewCrowdReport::new("x").with_location(GeoPoint { lat: 0.0, lng: 200.0 });
        assert!(matches!(engine.submit(bad_location), Err(CrowdError::Validation(_))));
        assert!(engine.submit(NewCrowdReport::new("x").with_topics([""])).is_err());

        engine.submit(NewCrowdReport::new("x").with_id("fixed")).unwrap();
        assert!(matches!(
            engine.submit(NewCrowdReport::new("y").with_id("fixed")),
            Err(CrowdError::Validation(_))
        ));
    }

    #[test]
    fn test_mark_reviewed_updates_timestamp() {
        let (engine, clock) = engine();
        let report = engine.submit(NewCrowdReport::new("x")).unwrap();

        clock.advance(chrono::Duration::seconds(30));
        let reviewed = engine.mark_reviewed([&report.id], true).unwrap();
        assert!(reviewed[0].reviewed);
        assert_eq!(reviewed[0].updated.timestamp(), 1_300_000_030);

        // No change, no new timestamp
        clock.advance(chrono::Duration::seconds(30));
        let again = engine.mark_reviewed([&report.id], true).unwrap();
        assert_eq!(again[0].updated.timestamp(), 1_300_000_030);

        assert!(matches!(
            engine.mark_reviewed(["missing"], true),
            Err(CrowdError::NotFound(_))
        ));
    }

    #[test]
    fn test_override_then_vote() {
        let (engine, _) = engine();
        let report = engine.submit(NewCrowdReport::new("x")).unwrap();

        let overridden = engine
            .put_score(&report.id, ScoreOverride { upvote_count: 0, downvote_count: 2, score: -2, hidden: false })
            .unwrap();
        assert!(overridden.score_override);
        assert!(!overridden.hidden);

        // Next ledger mutation re-derives hidden from the score
        let voted = engine.vote(&report.id, "voter1", Some(VoteType::AnonymousDown)).unwrap();
        assert!(!voted.score_override);
        assert_eq!((voted.downvote_count, voted.score, voted.hidden), (3, -3, true));

        assert!(matches!(
            engine.put_score("missing", ScoreOverride { upvote_count: 0, downvote_count: 0, score: 0, hidden: true }),
            Err(CrowdError::NotFound(_))
        ));
    }

    #[test]
    fn test_search_rejects_bad_syntax() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.search("\"open beds", 10, None),
            Err(CrowdError::QuerySyntax { .. })
        ));
        assert!(matches!(
            engine.search("shelter:yes", 10, None),
            Err(CrowdError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn test_in_memory_uses_default_config() {
        let (engine, _) = engine();
        let defaults = Config::default();
        assert_eq!(engine.config().max_txn_attempts, defaults.max_txn_attempts);
        assert_eq!(engine.config().default_page_size, defaults.default_page_size);
        assert_eq!(engine.config().max_page_size, defaults.max_page_size);
    }

    #[test]
    fn test_deeply_nested_search_is_a_syntax_error() {
        let (engine, _) = engine();
        engine.submit(NewCrowdReport::new("23 beds available")).unwrap();

        let parens = format!("{}beds{}", "(".repeat(5000), ")".repeat(5000));
        let negations = "NOT ".repeat(5000) + "beds";
        for query in [parens, negations] {
            assert!(matches!(
                engine.search(&query, 10, None),
                Err(CrowdError::QuerySyntax { .. })
            ));
        }
        assert_eq!(engine.search("((beds))", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_terms_without_tokens_match_nothing() {
        let (engine, _) = engine();
        engine.submit(NewCrowdReport::new("a b")).unwrap();

        for query in ["\"\"", "!!!", "a - b"] {
            assert!(engine.search(query, 10, None).unwrap().is_empty(), "{:?}", query);
        }
        assert_eq!(engine.search("a b", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_search_returns_everything() {
        let (engine, clock) = engine();
        engine.submit(NewCrowdReport::new("one")).unwrap();
        clock.advance(chrono::Duration::seconds(1));
        engine.submit(NewCrowdReport::new("two")).unwrap();

        let texts: Vec<String> = engine
            .search("", 10, None)
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["two", "one"]);
    }
}
