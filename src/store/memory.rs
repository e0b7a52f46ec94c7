//! Process-local report store
//!
//! Each report lives in one dashmap entry together with its votes, so a
//! commit is a single entry mutation under that entry's shard lock and
//! readers never see a vote without its aggregate. Different reports only
//! contend when they hash to the same shard.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tracing::debug;

use super::{CommitOutcome, ReportStore, ScanHint, StoredReport, UnitOfWork};
use crate::error::{CrowdError, Result};
use crate::model::{CrowdReport, VoteType};

#[derive(Debug, Clone)]
struct Entry {
    report: CrowdReport,
    version: u64,
    /// voter -> vote
    votes: HashMap<String, VoteType>,
}

#[derive(Debug, Default)]
pub struct MemoryReportStore {
    entries: DashMap<String, Entry>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReportStore for MemoryReportStore {
    fn insert(&self, report: &CrowdReport) -> Result<()> {
        match self.entries.entry(report.id.clone()) {
            MapEntry::Occupied(_) => Err(CrowdError::Validation(format!(
                "report already exists: {}",
                report.id
            ))),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    report: report.clone(),
                    version: 0,
                    votes: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<StoredReport>> {
        Ok(self.entries.get(id).map(|entry| StoredReport {
            report: entry.report.clone(),
            version: entry.version,
        }))
    }

    fn scan(&self, hint: &ScanHint) -> Result<Vec<CrowdReport>> {
        let reports: Vec<CrowdReport> = self
            .entries
            .iter()
            .filter(|entry| hint.admits(&entry.report))
            .map(|entry| entry.report.clone())
            .collect();
        debug!("Memory scan returned {} reports", reports.len());
        Ok(reports)
    }

    fn get_vote(&self, report_id: &str, voter: &str) -> Result<Option<VoteType>> {
        Ok(self
            .entries
            .get(report_id)
            .and_then(|entry| entry.votes.get(voter).copied()))
    }

    fn get_votes(&self, report_ids: &[String], voter: &str) -> Result<HashMap<String, VoteType>> {
        let mut votes = HashMap::new();
        for id in report_ids {
            if let Some(vote) = self.get_vote(id, voter)? {
                votes.insert(id.clone(), vote);
            }
        }
        Ok(votes)
    }

    fn commit(&self, unit: UnitOfWork) -> Result<CommitOutcome> {
        let mut entry = self
            .entries
            .get_mut(&unit.report.id)
            .ok_or_else(|| CrowdError::NotFound(unit.report.id.clone()))?;

        if entry.version != unit.expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        if let Some(change) = unit.vote {
            match change.vote_type {
                Some(vote_type) => {
                    entry.votes.insert(change.voter, vote_type);
                }
                None => {
                    entry.votes.remove(&change.voter);
                }
            }
        }
        entry.report = unit.report;
        entry.version += 1;

        Ok(CommitOutcome::Committed {
            version: entry.version,
        })
    }
}
