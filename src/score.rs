//! Score aggregation
//!
//! Turns a change in one voter's vote into a change of the report's
//! tallies, score and hidden flag. Everything here is a pure state
//! transition; atomicity comes from the unit of work that carries it.

use chrono::{DateTime, Utc};

use crate::model::{CrowdReport, Polarity, ScoreOverride, VoteType};

/// Change to a report's derived fields caused by one vote transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteDelta {
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i64,
}

impl VoteDelta {
    /// Delta of replacing `prior` with `next` (either may be absent)
    pub fn between(prior: Option<VoteType>, next: Option<VoteType>) -> Self {
        let mut delta = Self::default();
        if let Some(old) = prior {
            delta.count(old.polarity(), -1);
            delta.score -= old.weight();
        }
        if let Some(new) = next {
            delta.count(new.polarity(), 1);
            delta.score += new.weight();
        }
        delta
    }

    fn count(&mut self, polarity: Polarity, by: i32) {
        match polarity {
            Polarity::Up => self.upvotes += by,
            Polarity::Down => self.downvotes += by,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply a ledger delta and re-derive `hidden`.
///
/// Clears any administrative override: after this call `hidden` is a
/// function of `score` again.
pub fn apply_delta(report: &mut CrowdReport, delta: VoteDelta, now: DateTime<Utc>) {
    report.upvote_count = report.upvote_count.saturating_add_signed(delta.upvotes);
    report.downvote_count = report.downvote_count.saturating_add_signed(delta.downvotes);
    report.score += delta.score;
    report.hidden = report.hidden_by_score();
    report.score_override = false;
    report.updated = now;
}

/// Set all derived fields directly, entering override state
pub fn apply_override(report: &mut CrowdReport, values: ScoreOverride, now: DateTime<Utc>) {
    report.upvote_count = values.upvote_count;
    report.downvote_count = values.downvote_count;
    report.score = values.score;
    report.hidden = values.hidden;
    report.score_override = true;
    report.updated = now;
}
