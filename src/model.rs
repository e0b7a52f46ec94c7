//! Crowd report and vote entities

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrowdError;
use crate::geo::GeoPoint;

/// Score at or below `-HIDE_THRESHOLD` hides a report
pub const HIDE_THRESHOLD: i64 = 2;

/// Weight of an anonymous vote
pub const ANONYMOUS_WEIGHT: i64 = 1;

/// Weight of a reviewer vote; one reviewer downvote is enough to hide
pub const REVIEWER_WEIGHT: i64 = HIDE_THRESHOLD;

/// A situational report submitted by a field worker or the public
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdReport {
    pub id: String,
    pub author: Option<String>,
    pub text: String,
    pub location: Option<GeoPoint>,
    pub topic_ids: BTreeSet<String>,
    pub submitted: DateTime<Utc>,
    /// When the reported condition holds; the sort key for every query
    pub effective: DateTime<Utc>,
    /// Last change to score, reviewed or hidden
    pub updated: DateTime<Utc>,
    pub reviewed: bool,
    pub upvote_count: u32,
    pub downvote_count: u32,
    pub score: i64,
    pub hidden: bool,
    /// Set while the derived fields hold administratively assigned values
    pub score_override: bool,
}

impl CrowdReport {
    pub fn has_topic(&self, topic_id: &str) -> bool {
        self.topic_ids.contains(topic_id)
    }

    /// Whether `hidden` agrees with the hide threshold
    pub fn hidden_by_score(&self) -> bool {
        self.score <= -HIDE_THRESHOLD
    }
}

/// Input for submitting a report
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCrowdReport {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub topic_ids: Vec<String>,
    /// Defaults to the submission time
    #[serde(default)]
    pub effective: Option<DateTime<Utc>>,
}

impl NewCrowdReport {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topic_ids.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_effective(mut self, effective: DateTime<Utc>) -> Self {
        self.effective = Some(effective);
        self
    }
}

/// Direction a vote pushes the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteType {
    AnonymousUp,
    AnonymousDown,
    ReviewerUp,
    ReviewerDown,
}

impl VoteType {
    pub fn polarity(self) -> Polarity {
        match self {
            Self::AnonymousUp | Self::ReviewerUp => Polarity::Up,
            Self::AnonymousDown | Self::ReviewerDown => Polarity::Down,
        }
    }

    /// Signed contribution to a report's score
    pub fn weight(self) -> i64 {
        match self {
            Self::AnonymousUp => ANONYMOUS_WEIGHT,
            Self::AnonymousDown => -ANONYMOUS_WEIGHT,
            Self::ReviewerUp => REVIEWER_WEIGHT,
            Self::ReviewerDown => -REVIEWER_WEIGHT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnonymousUp => "ANONYMOUS_UP",
            Self::AnonymousDown => "ANONYMOUS_DOWN",
            Self::ReviewerUp => "REVIEWER_UP",
            Self::ReviewerDown => "REVIEWER_DOWN",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = CrowdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANONYMOUS_UP" => Ok(Self::AnonymousUp),
            "ANONYMOUS_DOWN" => Ok(Self::AnonymousDown),
            "REVIEWER_UP" => Ok(Self::ReviewerUp),
            "REVIEWER_DOWN" => Ok(Self::ReviewerDown),
            other => Err(CrowdError::Validation(format!("unknown vote type: {}", other))),
        }
    }
}

/// One voter's current vote on one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdVote {
    pub report_id: String,
    pub voter: String,
    pub vote_type: VoteType,
}

/// Values an administrator assigns directly, bypassing the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOverride {
    pub upvote_count: u32,
    pub downvote_count: u32,
    pub score: i64,
    pub hidden: bool,
}
