//! Report predicates shared by the structured queries and text search
//!
//! Every query shape is a `ReportFilter` tree evaluated against each
//! candidate report, so `topic_id:x` in a search string and a topic list
//! passed to `get_for_topics` go through the same code.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::geo::GeoPoint;
use crate::model::CrowdReport;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportFilter {
    /// Every child matches; an empty list matches everything
    All(Vec<ReportFilter>),
    /// Some child matches; an empty list matches nothing
    Any(Vec<ReportFilter>),
    Not(Box<ReportFilter>),
    Reviewed(bool),
    Hidden(bool),
    Author(String),
    /// Report carries at least one of the topics
    AnyTopic(BTreeSet<String>),
    UpdatedAtMost(DateTime<Utc>),
    WithoutLocation,
    /// Report carries `topic_id` and lies within `radius_m` of `center`
    TopicWithin {
        topic_id: String,
        center: GeoPoint,
        radius_m: f64,
    },
    Text(TextMatch),
}

impl ReportFilter {
    pub fn matches(&self, report: &CrowdReport) -> bool {
        match self {
            Self::All(children) => children.iter().all(|f| f.matches(report)),
            Self::Any(children) => children.iter().any(|f| f.matches(report)),
            Self::Not(inner) => !inner.matches(report),
            Self::Reviewed(want) => report.reviewed == *want,
            Self::Hidden(want) => report.hidden == *want,
            Self::Author(author) => report.author.as_deref() == Some(author.as_str()),
            Self::AnyTopic(topics) => topics.iter().any(|t| report.has_topic(t)),
            Self::UpdatedAtMost(bound) => report.updated <= *bound,
            Self::WithoutLocation => report.location.is_none(),
            Self::TopicWithin { topic_id, center, radius_m } => {
                report.has_topic(topic_id)
                    && report
                        .location
                        .map(|loc| loc.within(center, *radius_m))
                        .unwrap_or(false)
            }
            Self::Text(text) => text.matches(&report.text),
        }
    }

    pub fn topic(topic_id: impl Into<String>) -> Self {
        Self::AnyTopic(BTreeSet::from([topic_id.into()]))
    }

    /// Conjunction that skips unset tri-state filters
    pub fn all_of<I>(filters: I) -> Self
    where
        I: IntoIterator<Item = Option<ReportFilter>>,
    {
        Self::All(filters.into_iter().flatten().collect())
    }
}

/// `Some(Reviewed(v))` when the tri-state is set
pub fn reviewed(state: Option<bool>) -> Option<ReportFilter> {
    state.map(ReportFilter::Reviewed)
}

/// `Some(Hidden(v))` when the tri-state is set
pub fn hidden(state: Option<bool>) -> Option<ReportFilter> {
    state.map(ReportFilter::Hidden)
}

pub fn updated_at_most(bound: Option<DateTime<Utc>>) -> Option<ReportFilter> {
    bound.map(ReportFilter::UpdatedAtMost)
}

/// Case-insensitive word or phrase match over report text.
///
/// A single token must equal some text token; several tokens must appear
/// consecutively. A term with no tokens (`""`, `-`, `!!!`) matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    tokens: Vec<String>,
}

impl TextMatch {
    pub fn new(phrase: &str) -> Self {
        Self {
            tokens: tokenize(phrase),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.tokens.is_empty() {
            return false;
        }
        let haystack = tokenize(text);
        haystack
            .windows(self.tokens.len())
            .any(|window| window == self.tokens.as_slice())
    }
}

/// Lowercased maximal runs of alphanumeric characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}
