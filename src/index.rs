//! Structured report queries
//!
//! Four query shapes over the report store: by author, by topic set, by
//! topic set without location, and by per-topic radius around a point.
//! Each builds a [`ScanHint`] for the store and a [`ReportFilter`] for the
//! exact match, then orders by `effective` descending (ties by id
//! ascending) and applies `offset`/`count`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{CrowdError, Result};
use crate::filter::{self, ReportFilter};
use crate::geo::{BoundingBox, GeoPoint};
use crate::model::CrowdReport;
use crate::store::{LocationHint, ReportStore, ScanHint};

/// Filters and paging shared by the structured queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    /// Page size; the configured default when unset
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub reviewed: Option<bool>,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub author: Option<String>,
    /// Only reports whose `updated` is at or before this instant
    #[serde(default)]
    pub max_updated: Option<DateTime<Utc>>,
}

impl ReportQuery {
    pub fn new(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_reviewed(mut self, reviewed: bool) -> Self {
        self.reviewed = Some(reviewed);
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_max_updated(mut self, bound: DateTime<Utc>) -> Self {
        self.max_updated = Some(bound);
        self
    }

    /// Filters every query shape applies
    fn common_filters(&self) -> [Option<ReportFilter>; 4] {
        [
            filter::reviewed(self.reviewed),
            filter::hidden(self.hidden),
            self.author.clone().map(ReportFilter::Author),
            filter::updated_at_most(self.max_updated),
        ]
    }

    fn hint(&self) -> ScanHint {
        ScanHint {
            author: self.author.clone(),
            max_updated: self.max_updated,
            ..Default::default()
        }
    }
}

/// Query order: `effective` descending, then id ascending
pub fn report_order(a: &CrowdReport, b: &CrowdReport) -> Ordering {
    b.effective.cmp(&a.effective).then_with(|| a.id.cmp(&b.id))
}

pub struct ReportIndex {
    store: Arc<dyn ReportStore>,
    default_page_size: usize,
    max_page_size: usize,
}

impl ReportIndex {
    pub fn new(store: Arc<dyn ReportStore>, default_page_size: usize, max_page_size: usize) -> Self {
        Self {
            store,
            default_page_size,
            max_page_size,
        }
    }

    pub fn get(&self, report_id: &str) -> Result<Option<CrowdReport>> {
        Ok(self.store.get(report_id)?.map(|stored| stored.report))
    }

    /// Reports by `author`; an absent or unknown author yields nothing
    pub fn get_for_author(&self, author: Option<&str>, query: &ReportQuery) -> Result<Vec<CrowdReport>> {
        let Some(author) = author else {
            self.page_size(query)?;
            return Ok(vec![]);
        };
        let query = query.clone().with_author(author);
        self.select(query.hint(), &ReportFilter::all_of(query.common_filters()), &query)
    }

    /// Reports carrying any of `topic_ids`
    pub fn get_for_topics<I, S>(&self, topic_ids: I, query: &ReportQuery) -> Result<Vec<CrowdReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topic_ids.into_iter().map(Into::into).collect();
        let mut filters = query.common_filters().to_vec();
        filters.push(Some(ReportFilter::AnyTopic(topics.clone())));

        let hint = ScanHint {
            topics: Some(topics),
            ..query.hint()
        };
        self.select(hint, &ReportFilter::all_of(filters), query)
    }

    /// Reports carrying any of `topic_ids` and no location
    pub fn get_without_location<I, S>(&self, topic_ids: I, query: &ReportQuery) -> Result<Vec<CrowdReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topic_ids.into_iter().map(Into::into).collect();
        let mut filters = query.common_filters().to_vec();
        filters.push(Some(ReportFilter::AnyTopic(topics.clone())));
        filters.push(Some(ReportFilter::WithoutLocation));

        let hint = ScanHint {
            topics: Some(topics),
            location: LocationHint::Absent,
            ..query.hint()
        };
        self.select(hint, &ReportFilter::all_of(filters), query)
    }

    /// Reports that, for some `(topic, radius)` in `topic_radii`, carry the
    /// topic and lie within `radius` meters of `center`
    pub fn get_by_location(
        &self,
        center: GeoPoint,
        topic_radii: &HashMap<String, f64>,
        query: &ReportQuery,
    ) -> Result<Vec<CrowdReport>> {
        center.validate()?;
        if topic_radii.is_empty() {
            return Err(CrowdError::Validation("topic_radii must not be empty".to_string()));
        }

        let mut per_topic = Vec::with_capacity(topic_radii.len());
        let mut bbox: Option<BoundingBox> = None;
        for (topic_id, &radius_m) in topic_radii {
            if !radius_m.is_finite() || radius_m < 0.0 {
                return Err(CrowdError::Validation(format!(
                    "invalid radius for topic {}: {}",
                    topic_id, radius_m
                )));
            }
            let topic_box = BoundingBox::around(&center, radius_m);
            bbox = Some(match bbox {
                Some(b) => b.union(&topic_box),
                None => topic_box,
            });
            per_topic.push(ReportFilter::TopicWithin {
                topic_id: topic_id.clone(),
                center,
                radius_m,
            });
        }

        let mut filters = query.common_filters().to_vec();
        filters.push(Some(ReportFilter::Any(per_topic)));

        let hint = ScanHint {
            topics: Some(topic_radii.keys().cloned().collect()),
            location: bbox.map(LocationHint::Within).unwrap_or_default(),
            ..query.hint()
        };
        self.select(hint, &ReportFilter::all_of(filters), query)
    }

    /// Scan, filter exactly, order and page
    pub(crate) fn select(
        &self,
        hint: ScanHint,
        filter: &ReportFilter,
        query: &ReportQuery,
    ) -> Result<Vec<CrowdReport>> {
        let count = self.page_size(query)?;
        let candidates = self.store.scan(&hint)?;
        let scanned = candidates.len();

        let mut matched: Vec<CrowdReport> = candidates.into_iter().filter(|r| filter.matches(r)).collect();
        matched.sort_by(report_order);
        // Stores may hand back the same report twice; ids are unique keys
        matched.dedup_by(|a, b| a.id == b.id);

        debug!(scanned, matched = matched.len(), offset = query.offset, count, "Evaluated report query");
        Ok(matched.into_iter().skip(query.offset).take(count).collect())
    }

    fn page_size(&self, query: &ReportQuery) -> Result<usize> {
        let count = query.count.unwrap_or(self.default_page_size);
        if count > self.max_page_size {
            return Err(CrowdError::Validation(format!(
                "count {} exceeds maximum page size {}",
                count, self.max_page_size
            )));
        }
        Ok(count)
    }
}
