//! Free-text search language
//!
//! Words and `"quoted phrases"` match report text; `topic_id:`,
//! `reviewed:` and `hidden:` filter on report fields. Terms are ANDed
//! unless joined by `OR`; parentheses group and `NOT`/`-` negate.
//!
//! A parsed [`Expr`] compiles to the same [`ReportFilter`] predicates the
//! structured queries use.

pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;

use crate::error::Result;
use crate::filter::{ReportFilter, TextMatch};

pub use parser::{Expr, FieldFilter};

/// Parse a search string
pub fn parse_query(input: &str) -> Result<Expr> {
    let tokens = lexer::tokenize(input)?;
    parser::parse(tokens, input.len())
}

impl Expr {
    pub fn to_filter(&self) -> ReportFilter {
        match self {
            Expr::And(terms) => ReportFilter::All(terms.iter().map(Expr::to_filter).collect()),
            Expr::Or(terms) => ReportFilter::Any(terms.iter().map(Expr::to_filter).collect()),
            Expr::Not(inner) => ReportFilter::Not(Box::new(inner.to_filter())),
            Expr::Word(text) | Expr::Phrase(text) => ReportFilter::Text(TextMatch::new(text)),
            Expr::Field(FieldFilter::TopicId(topic_id)) => ReportFilter::topic(topic_id.clone()),
            Expr::Field(FieldFilter::Reviewed(reviewed)) => ReportFilter::Reviewed(*reviewed),
            Expr::Field(FieldFilter::Hidden(hidden)) => ReportFilter::Hidden(*hidden),
        }
    }

    /// Topics every match must carry (top-level `topic_id:` conjuncts).
    ///
    /// A store can restrict its scan to reports with any of these.
    pub fn required_topics(&self) -> BTreeSet<String> {
        let conjuncts = match self {
            Expr::And(terms) => terms.as_slice(),
            single => std::slice::from_ref(single),
        };
        conjuncts
            .iter()
            .filter_map(|term| match term {
                Expr::Field(FieldFilter::TopicId(topic_id)) => Some(topic_id.clone()),
                _ => None,
            })
            .collect()
    }
}
