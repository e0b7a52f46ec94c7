//! Crowd Index - crowd-sourced situational reports for disaster response
//!
//! Field workers and the public submit short geo-tagged reports tagged with
//! topics. Anyone may vote on a report; a report whose score falls to the
//! hide threshold is flagged hidden. Moderators mark reports reviewed and
//! may override the derived score fields.
//!
//! ## Architecture
//!
//! - **Store** ([`store`]): reports, topic sets and votes behind
//!   [`ReportStore`], with SQLite and in-memory implementations
//! - **Vote ledger** ([`ledger`]): one vote per (report, voter), folded
//!   into the report aggregate in a single optimistic unit of work
//! - **Index** ([`index`]): author, topic, no-location and radius queries
//! - **Search** ([`query`]): boolean free-text search compiled to the same
//!   [`ReportFilter`] predicates the index uses
//! - **Engine** ([`engine`]): the facade applications hold
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/crowd-index/
//! ├── reports.db             # SQLite database (WAL)
//! └── config.toml            # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geo;
pub mod index;
pub mod ledger;
pub mod model;
pub mod query;
pub mod score;
pub mod store;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::CrowdEngine;
pub use error::{CrowdError, Result};
pub use filter::ReportFilter;
pub use geo::GeoPoint;
pub use index::{ReportIndex, ReportQuery};
pub use ledger::VoteLedger;
pub use model::{CrowdReport, CrowdVote, NewCrowdReport, ScoreOverride, VoteType};
pub use store::{MemoryReportStore, ReportStore, SqliteReportStore};
