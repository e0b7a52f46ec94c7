//! Crowd Index operator CLI
//!
//! Local front end over a SQLite-backed engine. Every command prints its
//! result as JSON on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Submit a report
//! crowd-index submit "Shelter has 40 available beds" --topic shelter --lat 37.0 --lng -74.0
//!
//! # Vote, or retract by omitting the vote type
//! crowd-index vote <report-id> voter1 anonymous_down
//! crowd-index vote <report-id> voter1
//!
//! # Moderate
//! crowd-index review <report-id> <report-id>
//! crowd-index override <report-id> --down 2 --score -2
//!
//! # Query
//! crowd-index nearby --lat 37.0 --lng -74.0 --radius shelter=500
//! crowd-index search '(beds OR water) topic_id:water reviewed:true' --count 20
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowd_index::{Config, CrowdEngine, GeoPoint, NewCrowdReport, ReportQuery, ScoreOverride, VoteType};

#[derive(Parser, Debug)]
#[command(name = "crowd-index")]
#[command(about = "Crowd-sourced situational reports for disaster response")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CROWD_INDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CROWD_INDEX_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Attempts per vote or moderation update before giving up
    #[arg(long)]
    max_txn_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a new report
    Submit {
        text: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Topic id; repeat for several
        #[arg(long = "topic")]
        topics: Vec<String>,
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
        /// RFC 3339 time the report describes; defaults to now
        #[arg(long)]
        effective: Option<DateTime<Utc>>,
    },

    /// Cast, change or (without a vote type) retract a vote
    Vote {
        report_id: String,
        voter: String,
        /// anonymous_up, anonymous_down, reviewer_up or reviewer_down
        vote_type: Option<VoteType>,
    },

    /// Mark reports as reviewed
    Review {
        #[arg(required = true)]
        report_ids: Vec<String>,
        /// Clear the flag instead of setting it
        #[arg(long)]
        unset: bool,
    },

    /// Override a report's score fields
    Override {
        report_id: String,
        #[arg(long, default_value_t = 0)]
        up: u32,
        #[arg(long, default_value_t = 0)]
        down: u32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        score: i64,
        #[arg(long)]
        hidden: bool,
    },

    /// Print one report
    Show { report_id: String },

    /// Reports by an author
    Author {
        author: String,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Reports tagged with any of the topics
    Topics {
        #[arg(required = true)]
        topics: Vec<String>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Reports tagged with any of the topics that have no location
    Unlocated {
        #[arg(required = true)]
        topics: Vec<String>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Reports near a point
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// TOPIC=METERS; repeat for several topics
        #[arg(long = "radius", required = true, value_parser = parse_radius)]
        radii: Vec<(String, f64)>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Free-text search
    Search {
        query: String,
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct PageArgs {
    /// Page size; the configured default when omitted
    #[arg(long)]
    count: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    reviewed: Option<bool>,
    #[arg(long)]
    hidden: Option<bool>,
    /// Only reports last updated at or before this RFC 3339 time
    #[arg(long)]
    max_updated: Option<DateTime<Utc>>,
}

impl PageArgs {
    fn into_query(self) -> ReportQuery {
        ReportQuery {
            count: self.count,
            offset: self.offset,
            reviewed: self.reviewed,
            hidden: self.hidden,
            author: None,
            max_updated: self.max_updated,
        }
    }
}

fn parse_radius(s: &str) -> Result<(String, f64), String> {
    let (topic, meters) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TOPIC=METERS, got '{}'", s))?;
    let meters: f64 = meters
        .parse()
        .map_err(|e| format!("invalid radius '{}': {}", meters, e))?;
    Ok((topic.to_string(), meters))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("crowd_index=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(attempts) = args.max_txn_attempts {
        config.max_txn_attempts = attempts;
    }

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let engine = CrowdEngine::open(config)?;

    match args.command {
        Command::Submit {
            text,
            id,
            author,
            topics,
            lat,
            lng,
            effective,
        } => {
            let mut input = NewCrowdReport::new(text).with_topics(topics);
            input.id = id;
            input.author = author;
            input.effective = effective;
            if let (Some(lat), Some(lng)) = (lat, lng) {
                input.location = Some(GeoPoint::new(lat, lng)?);
            }
            print_json(&engine.submit(input)?)
        }
        Command::Vote {
            report_id,
            voter,
            vote_type,
        } => print_json(&engine.vote(&report_id, &voter, vote_type)?),
        Command::Review { report_ids, unset } => print_json(&engine.mark_reviewed(&report_ids, !unset)?),
        Command::Override {
            report_id,
            up,
            down,
            score,
            hidden,
        } => {
            let values = ScoreOverride {
                upvote_count: up,
                downvote_count: down,
                score,
                hidden,
            };
            print_json(&engine.put_score(&report_id, values)?)
        }
        Command::Show { report_id } => match engine.get(&report_id)? {
            Some(report) => print_json(&report),
            None => anyhow::bail!("Report not found: {}", report_id),
        },
        Command::Author { author, page } => {
            print_json(&engine.get_for_author(Some(&author), &page.into_query())?)
        }
        Command::Topics { topics, page } => print_json(&engine.get_for_topics(topics, &page.into_query())?),
        Command::Unlocated { topics, page } => {
            print_json(&engine.get_without_location(topics, &page.into_query())?)
        }
        Command::Nearby { lat, lng, radii, page } => {
            let center = GeoPoint::new(lat, lng)?;
            let radii: HashMap<String, f64> = radii.into_iter().collect();
            print_json(&engine.get_by_location(center, &radii, &page.into_query())?)
        }
        Command::Search { query, page } => print_json(&engine.search_page(&query, &page.into_query())?),
    }
}
