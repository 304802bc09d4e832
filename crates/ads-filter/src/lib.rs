//! Ad Screening Filter Engine
//!
//! Compiles EasyList-style filter lists into URL and element rules and
//! classifies screened elements against them.
//!
//! # Modules
//!
//! - `pattern`: filter glob syntax to regular expression
//! - `rule`: compiled URL / element rules and their option sets
//! - `parser`: line classification and option parsing
//! - `filter`: the four rule sequences and `is_ad`
//! - `service`: background-side classification, tab bookkeeping and reloads

pub mod filter;
pub mod parser;
pub mod pattern;
pub mod rule;
pub mod service;

pub use filter::{AdQuery, Filter, LoadStats, MatchedRule, RuleCounts, Verdict};
pub use parser::{parse_line, ParsedLine};
pub use pattern::rule_to_regex;
pub use rule::{DomainConstraint, DomainPattern, ElementRule, RuleOptions, UrlRule};
pub use service::{BackgroundService, QueuedCapture, ReloadConfig, TabId, CAPTURE_BATCH_SIZE};

#[cfg(feature = "fetch")]
pub use service::fetch_list;

/// Error type for filter loading.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Failed to fetch filter list '{url}': {reason}")]
    Fetch { url: String, reason: String },
    #[error("Filter state is unavailable: {0}")]
    Poisoned(String),
}
