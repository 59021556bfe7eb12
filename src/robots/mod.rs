//! Robots.txt handling
//!
//! Per-host robots.txt rules with a TTL cache. The engine fetches
//! `/robots.txt` through the normal fetcher (bypassing the filter
//! chain) and feeds the outcome in here; lookups afterwards are local.

mod cache;
mod rules;

pub use cache::{RobotsCache, RobotsEntry, RobotsOutcome};
pub use rules::RobotsRules;
