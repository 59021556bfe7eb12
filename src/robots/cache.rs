//! Per-host robots cache

use crate::robots::rules::RobotsRules;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Entries are refreshed after this long
const ENTRY_TTL_HOURS: i64 = 24;

/// Give up and allow everything after this many failed fetches
const MAX_FETCH_FAILURES: u32 = 3;

/// What robots.txt resolution produced for a host
#[derive(Debug, Clone)]
pub enum RobotsOutcome {
    /// No usable robots.txt (missing, 4xx, repeated fetch failure)
    AllowAll,

    /// Everything disallowed
    DenyAll,

    /// Parsed rules to consult per URL
    Rules(RobotsRules),
}

/// A cached robots.txt resolution for one `(scheme, host, port)`
#[derive(Debug, Clone)]
pub struct RobotsEntry {
    pub outcome: RobotsOutcome,
    pub fetched_at: DateTime<Utc>,
}

impl RobotsEntry {
    pub fn new(outcome: RobotsOutcome) -> Self {
        Self {
            outcome,
            fetched_at: Utc::now(),
        }
    }

    /// True once the entry is older than the refresh interval
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(ENTRY_TTL_HOURS)
    }

    /// Checks a URL against this entry
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.outcome {
            RobotsOutcome::AllowAll => true,
            RobotsOutcome::DenyAll => false,
            RobotsOutcome::Rules(rules) => rules.is_allowed(url, user_agent),
        }
    }

    /// Crawl-delay from the rules, if any
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        match &self.outcome {
            RobotsOutcome::Rules(rules) => rules.crawl_delay(user_agent),
            _ => None,
        }
    }
}

/// Robots.txt cache keyed by host key
#[derive(Debug, Default)]
pub struct RobotsCache {
    entries: HashMap<String, RobotsEntry>,
    failures: HashMap<String, u32>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fresh entry for a host, or None when a fetch is needed
    pub fn lookup(&self, host_key: &str) -> Option<&RobotsEntry> {
        self.entries.get(host_key).filter(|e| !e.is_stale())
    }

    /// Records a completed robots.txt fetch
    ///
    /// Status mapping: 2xx parses the body, 4xx allows everything.
    /// 5xx is *not* stored here; the caller treats it as a transient
    /// failure and calls `record_failure`.
    pub fn insert_fetched(&mut self, host_key: &str, status: u16, body: &str) {
        let outcome = if (200..300).contains(&status) {
            if body.trim().is_empty() {
                RobotsOutcome::AllowAll
            } else {
                RobotsOutcome::Rules(RobotsRules::from_content(body))
            }
        } else {
            RobotsOutcome::AllowAll
        };

        self.failures.remove(host_key);
        self.entries
            .insert(host_key.to_string(), RobotsEntry::new(outcome));
    }

    /// Records a failed fetch attempt
    ///
    /// # Returns
    ///
    /// `true` once the failure budget is spent; the host is then cached
    /// as allow-all and no further fetches are attempted.
    pub fn record_failure(&mut self, host_key: &str) -> bool {
        let count = self.failures.entry(host_key.to_string()).or_insert(0);
        *count += 1;

        if *count >= MAX_FETCH_FAILURES {
            tracing::warn!(
                "robots.txt for {} failed {} times, assuming allow-all",
                host_key,
                count
            );
            self.entries
                .insert(host_key.to_string(), RobotsEntry::new(RobotsOutcome::AllowAll));
            self.failures.remove(host_key);
            return true;
        }
        false
    }

    /// Inserts a ready-made entry (tests, deny-all policies)
    pub fn insert_entry(&mut self, host_key: &str, entry: RobotsEntry) {
        self.entries.insert(host_key.to_string(), entry);
    }
}
