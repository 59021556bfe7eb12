//! URL acceptance filters
//!
//! Each filter is an independent predicate over a frontier record. The
//! chain evaluates every filter and reports the names of those that
//! failed, so a skip can always say why. A URL is accepted only when
//! every filter passes.
//!
//! Robots.txt is not part of this chain: it needs a network fetch, so
//! the engine consults the robots cache as a separate pipeline stage
//! after the chain accepts a URL.

mod rules;

pub use rules::{
    DirectoriesFilter, DomainsFilter, FollowFtpFilter, HostnamesFilter, HttpsOnlyFilter,
    ParentFilter, QuotaFilter, RecursiveFilter, RegexFilter, SchemeFilter, SpanHostsFilter,
};

use crate::config::PolicyOptions;
use crate::frontier::UrlRecord;
use crate::stats::Stats;
use std::sync::Arc;
use url::Url;

/// One acceptance predicate
pub trait UrlFilter: Send + Sync {
    /// Short name reported when the filter rejects a URL
    fn name(&self) -> &'static str;

    /// Returns true if the URL passes this filter
    fn check(&self, record: &UrlRecord, url: &Url) -> bool;

    /// Redirect targets skip filters that return true here, so a
    /// requested resource is not lost to a cross-host redirect.
    fn exempt_for_redirects(&self) -> bool {
        false
    }
}

/// Outcome of running a URL through the chain
#[derive(Debug, Clone)]
pub struct FilterVerdict {
    /// Names of the filters that rejected the URL
    pub failed: Vec<&'static str>,
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered set of filters
pub struct FilterChain {
    filters: Vec<Box<dyn UrlFilter>>,
}

impl FilterChain {
    /// Builds the standard chain from policy options
    ///
    /// # Arguments
    ///
    /// * `policy` - Acceptance policy
    /// * `quota` - Byte cap, with the shared counter it is checked against
    ///
    /// # Returns
    ///
    /// * `Ok(FilterChain)` - Ready chain
    /// * `Err(regex::Error)` - An accept/reject pattern did not compile
    pub fn from_policy(
        policy: &PolicyOptions,
        quota: Option<(u64, Arc<Stats>)>,
    ) -> Result<Self, regex::Error> {
        let mut filters: Vec<Box<dyn UrlFilter>> = vec![
            Box::new(SchemeFilter::new(policy.follow_ftp)),
            Box::new(RecursiveFilter::new(policy)),
            Box::new(SpanHostsFilter::new(policy)),
            Box::new(DomainsFilter::new(
                policy.domains.clone(),
                policy.exclude_domains.clone(),
            )),
            Box::new(HostnamesFilter::new(
                policy.hostnames.clone(),
                policy.exclude_hostnames.clone(),
            )),
            Box::new(DirectoriesFilter::new(
                policy.include_directories.clone(),
                policy.exclude_directories.clone(),
            )),
            Box::new(FollowFtpFilter::new(policy.follow_ftp)),
        ];

        if policy.accept_regex.is_some() || policy.reject_regex.is_some() {
            filters.push(Box::new(RegexFilter::new(
                policy.accept_regex.as_deref(),
                policy.reject_regex.as_deref(),
            )?));
        }
        if policy.no_parent {
            filters.push(Box::new(ParentFilter));
        }
        if policy.https_only {
            filters.push(Box::new(HttpsOnlyFilter));
        }
        if let Some((limit, stats)) = quota {
            filters.push(Box::new(QuotaFilter::new(limit, stats)));
        }

        Ok(Self { filters })
    }

    /// Builds an empty chain that accepts everything (for tests)
    pub fn empty() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Runs every filter over the URL
    pub fn evaluate(&self, record: &UrlRecord, url: &Url) -> FilterVerdict {
        self.evaluate_inner(record, url, false)
    }

    /// Runs the chain for a redirect target
    ///
    /// Host-scoping filters are skipped so the redirected resource is
    /// still fetched. Disabled by clearing `strong_redirects`, in which
    /// case the caller uses `evaluate`.
    pub fn evaluate_redirect(&self, record: &UrlRecord, url: &Url) -> FilterVerdict {
        self.evaluate_inner(record, url, true)
    }

    fn evaluate_inner(&self, record: &UrlRecord, url: &Url, redirect: bool) -> FilterVerdict {
        let mut failed = Vec::new();

        for filter in &self.filters {
            if redirect && filter.exempt_for_redirects() {
                continue;
            }
            if !filter.check(record, url) {
                failed.push(filter.name());
            }
        }

        FilterVerdict { failed }
    }
}
