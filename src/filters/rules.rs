//! The standard filter predicates

use crate::config::{PolicyOptions, SpanHostsAllow};
use crate::filters::UrlFilter;
use crate::frontier::UrlRecord;
use crate::stats::Stats;
use regex::Regex;
use std::sync::Arc;
use url::Url;

/// Accepts http and https URLs, plus ftp when following FTP is enabled
pub struct SchemeFilter {
    allow_ftp: bool,
}

impl SchemeFilter {
    pub fn new(allow_ftp: bool) -> Self {
        Self { allow_ftp }
    }
}

impl UrlFilter for SchemeFilter {
    fn name(&self) -> &'static str {
        "scheme"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        match url.scheme() {
            "http" | "https" => true,
            "ftp" => self.allow_ftp,
            _ => false,
        }
    }
}

/// Bounds recursion depth
///
/// Seeds (level 0) always pass. Linked pages need recursion enabled
/// and a level within the budget. Page requisites draw on their own
/// budget on top of the page that needs them, so a leaf page's images
/// still arrive when the page itself sits at the depth limit.
pub struct RecursiveFilter {
    recursive: bool,
    level: u32,
    page_requisites: bool,
    requisites_level: u32,
}

impl RecursiveFilter {
    pub fn new(policy: &PolicyOptions) -> Self {
        Self {
            recursive: policy.recursive,
            level: policy.level,
            page_requisites: policy.page_requisites,
            requisites_level: policy.page_requisites_level,
        }
    }
}

impl UrlFilter for RecursiveFilter {
    fn name(&self) -> &'static str {
        "recursive"
    }

    fn check(&self, record: &UrlRecord, _url: &Url) -> bool {
        if record.level == 0 {
            return true;
        }
        if record.inline {
            return self.page_requisites && record.level <= self.level + self.requisites_level;
        }
        self.recursive && record.level <= self.level
    }
}

/// Keeps the crawl on the seed's host unless spanning is allowed
pub struct SpanHostsFilter {
    span_hosts: bool,
    allow: Vec<SpanHostsAllow>,
}

impl SpanHostsFilter {
    pub fn new(policy: &PolicyOptions) -> Self {
        Self {
            span_hosts: policy.span_hosts,
            allow: policy.span_hosts_allow.clone(),
        }
    }

    fn host_of(url_str: &str) -> Option<String> {
        Url::parse(url_str)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }
}

impl UrlFilter for SpanHostsFilter {
    fn name(&self) -> &'static str {
        "span_hosts"
    }

    fn check(&self, record: &UrlRecord, url: &Url) -> bool {
        if self.span_hosts {
            return true;
        }

        let root_host = record.root_url.as_deref().and_then(Self::host_of);
        let url_host = url.host_str().map(|h| h.to_string());

        match (root_host, url_host) {
            (Some(root), Some(host)) if root == host => true,
            (Some(root), Some(_)) => {
                if record.inline {
                    // Direct requisites only: the page needing them must
                    // still be on the seed host.
                    self.allow.contains(&SpanHostsAllow::PageRequisites)
                        && record
                            .parent_url
                            .as_deref()
                            .and_then(Self::host_of)
                            .map(|p| p == root)
                            .unwrap_or(false)
                } else {
                    self.allow.contains(&SpanHostsAllow::LinkedPages)
                        && record
                            .parent_url
                            .as_deref()
                            .and_then(Self::host_of)
                            .map(|p| p == root)
                            .unwrap_or(false)
                }
            }
            // No root to compare against (hand-seeded URL)
            _ => true,
        }
    }

    fn exempt_for_redirects(&self) -> bool {
        true
    }
}

/// Include/exclude lists of hostname suffixes
pub struct DomainsFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl DomainsFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    fn matches_suffix(host: &str, domain: &str) -> bool {
        host == domain || host.ends_with(&format!(".{}", domain))
    }
}

impl UrlFilter for DomainsFilter {
    fn name(&self) -> &'static str {
        "domains"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h,
            None => return false,
        };

        if self
            .exclude
            .iter()
            .any(|d| Self::matches_suffix(host, d))
        {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|d| Self::matches_suffix(host, d))
    }

    fn exempt_for_redirects(&self) -> bool {
        true
    }
}

/// Include/exclude lists of exact hostnames
pub struct HostnamesFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl HostnamesFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }
}

impl UrlFilter for HostnamesFilter {
    fn name(&self) -> &'static str {
        "hostnames"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h,
            None => return false,
        };

        if self.exclude.iter().any(|h| h == host) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|h| h == host)
    }

    fn exempt_for_redirects(&self) -> bool {
        true
    }
}

/// Accept/reject regular expressions over the whole URL
pub struct RegexFilter {
    accept: Option<Regex>,
    reject: Option<Regex>,
}

impl RegexFilter {
    pub fn new(accept: Option<&str>, reject: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            accept: accept.map(Regex::new).transpose()?,
            reject: reject.map(Regex::new).transpose()?,
        })
    }
}

impl UrlFilter for RegexFilter {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        let s = url.as_str();
        if let Some(reject) = &self.reject {
            if reject.is_match(s) {
                return false;
            }
        }
        if let Some(accept) = &self.accept {
            return accept.is_match(s);
        }
        true
    }
}

/// Include/exclude path prefixes
pub struct DirectoriesFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl DirectoriesFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    fn matches_prefix(path: &str, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        path == prefix || path.starts_with(&format!("{}/", prefix))
    }
}

impl UrlFilter for DirectoriesFilter {
    fn name(&self) -> &'static str {
        "directories"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        let path = url.path();

        if self
            .exclude
            .iter()
            .any(|p| Self::matches_prefix(path, p))
        {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|p| Self::matches_prefix(path, p))
    }
}

/// Never ascend above the seed's directory
///
/// Page requisites are exempt; a stylesheet one level up is still
/// needed to render the page.
pub struct ParentFilter;

impl UrlFilter for ParentFilter {
    fn name(&self) -> &'static str {
        "parent"
    }

    fn check(&self, record: &UrlRecord, url: &Url) -> bool {
        if record.inline {
            return true;
        }

        let root = match record.root_url.as_deref().and_then(|r| Url::parse(r).ok()) {
            Some(r) => r,
            None => return true,
        };

        if root.host_str() != url.host_str() {
            // A different host has no parent relation to the seed path
            return true;
        }

        let base_dir = parent_directory(root.path());
        url.path().starts_with(&base_dir)
    }
}

/// Directory portion of a path, with trailing slash
fn parent_directory(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    }
}

/// Cross-protocol policy: HTML pages link to FTP only when enabled
pub struct FollowFtpFilter {
    follow_ftp: bool,
}

impl FollowFtpFilter {
    pub fn new(follow_ftp: bool) -> Self {
        Self { follow_ftp }
    }
}

impl UrlFilter for FollowFtpFilter {
    fn name(&self) -> &'static str {
        "follow_ftp"
    }

    fn check(&self, record: &UrlRecord, url: &Url) -> bool {
        if url.scheme() != "ftp" {
            return true;
        }
        // FTP seeds are fine; only crossing over from HTTP needs the flag
        match record.parent_url.as_deref().and_then(|p| Url::parse(p).ok()) {
            Some(parent) if parent.scheme() != "ftp" => self.follow_ftp,
            _ => true,
        }
    }
}

/// Accepts only https URLs
pub struct HttpsOnlyFilter;

impl UrlFilter for HttpsOnlyFilter {
    fn name(&self) -> &'static str {
        "https_only"
    }

    fn check(&self, _record: &UrlRecord, url: &Url) -> bool {
        url.scheme() == "https"
    }
}

/// Rejects everything once the byte quota is spent
pub struct QuotaFilter {
    limit: u64,
    stats: Arc<Stats>,
}

impl QuotaFilter {
    pub fn new(limit: u64, stats: Arc<Stats>) -> Self {
        Self { limit, stats }
    }
}

impl UrlFilter for QuotaFilter {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn check(&self, _record: &UrlRecord, _url: &Url) -> bool {
        self.stats.bytes_in() < self.limit
    }
}
