//! URL record definitions for frontier bookkeeping

use std::fmt;

/// Processing state of a URL in the frontier
///
/// Transitions are monotonic: Todo -> InProgress -> {Done | Error}.
/// Skipped is terminal and assigned when a filter rejects the URL.
/// A record left InProgress by a crashed process is flipped back to
/// Todo during startup recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    /// Waiting to be checked out
    Todo,

    /// Checked out by a running task
    InProgress,

    /// Fetched and fully processed
    Done,

    /// Terminal failure (retries exhausted or non-retryable)
    Error,

    /// Rejected by the filter chain; never fetched
    Skipped,
}

impl UrlStatus {
    /// Returns true if no further processing will happen for this URL
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Skipped)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 5] {
        [
            Self::Todo,
            Self::InProgress,
            Self::Done,
            Self::Error,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Document kind a URL was discovered in (or fetched as)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Html,
    Css,
    Js,
    Media,
    Sitemap,
    Robots,
}

impl LinkType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Js => "js",
            Self::Media => "media",
            Self::Sitemap => "sitemap",
            Self::Robots => "robots",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "css" => Some(Self::Css),
            "js" => Some(Self::Js),
            "media" => Some(Self::Media),
            "sitemap" => Some(Self::Sitemap),
            "robots" => Some(Self::Robots),
            _ => None,
        }
    }
}

/// One URL's bookkeeping entry in the frontier
#[derive(Debug, Clone)]
pub struct UrlRecord {
    /// Canonical URL string
    pub url: String,

    /// Hex SHA-1 of the canonical form without fragment; unique
    pub url_key: String,

    /// The page that linked to this URL
    pub parent_url: Option<String>,

    /// The seed URL that (transitively) introduced this URL
    pub root_url: Option<String>,

    pub status: UrlStatus,

    /// Fetch attempts so far
    pub try_count: u32,

    /// Recursion depth from the nearest seed (seeds are level 0)
    pub level: u32,

    /// True if this URL is a page requisite rather than a linked page
    pub inline: bool,

    /// Kind of document this URL was discovered in
    pub link_type: Option<LinkType>,

    /// Request body for POST fetches
    pub post_data: Option<String>,

    /// Referer header to send, normally the parent URL
    pub referer: Option<String>,

    /// HTTP status of the completed fetch
    pub status_code: Option<u16>,

    /// Local path the body was saved to
    pub filename: Option<String>,
}

impl UrlRecord {
    /// Creates a seed record at level 0
    pub fn seed(url: &str, url_key: &str) -> Self {
        Self {
            url: url.to_string(),
            url_key: url_key.to_string(),
            parent_url: None,
            root_url: Some(url.to_string()),
            status: UrlStatus::Todo,
            try_count: 0,
            level: 0,
            inline: false,
            link_type: None,
            post_data: None,
            referer: None,
            status_code: None,
            filename: None,
        }
    }

    /// Creates a child record discovered on `parent`
    pub fn child(url: &str, url_key: &str, parent: &UrlRecord, inline: bool) -> Self {
        Self {
            url: url.to_string(),
            url_key: url_key.to_string(),
            parent_url: Some(parent.url.clone()),
            root_url: parent.root_url.clone().or_else(|| Some(parent.url.clone())),
            status: UrlStatus::Todo,
            try_count: 0,
            level: parent.level + 1,
            inline,
            link_type: None,
            post_data: None,
            referer: Some(parent.url.clone()),
            status_code: None,
            filename: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in UrlStatus::all() {
            let s = status.to_db_string();
            assert_eq!(UrlStatus::from_db_string(s), Some(status));
        }
    }

    #[test]
    fn test_status_unknown_string() {
        assert_eq!(UrlStatus::from_db_string("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!UrlStatus::Todo.is_terminal());
        assert!(!UrlStatus::InProgress.is_terminal());
        assert!(UrlStatus::Done.is_terminal());
        assert!(UrlStatus::Error.is_terminal());
        assert!(UrlStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_link_type_roundtrip() {
        for lt in [
            LinkType::Html,
            LinkType::Css,
            LinkType::Js,
            LinkType::Media,
            LinkType::Sitemap,
            LinkType::Robots,
        ] {
            assert_eq!(LinkType::from_db_string(lt.to_db_string()), Some(lt));
        }
    }

    #[test]
    fn test_seed_record() {
        let rec = UrlRecord::seed("https://example.com/", "abc");
        assert_eq!(rec.level, 0);
        assert_eq!(rec.status, UrlStatus::Todo);
        assert_eq!(rec.root_url.as_deref(), Some("https://example.com/"));
        assert!(rec.parent_url.is_none());
    }

    #[test]
    fn test_child_inherits_root_and_level() {
        let seed = UrlRecord::seed("https://example.com/", "abc");
        let child = UrlRecord::child("https://example.com/a", "def", &seed, false);
        assert_eq!(child.level, 1);
        assert_eq!(child.root_url.as_deref(), Some("https://example.com/"));
        assert_eq!(child.parent_url.as_deref(), Some("https://example.com/"));
        assert_eq!(child.referer.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_child_inline_flag() {
        let seed = UrlRecord::seed("https://example.com/", "abc");
        let child = UrlRecord::child("https://example.com/img.png", "def", &seed, true);
        assert!(child.inline);
    }
}
