//! Redirect tracking
//!
//! One tracker lives for the duration of a logical request. It counts
//! hops, detects loops through a visited set, and decides which request
//! headers survive a cross-origin hop.

use crate::{UrlError, WebgrabError};
use std::collections::HashSet;
use url::Url;

/// A validated redirect hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    pub target: Url,
    /// Authorization must not leak across origins
    pub keep_authorization: bool,
}

/// Tracks one logical request through its redirect hops
#[derive(Debug)]
pub struct RedirectTracker {
    max_redirects: u32,
    visited: HashSet<String>,
    origin: Url,
}

impl RedirectTracker {
    /// Creates a tracker rooted at the original request URL
    pub fn new(origin: Url, max_redirects: u32) -> Self {
        let mut visited = HashSet::new();
        visited.insert(origin.to_string());
        Self {
            max_redirects,
            visited,
            origin,
        }
    }

    /// Number of hops taken so far
    pub fn hops(&self) -> u32 {
        (self.visited.len() as u32).saturating_sub(1)
    }

    /// Resolves and validates one redirect hop
    ///
    /// # Arguments
    ///
    /// * `current` - The URL that answered with the redirect
    /// * `location` - The raw Location header value
    ///
    /// # Returns
    ///
    /// * `Ok(RedirectHop)` - The hop to take
    /// * `Err(WebgrabError)` - Limit exceeded, loop, or bad target
    pub fn follow(
        &mut self,
        current: &Url,
        location: &str,
    ) -> Result<RedirectHop, WebgrabError> {
        let target = current
            .join(location.trim())
            .map_err(|_| UrlError::Malformed(format!("bad redirect target {:?}", location)))?;

        match target.scheme() {
            "http" | "https" => {}
            other => {
                return Err(UrlError::InvalidScheme(other.to_string()).into());
            }
        }

        if self.hops() >= self.max_redirects {
            return Err(WebgrabError::RedirectLimit {
                url: self.origin.to_string(),
            });
        }

        if !self.visited.insert(target.to_string()) {
            return Err(WebgrabError::RedirectCycle {
                url: target.to_string(),
            });
        }

        Ok(RedirectHop {
            keep_authorization: same_origin(&self.origin, &target),
            target,
        })
    }
}

/// Same scheme, host and port
fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_follow_absolute() {
        let origin = url("https://example.com/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        let hop = tracker.follow(&origin, "https://example.com/b").unwrap();
        assert_eq!(hop.target, url("https://example.com/b"));
        assert!(hop.keep_authorization);
        assert_eq!(tracker.hops(), 1);
    }

    #[test]
    fn test_follow_relative() {
        let origin = url("https://example.com/dir/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        let hop = tracker.follow(&origin, "../b").unwrap();
        assert_eq!(hop.target.as_str(), "https://example.com/b");
    }

    #[test]
    fn test_cross_origin_drops_authorization() {
        let origin = url("https://example.com/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        let hop = tracker.follow(&origin, "https://other.net/b").unwrap();
        assert!(!hop.keep_authorization);
    }

    #[test]
    fn test_scheme_change_drops_authorization() {
        let origin = url("http://example.com/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        let hop = tracker.follow(&origin, "https://example.com/b").unwrap();
        assert!(!hop.keep_authorization);
    }

    #[test]
    fn test_loop_detected() {
        let a = url("https://example.com/a");
        let b = url("https://example.com/b");
        let mut tracker = RedirectTracker::new(a.clone(), 5);

        tracker.follow(&a, "https://example.com/b").unwrap();
        let result = tracker.follow(&b, "https://example.com/a");
        assert!(matches!(result, Err(WebgrabError::RedirectCycle { .. })));
    }

    #[test]
    fn test_hop_limit() {
        let origin = url("https://example.com/0");
        let mut tracker = RedirectTracker::new(origin, 2);

        let mut current = url("https://example.com/0");
        for i in 1..=2 {
            let hop = tracker
                .follow(&current, &format!("https://example.com/{}", i))
                .unwrap();
            current = hop.target;
        }

        let result = tracker.follow(&current, "https://example.com/3");
        assert!(matches!(result, Err(WebgrabError::RedirectLimit { .. })));
    }

    #[test]
    fn test_non_http_target_rejected() {
        let origin = url("https://example.com/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        let result = tracker.follow(&origin, "ftp://example.com/b");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_target_rejected() {
        let origin = url("https://example.com/a");
        let mut tracker = RedirectTracker::new(origin.clone(), 5);

        // A scheme-relative URL with no host still joins; use something
        // that genuinely cannot parse
        let result = tracker.follow(&origin, "https://");
        assert!(result.is_err());
    }
}
