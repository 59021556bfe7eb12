//! In-memory cookie jar

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use url::Url;

/// Upper bound on one cookie's name + value bytes
const MAX_COOKIE_BYTES: usize = 4096;

/// Upper bound on cookies stored per domain
const MAX_COOKIES_PER_DOMAIN: usize = 50;

/// One stored cookie
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,

    /// Domain the cookie applies to, without a leading dot
    pub domain: String,

    /// True when the cookie only matches the exact host that set it
    pub host_only: bool,

    pub path: String,
    pub secure: bool,

    /// None for session cookies
    pub expires: Option<DateTime<Utc>>,

    /// Insertion time, used for stable ordering
    pub created: DateTime<Utc>,
}

impl Cookie {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(exp) if exp <= now)
    }

    pub fn is_session(&self) -> bool {
        self.expires.is_none()
    }

    fn matches_domain(&self, host: &str) -> bool {
        if self.host_only {
            return host == self.domain;
        }
        host == self.domain || host.ends_with(&format!(".{}", self.domain))
    }

    fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        if !request_path.starts_with(&self.path) {
            return false;
        }
        self.path.ends_with('/')
            || request_path.as_bytes().get(self.path.len()) == Some(&b'/')
    }
}

/// Cookie storage keyed by `(domain, path, name)`
#[derive(Debug, Default)]
pub struct CookieJar {
    /// Cookies grouped per domain key
    store: HashMap<String, Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every Set-Cookie header of one response
    ///
    /// Invalid or oversized cookies are dropped with a debug log,
    /// never an error; servers send junk routinely.
    pub fn store_response(&mut self, url: &Url, set_cookie_values: &[String]) {
        for value in set_cookie_values {
            match parse_set_cookie(value, url) {
                Some(cookie) => self.insert(cookie),
                None => tracing::debug!("Ignoring unusable Set-Cookie: {:?}", value),
            }
        }
    }

    /// Inserts one cookie, replacing any existing `(domain, path, name)`
    pub fn insert(&mut self, cookie: Cookie) {
        if cookie.name.len() + cookie.value.len() > MAX_COOKIE_BYTES {
            tracing::debug!("Cookie {} exceeds size cap, dropped", cookie.name);
            return;
        }

        let entries = self.store.entry(cookie.domain.clone()).or_default();

        if let Some(existing) = entries
            .iter_mut()
            .find(|c| c.name == cookie.name && c.path == cookie.path)
        {
            // Replacement keeps the original creation time
            let created = existing.created;
            *existing = cookie;
            existing.created = created;
            return;
        }

        if entries.len() >= MAX_COOKIES_PER_DOMAIN {
            // Evict the oldest to stay under the cap
            if let Some(oldest) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.created)
                .map(|(i, _)| i)
            {
                entries.remove(oldest);
            }
        }

        entries.push(cookie);
    }

    /// Cookies applicable to a request, in header order
    ///
    /// Longer paths come first; ties break on creation time, oldest
    /// first. Expired cookies are purged on the way through.
    pub fn cookies_for(&mut self, url: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        let host = match url.host_str() {
            Some(h) => h.to_string(),
            None => return Vec::new(),
        };
        let path = url.path();
        let secure_transport = url.scheme() == "https";

        for entries in self.store.values_mut() {
            entries.retain(|c| !c.is_expired(now));
        }

        let mut matched: Vec<Cookie> = self
            .store
            .values()
            .flatten()
            .filter(|c| c.matches_domain(&host))
            .filter(|c| c.matches_path(path))
            .filter(|c| !c.secure || secure_transport)
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then(a.created.cmp(&b.created))
        });
        matched
    }

    /// Builds a Cookie header value, or None when nothing matches
    pub fn header_for(&mut self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// All stored cookies (for persistence)
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.store.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.store.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses one Set-Cookie header value in the context of a request URL
///
/// Returns None when the cookie must be rejected: no name, a domain
/// attribute that does not cover the request host, or a dotless domain
/// attribute (a public suffix by any reasonable reading).
fn parse_set_cookie(value: &str, url: &Url) -> Option<Cookie> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut parts = value.split(';');

    let (name, val) = parts.next()?.split_once('=')?;
    let name = name.trim();
    let val = val.trim();
    if name.is_empty() {
        return None;
    }

    let mut domain: Option<String> = None;
    let mut path: Option<String> = None;
    let mut expires: Option<DateTime<Utc>> = None;
    let mut max_age: Option<i64> = None;
    let mut secure = false;

    for attr in parts {
        let attr = attr.trim();
        let (key, attr_value) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr, ""),
        };

        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let d = attr_value.trim_start_matches('.').to_ascii_lowercase();
                if !d.is_empty() {
                    domain = Some(d);
                }
            }
            "path" => {
                if attr_value.starts_with('/') {
                    path = Some(attr_value.to_string());
                }
            }
            "expires" => {
                expires = DateTime::parse_from_rfc2822(attr_value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "max-age" => {
                max_age = attr_value.parse().ok();
            }
            "secure" => secure = true,
            _ => {}
        }
    }

    let (domain, host_only) = match domain {
        Some(d) => {
            // The attribute must cover the request host, and a dotless
            // attribute is a public suffix grab.
            if !d.contains('.') && d != host {
                return None;
            }
            if host != d && !host.ends_with(&format!(".{}", d)) {
                return None;
            }
            (d, false)
        }
        None => (host, true),
    };

    // Max-Age wins over Expires
    let expires = match max_age {
        Some(secs) => Some(Utc::now() + Duration::seconds(secs)),
        None => expires,
    };

    Some(Cookie {
        name: name.to_string(),
        value: val.to_string(),
        domain,
        host_only,
        path: path.unwrap_or_else(|| default_path(url)),
        secure,
        expires,
        created: Utc::now(),
    })
}

/// Default cookie path: the directory of the request path
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_store_and_lookup() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["session=abc123".to_string()],
        );

        let header = jar.header_for(&url("https://example.com/page")).unwrap();
        assert_eq!(header, "session=abc123");
    }

    #[test]
    fn test_host_only_does_not_match_subdomain() {
        let mut jar = CookieJar::new();
        jar.store_response(&url("https://example.com/"), &["a=1".to_string()]);

        assert!(jar.header_for(&url("https://sub.example.com/")).is_none());
    }

    #[test]
    fn test_domain_attribute_matches_subdomains() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Domain=example.com".to_string()],
        );

        assert!(jar.header_for(&url("https://sub.example.com/")).is_some());
    }

    #[test]
    fn test_foreign_domain_rejected() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Domain=other.net".to_string()],
        );
        assert!(jar.is_empty());
    }

    #[test]
    fn test_dotless_domain_rejected() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Domain=com".to_string()],
        );
        assert!(jar.is_empty());
    }

    #[test]
    fn test_secure_cookie_needs_https() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Secure".to_string()],
        );

        assert!(jar.header_for(&url("http://example.com/")).is_none());
        assert!(jar.header_for(&url("https://example.com/")).is_some());
    }

    #[test]
    fn test_path_matching() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Path=/docs".to_string()],
        );

        assert!(jar.header_for(&url("https://example.com/docs")).is_some());
        assert!(jar.header_for(&url("https://example.com/docs/x")).is_some());
        assert!(jar.header_for(&url("https://example.com/docsx")).is_none());
        assert!(jar.header_for(&url("https://example.com/other")).is_none());
    }

    #[test]
    fn test_header_order_longest_path_first() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/docs/sub/page"),
            &[
                "outer=1; Path=/".to_string(),
                "inner=2; Path=/docs/sub".to_string(),
            ],
        );

        let header = jar
            .header_for(&url("https://example.com/docs/sub/page"))
            .unwrap();
        assert_eq!(header, "inner=2; outer=1");
    }

    #[test]
    fn test_expired_cookie_purged_at_lookup() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Max-Age=0".to_string()],
        );

        assert!(jar.header_for(&url("https://example.com/")).is_none());
        assert!(jar.is_empty());
    }

    #[test]
    fn test_max_age_wins_over_expires() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/"),
            &["a=1; Expires=Tue, 01 Jan 2030 00:00:00 GMT; Max-Age=0".to_string()],
        );
        assert!(jar.header_for(&url("https://example.com/")).is_none());
    }

    #[test]
    fn test_oversized_cookie_dropped() {
        let mut jar = CookieJar::new();
        let big = "v".repeat(MAX_COOKIE_BYTES + 1);
        jar.store_response(&url("https://example.com/"), &[format!("a={}", big)]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_per_domain_cap_evicts_oldest() {
        let mut jar = CookieJar::new();
        for i in 0..MAX_COOKIES_PER_DOMAIN + 1 {
            jar.store_response(
                &url("https://example.com/"),
                &[format!("c{}=v", i)],
            );
        }
        assert_eq!(jar.len(), MAX_COOKIES_PER_DOMAIN);
        // c0 was the oldest
        assert!(!jar
            .iter()
            .any(|c| c.name == "c0"));
    }

    #[test]
    fn test_replacement_updates_value() {
        let mut jar = CookieJar::new();
        jar.store_response(&url("https://example.com/"), &["a=1".to_string()]);
        jar.store_response(&url("https://example.com/"), &["a=2".to_string()]);

        assert_eq!(jar.len(), 1);
        let header = jar.header_for(&url("https://example.com/")).unwrap();
        assert_eq!(header, "a=2");
    }

    #[test]
    fn test_nameless_cookie_rejected() {
        let mut jar = CookieJar::new();
        jar.store_response(&url("https://example.com/"), &["=bare".to_string()]);
        jar.store_response(&url("https://example.com/"), &["noequals".to_string()]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_default_path_is_request_directory() {
        let mut jar = CookieJar::new();
        jar.store_response(
            &url("https://example.com/docs/page.html"),
            &["a=1".to_string()],
        );

        assert!(jar.header_for(&url("https://example.com/docs/other")).is_some());
        assert!(jar.header_for(&url("https://example.com/elsewhere")).is_none());
    }
}
