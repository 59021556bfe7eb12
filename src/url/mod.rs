//! URL canonicalization and dedup keys
//!
//! Every URL entering the crawl is reduced to two forms: the *fetch URL*
//! (what goes on the wire, fragment included) and the *key* (a digest of
//! the canonical form with the fragment stripped, used for frontier
//! deduplication).

mod normalize;

pub use normalize::{canonicalize, canonicalize_in_base, CanonicalUrl};

use url::Url;

/// Returns the host portion of a URL suitable for per-host bookkeeping.
///
/// IPv6 literals keep their brackets so that `(host, port)` keys parse
/// back unambiguously.
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default().unwrap_or(0);
    Some(format!("{}:{}:{}", url.scheme(), host, port))
}

/// Extracts the hostname from a URL, or None for non-network URLs.
pub fn hostname(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_string())
}
