use crate::UrlError;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use sha1::{Digest, Sha1};
use url::Url;

/// Characters that must be escaped inside a path segment on top of controls.
const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// A URL reduced to its canonical forms
///
/// `fetch` is what the wire sees (fragment preserved). `key` identifies
/// the URL in the frontier: a hex SHA-1 over the canonical string with
/// the fragment removed, so `page#a` and `page#b` dedup to one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    /// The URL to put on the wire
    pub fetch: Url,

    /// Hex SHA-1 digest of the canonical form without fragment
    pub key: String,
}

impl CanonicalUrl {
    /// The canonical string form without the fragment (the keyed form).
    pub fn keyed_string(&self) -> String {
        let mut stripped = self.fetch.clone();
        stripped.set_fragment(None);
        stripped.to_string()
    }

    /// The hostname of the fetch URL, if any.
    pub fn host(&self) -> Option<&str> {
        self.fetch.host_str()
    }
}

/// Canonicalizes a URL string
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an http, https or ftp scheme
/// 3. Lowercase scheme and host (the parser also converts IDN hosts
///    to their Punycode A-label form)
/// 4. Drop default ports (80, 443, 21)
/// 5. Resolve `.` and `..` path segments and collapse consecutive
///    slashes; percent-encode non-ASCII path bytes as UTF-8
/// 6. Keep query items in their original order
/// 7. Keep the fragment on the fetch URL, strip it from the key
///
/// # Arguments
///
/// * `url_str` - The URL string to canonicalize
///
/// # Returns
///
/// * `Ok(CanonicalUrl)` - Canonical fetch URL plus dedup key
/// * `Err(UrlError)` - The input could not be parsed
pub fn canonicalize(url_str: &str) -> Result<CanonicalUrl, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    canonicalize_url(url)
}

/// Canonicalizes a possibly-relative URL against a base
///
/// Used for links discovered in documents, where `href` values are
/// usually relative.
pub fn canonicalize_in_base(base: &Url, href: &str) -> Result<CanonicalUrl, UrlError> {
    let url = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(e.to_string()))?;
    canonicalize_url(url)
}

fn canonicalize_url(mut url: Url) -> Result<CanonicalUrl, UrlError> {
    match url.scheme() {
        "http" | "https" | "ftp" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    // The url crate already lowercases scheme and host, punycodes IDN
    // hosts, strips default ports and resolves dot segments at parse
    // time. What remains is slash collapsing and path re-encoding.
    let path = url.path().to_string();
    let normalized = normalize_path(&path);
    if normalized != path {
        url.set_path(&normalized);
    }

    let key = key_for(&url);

    Ok(CanonicalUrl { fetch: url, key })
}

/// Collapses consecutive slashes and percent-encodes what the parser
/// left raw. The leading slash is always preserved.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;

    for segment in path.split('/') {
        if segment.is_empty() {
            if !prev_slash {
                out.push('/');
                prev_slash = true;
            }
            continue;
        }
        if !prev_slash {
            out.push('/');
        }
        out.extend(utf8_percent_encode(segment, PATH_ESCAPE));
        prev_slash = false;
    }

    if out.is_empty() {
        out.push('/');
    }
    out
}

fn key_for(url: &Url) -> String {
    let mut stripped = url.clone();
    stripped.set_fragment(None);

    let mut hasher = Sha1::new();
    hasher.update(stripped.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
