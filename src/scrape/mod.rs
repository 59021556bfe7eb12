//! Link extraction
//!
//! Given a fetched document, the dispatcher picks an extractor by
//! content type (falling back to the file extension) and returns the
//! links found. Extractors are tolerant: whatever was found before a
//! parse stumble is kept, and an unrecognized document simply yields
//! nothing.

mod css;
mod html;
mod sitemap;

pub use css::extract_css_links;
pub use html::extract_html_links;
pub use sitemap::extract_sitemap_links;

use crate::config::PolicyOptions;
use crate::frontier::LinkType;
use url::Url;

/// How a discovered link relates to its document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Navigational link to another page
    LinkedPage,

    /// Resource needed to render the page
    PageRequisite,

    /// Script source (a requisite with its own label)
    ScriptSrc,

    /// URL listed in a sitemap
    SitemapEntry,
}

impl LinkKind {
    /// Requisites and scripts are inline; they render the page rather
    /// than navigate away from it.
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::PageRequisite | Self::ScriptSrc)
    }
}

/// One link pulled out of a document
#[derive(Debug, Clone)]
pub struct ExtractedLink {
    /// Absolute URL, resolved against the document base
    pub url: String,
    pub kind: LinkKind,
    /// Kind of document the link points at, when the markup says
    pub link_type: Option<LinkType>,
}

/// Routes a document to the right extractor
///
/// # Arguments
///
/// * `content_type` - Bare MIME type from the response, if any
/// * `base_url` - The document's own URL
/// * `body` - Document bytes
/// * `policy` - Tag follow/ignore lists for HTML
pub fn extract_links(
    content_type: Option<&str>,
    base_url: &Url,
    body: &[u8],
    policy: &PolicyOptions,
) -> Vec<ExtractedLink> {
    match route(content_type, base_url) {
        Some(DocumentKind::Html) => {
            extract_html_links(&String::from_utf8_lossy(body), base_url, policy)
        }
        Some(DocumentKind::Css) => extract_css_links(&String::from_utf8_lossy(body), base_url),
        Some(DocumentKind::Sitemap) => {
            extract_sitemap_links(&String::from_utf8_lossy(body), base_url)
        }
        None => Vec::new(),
    }
}

enum DocumentKind {
    Html,
    Css,
    Sitemap,
}

fn route(content_type: Option<&str>, base_url: &Url) -> Option<DocumentKind> {
    if let Some(ct) = content_type {
        match ct {
            "text/html" | "application/xhtml+xml" => return Some(DocumentKind::Html),
            "text/css" => return Some(DocumentKind::Css),
            "application/xml" | "text/xml" | "application/gzip" => {
                // XML at a sitemap-looking path
                if base_url.path().contains("sitemap") {
                    return Some(DocumentKind::Sitemap);
                }
                return None;
            }
            _ => {}
        }
    }

    // No usable content type; guess from the extension
    let path = base_url.path().to_ascii_lowercase();
    if path.ends_with(".html") || path.ends_with(".htm") || path.ends_with('/') {
        Some(DocumentKind::Html)
    } else if path.ends_with(".css") {
        Some(DocumentKind::Css)
    } else if path.ends_with(".xml") && path.contains("sitemap") {
        Some(DocumentKind::Sitemap)
    } else {
        None
    }
}
