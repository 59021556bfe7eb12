//! Sitemap link extraction
//!
//! Handles both urlset and sitemapindex documents; `<loc>` entries in
//! an index point at further sitemaps and are tagged so the engine can
//! route them back through this extractor.

use crate::frontier::LinkType;
use crate::scrape::{ExtractedLink, LinkKind};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn loc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<loc>\s*([^<\s]+)\s*</loc>").expect("static pattern"))
}

/// Extracts URL entries from a sitemap document
pub fn extract_sitemap_links(xml: &str, base_url: &Url) -> Vec<ExtractedLink> {
    let is_index = xml.contains("<sitemapindex");
    let mut links = Vec::new();

    for captures in loc_re().captures_iter(xml) {
        let target = html_unescape(&captures[1]);
        if let Ok(url) = base_url.join(target.trim()) {
            if matches!(url.scheme(), "http" | "https") {
                links.push(ExtractedLink {
                    url: url.to_string(),
                    kind: LinkKind::SitemapEntry,
                    link_type: if is_index {
                        Some(LinkType::Sitemap)
                    } else {
                        None
                    },
                });
            }
        }
    }

    links
}

/// The handful of escapes sitemap generators actually emit
fn html_unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/sitemap.xml").unwrap()
    }

    #[test]
    fn test_urlset_entries() {
        let xml = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://example.com/a</loc></url>
              <url><loc>https://example.com/b</loc></url>
            </urlset>"#;
        let links = extract_sitemap_links(xml, &base());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].kind, LinkKind::SitemapEntry);
        assert_eq!(links[0].link_type, None);
    }

    #[test]
    fn test_sitemapindex_entries_tagged() {
        let xml = r#"<sitemapindex>
              <sitemap><loc>https://example.com/sitemap-1.xml</loc></sitemap>
            </sitemapindex>"#;
        let links = extract_sitemap_links(xml, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, Some(LinkType::Sitemap));
    }

    #[test]
    fn test_entities_unescaped() {
        let xml = "<urlset><url><loc>https://example.com/a?x=1&amp;y=2</loc></url></urlset>";
        let links = extract_sitemap_links(xml, &base());
        assert_eq!(links[0].url, "https://example.com/a?x=1&y=2");
    }

    #[test]
    fn test_whitespace_tolerated() {
        let xml = "<urlset><url><loc>\n  https://example.com/a \n</loc></url></urlset>";
        let links = extract_sitemap_links(xml, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/a");
    }

    #[test]
    fn test_garbage_yields_nothing() {
        let links = extract_sitemap_links("not xml at all", &base());
        assert!(links.is_empty());
    }
}
