//! CSS link extraction
//!
//! Stylesheets reference further resources through `url(...)` tokens
//! and `@import` rules. Both resolve against the stylesheet's own URL.

use crate::frontier::LinkType;
use crate::scrape::{ExtractedLink, LinkKind};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn url_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'"()\s]+)['"]?\s*\)"#).expect("static pattern")
    })
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@import\s+['"]([^'"]+)['"]"#).expect("static pattern"))
}

/// Extracts resource references from a stylesheet
pub fn extract_css_links(css: &str, base_url: &Url) -> Vec<ExtractedLink> {
    let mut links = Vec::new();

    for captures in import_re().captures_iter(css) {
        if let Some(url) = resolve(&captures[1], base_url) {
            links.push(ExtractedLink {
                url,
                kind: LinkKind::PageRequisite,
                link_type: Some(LinkType::Css),
            });
        }
    }

    for captures in url_token_re().captures_iter(css) {
        let target = &captures[1];
        if let Some(url) = resolve(target, base_url) {
            // @import url(...) was already captured above
            if links.iter().any(|l| l.url == url) {
                continue;
            }
            let link_type = if target.ends_with(".css") {
                Some(LinkType::Css)
            } else {
                Some(LinkType::Media)
            };
            links.push(ExtractedLink {
                url,
                kind: LinkKind::PageRequisite,
                link_type,
            });
        }
    }

    links
}

fn resolve(target: &str, base: &Url) -> Option<String> {
    let target = target.trim();
    if target.is_empty() || target.starts_with("data:") {
        return None;
    }
    match base.join(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/css/site.css").unwrap()
    }

    #[test]
    fn test_url_token() {
        let links = extract_css_links("body { background: url(bg.png); }", &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/css/bg.png");
        assert_eq!(links[0].kind, LinkKind::PageRequisite);
        assert_eq!(links[0].link_type, Some(LinkType::Media));
    }

    #[test]
    fn test_quoted_url_tokens() {
        let links = extract_css_links(
            r#"a { background: url("a.png"); } b { background: url('b.png'); }"#,
            &base(),
        );
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_import_rule() {
        let links = extract_css_links(r#"@import "reset.css";"#, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/css/reset.css");
        assert_eq!(links[0].link_type, Some(LinkType::Css));
    }

    #[test]
    fn test_import_url_form_not_duplicated() {
        let links = extract_css_links(r#"@import url("reset.css");"#, &base());
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_data_uri_skipped() {
        let links = extract_css_links(
            "a { background: url(data:image/png;base64,AAAA); }",
            &base(),
        );
        assert!(links.is_empty());
    }

    #[test]
    fn test_absolute_url() {
        let links = extract_css_links(
            "a { background: url(https://cdn.example.net/x.png); }",
            &base(),
        );
        assert_eq!(links[0].url, "https://cdn.example.net/x.png");
    }

    #[test]
    fn test_nested_css_import_type() {
        let links = extract_css_links("a { behavior: url(extra.css); }", &base());
        assert_eq!(links[0].link_type, Some(LinkType::Css));
    }
}
