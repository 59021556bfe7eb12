//! HTML link extraction
//!
//! Walks the parsed document for navigational links and page
//! requisites. Which tags contribute is steered by the follow/ignore
//! tag lists; a `<base href>` re-roots relative resolution.

use crate::config::PolicyOptions;
use crate::frontier::LinkType;
use crate::scrape::{ExtractedLink, LinkKind};
use scraper::{Html, Selector};
use url::Url;

/// (tag, attribute, kind, link type) table driving extraction
const LINK_SOURCES: &[(&str, &str, LinkKind, Option<LinkType>)] = &[
    ("a", "href", LinkKind::LinkedPage, None),
    ("area", "href", LinkKind::LinkedPage, None),
    ("frame", "src", LinkKind::PageRequisite, Some(LinkType::Html)),
    ("iframe", "src", LinkKind::PageRequisite, Some(LinkType::Html)),
    ("img", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("embed", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("source", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("audio", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("video", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("video", "poster", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("input", "src", LinkKind::PageRequisite, Some(LinkType::Media)),
    ("script", "src", LinkKind::ScriptSrc, Some(LinkType::Js)),
];

/// Extracts links from an HTML document
pub fn extract_html_links(
    html: &str,
    base_url: &Url,
    policy: &PolicyOptions,
) -> Vec<ExtractedLink> {
    let document = Html::parse_document(html);
    let base = effective_base(&document, base_url);
    let mut links = Vec::new();

    for (tag, attr, kind, link_type) in LINK_SOURCES {
        if !tag_enabled(tag, policy) {
            continue;
        }
        let selector = match Selector::parse(&format!("{}[{}]", tag, attr)) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in document.select(&selector) {
            if let Some(value) = element.value().attr(attr) {
                if let Some(url) = resolve(value, &base) {
                    links.push(ExtractedLink {
                        url,
                        kind: *kind,
                        link_type: *link_type,
                    });
                }
            }
        }
    }

    if tag_enabled("link", policy) {
        links.extend(extract_link_elements(&document, &base));
    }

    if tag_enabled("img", policy) {
        links.extend(extract_srcset(&document, &base));
    }

    links
}

/// `<link rel=...>` carries stylesheets and icons; other rel values
/// (canonical, alternate) navigate
fn extract_link_elements(document: &Html, base: &Url) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    let selector = match Selector::parse("link[href]") {
        Ok(s) => s,
        Err(_) => return links,
    };

    for element in document.select(&selector) {
        let rel = element
            .value()
            .attr("rel")
            .unwrap_or("")
            .to_ascii_lowercase();
        let href = match element.value().attr("href") {
            Some(h) => h,
            None => continue,
        };
        let url = match resolve(href, base) {
            Some(u) => u,
            None => continue,
        };

        if rel.contains("stylesheet") {
            links.push(ExtractedLink {
                url,
                kind: LinkKind::PageRequisite,
                link_type: Some(LinkType::Css),
            });
        } else if rel.contains("icon") {
            links.push(ExtractedLink {
                url,
                kind: LinkKind::PageRequisite,
                link_type: Some(LinkType::Media),
            });
        } else if rel.contains("canonical") || rel.contains("alternate") {
            links.push(ExtractedLink {
                url,
                kind: LinkKind::LinkedPage,
                link_type: None,
            });
        }
    }

    links
}

/// Every candidate URL in img/source srcset attributes
fn extract_srcset(document: &Html, base: &Url) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    for tag in ["img", "source"] {
        let selector = match Selector::parse(&format!("{}[srcset]", tag)) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in document.select(&selector) {
            let srcset = element.value().attr("srcset").unwrap_or("");
            for candidate in srcset.split(',') {
                let url_part = candidate.trim().split_whitespace().next().unwrap_or("");
                if let Some(url) = resolve(url_part, base) {
                    links.push(ExtractedLink {
                        url,
                        kind: LinkKind::PageRequisite,
                        link_type: Some(LinkType::Media),
                    });
                }
            }
        }
    }
    links
}

fn tag_enabled(tag: &str, policy: &PolicyOptions) -> bool {
    if policy.ignore_tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return false;
    }
    if policy.follow_tags.is_empty() {
        return true;
    }
    policy.follow_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// The document base: an absolute `<base href>` wins over the URL the
/// document was fetched from
fn effective_base(document: &Html, base_url: &Url) -> Url {
    let selector = match Selector::parse("base[href]") {
        Ok(s) => s,
        Err(_) => return base_url.clone(),
    };
    document
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .unwrap_or_else(|| base_url.clone())
}

fn resolve(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base.join(href) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "ftp") => Some(url.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page.html").unwrap()
    }

    fn extract(html: &str) -> Vec<ExtractedLink> {
        extract_html_links(html, &base(), &PolicyOptions::default())
    }

    #[test]
    fn test_anchor_links() {
        let links = extract(r#"<a href="/abs">a</a><a href="rel">b</a>"#);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://example.com/abs");
        assert_eq!(links[1].url, "https://example.com/dir/rel");
        assert_eq!(links[0].kind, LinkKind::LinkedPage);
    }

    #[test]
    fn test_image_is_requisite() {
        let links = extract(r#"<img src="logo.png">"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::PageRequisite);
        assert_eq!(links[0].link_type, Some(LinkType::Media));
    }

    #[test]
    fn test_script_src() {
        let links = extract(r#"<script src="app.js"></script>"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::ScriptSrc);
        assert_eq!(links[0].link_type, Some(LinkType::Js));
    }

    #[test]
    fn test_stylesheet_link() {
        let links = extract(r#"<link rel="stylesheet" href="style.css">"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::PageRequisite);
        assert_eq!(links[0].link_type, Some(LinkType::Css));
    }

    #[test]
    fn test_icon_link() {
        let links = extract(r#"<link rel="icon" href="favicon.ico">"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::PageRequisite);
    }

    #[test]
    fn test_canonical_is_navigational() {
        let links = extract(r#"<link rel="canonical" href="https://example.com/canon">"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::LinkedPage);
    }

    #[test]
    fn test_special_schemes_skipped() {
        let links = extract(
            r##"<a href="javascript:void(0)">x</a>
               <a href="mailto:a@b.c">m</a>
               <a href="tel:+123">t</a>
               <a href="data:text/plain,hi">d</a>
               <a href="#frag">f</a>"##,
        );
        assert!(links.is_empty());
    }

    #[test]
    fn test_base_href_reroots() {
        let links = extract(r#"<base href="https://cdn.example.net/assets/"><img src="x.png">"#);
        assert_eq!(links[0].url, "https://cdn.example.net/assets/x.png");
    }

    #[test]
    fn test_iframe_requisite() {
        let links = extract(r#"<iframe src="inner.html"></iframe>"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::PageRequisite);
        assert_eq!(links[0].link_type, Some(LinkType::Html));
    }

    #[test]
    fn test_srcset_candidates() {
        let links = extract(r#"<img srcset="small.png 1x, large.png 2x">"#);
        assert_eq!(links.len(), 2);
        assert!(links.iter().any(|l| l.url.ends_with("small.png")));
        assert!(links.iter().any(|l| l.url.ends_with("large.png")));
    }

    #[test]
    fn test_ignore_tags() {
        let mut policy = PolicyOptions::default();
        policy.ignore_tags = vec!["img".to_string()];
        let links = extract_html_links(
            r#"<a href="/a">a</a><img src="x.png">"#,
            &base(),
            &policy,
        );
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/a");
    }

    #[test]
    fn test_follow_tags_restricts() {
        let mut policy = PolicyOptions::default();
        policy.follow_tags = vec!["img".to_string()];
        let links = extract_html_links(
            r#"<a href="/a">a</a><img src="x.png">"#,
            &base(),
            &policy,
        );
        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("x.png"));
    }

    #[test]
    fn test_truncated_document_keeps_found_links() {
        // Parser is lenient; a chopped document still yields what it saw
        let links = extract(r#"<a href="/one">1</a><a href="/two"#);
        assert!(!links.is_empty());
        assert_eq!(links[0].url, "https://example.com/one");
    }
}
