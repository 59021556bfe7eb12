//! Mozilla cookies.txt load/save
//!
//! Seven tab-separated columns per line: domain, subdomain flag, path,
//! secure flag, expiry (unix seconds, 0 for session), name, value.
//! Lines starting with `#` are comments, except the `#HttpOnly_`
//! prefix some tools emit, which still carries a cookie.

use crate::cookies::jar::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Loads cookies from a cookies.txt file into the jar
///
/// Unparseable lines are skipped with a debug log.
pub fn load_cookies_txt(jar: &mut CookieJar, path: &Path) -> std::io::Result<usize> {
    let content = fs::read_to_string(path)?;
    let mut loaded = 0;

    for line in content.lines() {
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Some(cookie) => {
                jar.insert(cookie);
                loaded += 1;
            }
            None => tracing::debug!("Skipping malformed cookies.txt line: {:?}", line),
        }
    }

    Ok(loaded)
}

/// Writes the jar to a cookies.txt file
///
/// Session cookies are only written when `keep_session` is set.
pub fn save_cookies_txt(
    jar: &CookieJar,
    path: &Path,
    keep_session: bool,
) -> std::io::Result<usize> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "# Netscape HTTP Cookie File")?;

    let mut saved = 0;
    for cookie in jar.iter() {
        if cookie.is_session() && !keep_session {
            continue;
        }

        let domain_field = if cookie.host_only {
            cookie.domain.clone()
        } else {
            format!(".{}", cookie.domain)
        };

        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            domain_field,
            if cookie.host_only { "FALSE" } else { "TRUE" },
            cookie.path,
            if cookie.secure { "TRUE" } else { "FALSE" },
            cookie.expires.map(|e| e.timestamp()).unwrap_or(0),
            cookie.name,
            cookie.value,
        )?;
        saved += 1;
    }

    Ok(saved)
}

fn parse_line(line: &str) -> Option<Cookie> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }

    let raw_domain = fields[0];
    let host_only = !raw_domain.starts_with('.') && fields[1].eq_ignore_ascii_case("FALSE");
    let domain = raw_domain.trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return None;
    }

    let expires_secs: i64 = fields[4].parse().ok()?;
    let expires = if expires_secs == 0 {
        None
    } else {
        DateTime::<Utc>::from_timestamp(expires_secs, 0)
    };

    Some(Cookie {
        name: fields[5].to_string(),
        value: fields[6].to_string(),
        domain,
        host_only,
        path: fields[2].to_string(),
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        expires,
        created: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let mut jar = CookieJar::new();
        jar.store_response(
            &Url::parse("https://example.com/").unwrap(),
            &[
                "persistent=1; Domain=example.com; Max-Age=86400".to_string(),
                "session=2".to_string(),
            ],
        );

        let saved = save_cookies_txt(&jar, &path, true).unwrap();
        assert_eq!(saved, 2);

        let mut loaded_jar = CookieJar::new();
        let loaded = load_cookies_txt(&mut loaded_jar, &path).unwrap();
        assert_eq!(loaded, 2);
        assert!(loaded_jar
            .header_for(&Url::parse("https://example.com/").unwrap())
            .is_some());
    }

    #[test]
    fn test_session_cookies_dropped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let mut jar = CookieJar::new();
        jar.store_response(
            &Url::parse("https://example.com/").unwrap(),
            &["session=2".to_string()],
        );

        let saved = save_cookies_txt(&jar, &path, false).unwrap();
        assert_eq!(saved, 0);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(
            &path,
            "# Netscape HTTP Cookie File\n\n.example.com\tTRUE\t/\tFALSE\t0\ta\t1\n",
        )
        .unwrap();

        let mut jar = CookieJar::new();
        assert_eq!(load_cookies_txt(&mut jar, &path).unwrap(), 1);
    }

    #[test]
    fn test_httponly_prefix_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(
            &path,
            "#HttpOnly_.example.com\tTRUE\t/\tFALSE\t0\ta\t1\n",
        )
        .unwrap();

        let mut jar = CookieJar::new();
        assert_eq!(load_cookies_txt(&mut jar, &path).unwrap(), 1);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        fs::write(&path, "only\tthree\tfields\n").unwrap();

        let mut jar = CookieJar::new();
        assert_eq!(load_cookies_txt(&mut jar, &path).unwrap(), 0);
    }
}
