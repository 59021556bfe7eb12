//! URL to filesystem path mapping
//!
//! Applies the directory strategy (host dirs, protocol dirs, cut-dirs)
//! and the filename restriction modes. Restriction runs per path
//! component so directory names obey the same rules as file names.

use crate::config::{OutputOptions, RestrictMode};
use std::path::PathBuf;
use url::Url;

/// Windows-reserved characters
const WINDOWS_FORBIDDEN: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// Windows-reserved device names (any extension still collides)
const WINDOWS_DEVICES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Maps a URL to its relative on-disk path (under the prefix)
pub fn url_to_relative_path(url: &Url, options: &OutputOptions) -> PathBuf {
    let filename = leaf_filename(url, options);

    if options.no_directories && !options.force_directories {
        return PathBuf::from(filename);
    }

    let mut path = PathBuf::new();

    if !options.no_host_directories {
        if options.protocol_directories {
            path.push(restrict_component(url.scheme(), options));
        }
        let host_dir = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or("unknown"), port),
            None => url.host_str().unwrap_or("unknown").to_string(),
        };
        path.push(restrict_component(&host_dir, options));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    // The last segment is the filename; the rest are directories
    let dirs = segments.len().saturating_sub(1);
    for segment in segments
        .iter()
        .take(dirs)
        .skip(options.cut_dirs as usize)
        .filter(|s| !s.is_empty())
    {
        path.push(restrict_component(segment, options));
    }

    path.push(filename);
    path
}

/// The filename part: last path segment, query appended, directory
/// URLs become index.html
fn leaf_filename(url: &Url, options: &OutputOptions) -> String {
    let last = url
        .path_segments()
        .and_then(|s| s.last())
        .unwrap_or("");

    let mut name = if last.is_empty() {
        "index.html".to_string()
    } else {
        percent_decode(last)
    };

    if let Some(query) = url.query() {
        name.push('?');
        name.push_str(query);
    }

    let restricted = restrict_component(&name, options);
    truncate_preserving_extension(&restricted, options.max_filename_length)
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .to_string()
}

/// Applies the active restriction modes to one path component
pub fn restrict_component(component: &str, options: &OutputOptions) -> String {
    let modes = &options.restrict;
    let mut out = String::with_capacity(component.len());

    for ch in component.chars() {
        let mapped: Option<char> = match ch {
            '/' | '\0' => None,
            c if (c as u32) < 0x20 => {
                if modes.contains(&RestrictMode::Nocontrol) {
                    None
                } else {
                    Some(c)
                }
            }
            c if modes.contains(&RestrictMode::Windows) && WINDOWS_FORBIDDEN.contains(&c) => None,
            c if modes.contains(&RestrictMode::Ascii) && !c.is_ascii() => None,
            c => Some(c),
        };

        match mapped {
            Some(c) => out.push(c),
            None => {
                // Escaped rather than dropped, so distinct names stay distinct
                let mut buf = [0u8; 4];
                for b in ch.encode_utf8(&mut buf).as_bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }

    let mut out = if modes.contains(&RestrictMode::Lower) {
        out.to_lowercase()
    } else if modes.contains(&RestrictMode::Upper) {
        out.to_uppercase()
    } else {
        out
    };

    if modes.contains(&RestrictMode::Windows) {
        let stem = out.split('.').next().unwrap_or("").to_ascii_uppercase();
        if WINDOWS_DEVICES.contains(&stem.as_str()) {
            out.insert(0, '_');
        }
    }

    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Cuts an over-long component down, keeping the extension intact
pub fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= max_len => {
            let ext = &name[dot..];
            let keep = max_len - ext.chars().count();
            let stem: String = name.chars().take(keep).collect();
            format!("{}{}", stem, ext)
        }
        _ => name.chars().take(max_len).collect(),
    }
}
