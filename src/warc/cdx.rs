//! CDX index maintenance
//!
//! One space-separated line per response record, eleven columns:
//! `N b a m s k r M S V g`. Readers treat `-` as absent.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// One CDX line's worth of data
#[derive(Debug, Clone)]
pub struct CdxEntry {
    /// Original URL
    pub url: String,
    /// 14-digit capture timestamp (YYYYMMDDhhmmss)
    pub timestamp: String,
    /// Response MIME type
    pub mime: Option<String>,
    /// HTTP status code
    pub status: u16,
    /// Payload digest label
    pub checksum: Option<String>,
    /// Redirect target, for 3xx responses
    pub redirect: Option<String>,
    /// Compressed record size in the WARC
    pub record_size: u64,
    /// Byte offset of the record in the WARC
    pub offset: u64,
    /// WARC file name
    pub filename: String,
}

/// Appends CDX lines next to the WARC output
pub struct CdxWriter {
    file: File,
    path: PathBuf,
}

impl CdxWriter {
    /// Creates (or appends to) the index file, writing the header line
    /// on creation
    pub fn open(path: &Path, append: bool) -> io::Result<Self> {
        let fresh = !append || !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let mut writer = Self {
            file,
            path: path.to_path_buf(),
        };
        if fresh && writer.file.metadata()?.len() == 0 {
            writeln!(writer.file, " CDX N b a m s k r M S V g")?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry
    pub fn write_entry(&mut self, entry: &CdxEntry) -> io::Result<()> {
        writeln!(
            self.file,
            "{} {} {} {} {} {} {} {} {} {} {}",
            massaged_url(&entry.url),
            entry.timestamp,
            entry.url,
            entry.mime.as_deref().unwrap_or("-"),
            entry.status,
            entry
                .checksum
                .as_deref()
                .map(strip_digest_scheme)
                .unwrap_or("-"),
            entry.redirect.as_deref().unwrap_or("-"),
            "-",
            entry.record_size,
            entry.offset,
            entry.filename,
        )?;
        self.file.flush()
    }
}

/// The lookup key column: lowercased, scheme dropped
fn massaged_url(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower)
        .to_string()
}

/// CDX checksums carry the bare base32 value
fn strip_digest_scheme(label: &str) -> &str {
    label.strip_prefix("sha1:").unwrap_or(label)
}
