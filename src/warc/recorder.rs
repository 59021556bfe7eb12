//! WARC file writing
//!
//! The recorder owns the output file exclusively. Appends are guarded
//! by an offset journal: the journal always names the last known-good
//! end of file, so after a crash the file can be truncated back to a
//! whole number of records. A file whose journal survived a crash is
//! never silently appended to.

use crate::config::WarcOptions;
use crate::fetcher::Exchange;
use crate::frontier::VisitRecord;
use crate::warc::cdx::{CdxEntry, CdxWriter};
use crate::warc::record::{digest_label, RecordBuilder, RecordType, WARC_DATE_FORMAT};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the WARC recorder
#[derive(Debug, Error)]
pub enum WarcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "{0} has a journal from an interrupted run; truncate it to the \
         journaled offset (or remove the stale file) before appending"
    )]
    StaleJournal(PathBuf),
}

/// What got recorded for one response
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub record_id: String,
    pub payload_digest: Option<String>,
    pub warc_date: String,
    /// True when a revisit record stood in for the response
    pub revisit: bool,
}

/// Serialized writer for one WARC output (a numbered sequence of files)
pub struct WarcRecorder {
    options: WarcOptions,
    file: File,
    path: PathBuf,
    /// Known-good end of file
    offset: u64,
    /// Next file number; numbered naming kicks in with rotation/append
    sequence: u32,
    numbered: bool,
    cdx: Option<CdxWriter>,
    log_lines: Vec<String>,
    finished_files: Vec<PathBuf>,
}

impl WarcRecorder {
    /// Opens the recording, writing the leading warcinfo record
    ///
    /// Without `append`, an existing file is overwritten and any stale
    /// journal discarded. With `append`, a stale journal is an error,
    /// and recording continues in the next numbered file so existing
    /// records are never rewritten.
    pub fn open(options: WarcOptions) -> Result<Self, WarcError> {
        let numbered = options.max_size.is_some() || options.append;
        let mut sequence = 0;

        let path = if options.append {
            // First unused slot in the sequence
            loop {
                let candidate = file_path(&options, sequence, numbered);
                if !candidate.exists() {
                    break candidate;
                }
                if journal_path(&candidate).exists() {
                    return Err(WarcError::StaleJournal(candidate));
                }
                sequence += 1;
            }
        } else {
            let path = file_path(&options, sequence, numbered);
            let journal = journal_path(&path);
            if journal.exists() {
                std::fs::remove_file(&journal)?;
            }
            path
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let cdx = if options.cdx {
            let cdx_path = PathBuf::from(format!("{}.cdx", options.prefix));
            Some(CdxWriter::open(&cdx_path, options.append)?)
        } else {
            None
        };

        let mut recorder = Self {
            options,
            file,
            path,
            offset: 0,
            sequence,
            numbered,
            cdx,
            log_lines: Vec::new(),
            finished_files: Vec::new(),
        };
        recorder.write_warcinfo()?;
        Ok(recorder)
    }

    /// Path of the file currently being written
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Records one completed HTTP exchange as a request/response pair
    ///
    /// When `revisit_of` names an earlier visit with the same payload
    /// digest, a revisit record replaces the response record and the
    /// body is not stored again.
    pub fn record_exchange(
        &mut self,
        exchange: &Exchange,
        target_uri: &str,
        revisit_of: Option<&VisitRecord>,
    ) -> Result<RecordedResponse, WarcError> {
        let date = Utc::now().format(WARC_DATE_FORMAT).to_string();
        let ip = exchange
            .remote_addr
            .as_deref()
            .map(|a| a.split(':').next().unwrap_or(a).to_string());

        let payload_digest = if self.options.digests {
            Some(digest_label(exchange.body.reader()?)?)
        } else {
            None
        };

        // Ids first so the pair can cross-reference
        let request_builder = RecordBuilder::new(RecordType::Request);
        let request_id = request_builder.record_id().to_string();
        let response_type = if revisit_of.is_some() {
            RecordType::Revisit
        } else {
            RecordType::Response
        };
        let response_builder = RecordBuilder::new(response_type);
        let response_id = response_builder.record_id().to_string();

        // Request record
        let mut request_block = exchange.request.head_bytes();
        if let Some(body) = &exchange.request.body {
            request_block.extend_from_slice(body.as_bytes());
        }
        let request_header = request_builder
            .field("WARC-Date", &date)
            .field("WARC-Target-URI", target_uri)
            .field_opt("WARC-IP-Address", ip.as_deref())
            .field("WARC-Concurrent-To", &response_id)
            .field_opt(
                "WARC-Block-Digest",
                block_digest(&self.options, &request_block)?.as_deref(),
            )
            .content_type("application/http;msgtype=request")
            .into_header_bytes(request_block.len() as u64);
        self.append_record(&request_header, &mut io::Cursor::new(&request_block))?;

        // Response (or revisit) record
        let response_head = exchange.head_bytes();
        let mut builder = response_builder
            .field("WARC-Date", &date)
            .field("WARC-Target-URI", target_uri)
            .field_opt("WARC-IP-Address", ip.as_deref())
            .field("WARC-Concurrent-To", &request_id)
            .field_opt("WARC-Payload-Digest", payload_digest.as_deref());

        let (offset, size) = if let Some(original) = revisit_of {
            builder = builder
                .field(
                    "WARC-Profile",
                    "http://netpreserve.org/warc/1.0/revisit/identical-payload-digest",
                )
                .field("WARC-Refers-To", &original.warc_record_id)
                .field("WARC-Refers-To-Target-URI", &original.target_uri)
                .field("WARC-Refers-To-Date", &original.warc_date)
                .field_opt(
                    "WARC-Block-Digest",
                    block_digest(&self.options, &response_head)?.as_deref(),
                )
                .content_type("application/http;msgtype=response");
            let header = builder.into_header_bytes(response_head.len() as u64);
            self.append_record(&header, &mut io::Cursor::new(&response_head))?
        } else {
            let block_len = response_head.len() as u64 + exchange.body.len();
            let block_digest = if self.options.digests {
                let chained =
                    io::Cursor::new(&response_head[..]).chain(exchange.body.reader()?);
                Some(digest_label(chained)?)
            } else {
                None
            };
            builder = builder
                .field_opt("WARC-Block-Digest", block_digest.as_deref())
                .content_type("application/http;msgtype=response");
            let header = builder.into_header_bytes(block_len);
            let mut block = io::Cursor::new(&response_head[..]).chain(exchange.body.reader()?);
            self.append_record(&header, &mut block)?
        };

        if let Some(cdx) = &mut self.cdx {
            cdx.write_entry(&CdxEntry {
                url: target_uri.to_string(),
                timestamp: Utc::now().format("%Y%m%d%H%M%S").to_string(),
                mime: exchange.content_type(),
                status: exchange.status,
                checksum: payload_digest.clone(),
                redirect: exchange.header("location").map(|s| s.to_string()),
                record_size: size,
                offset,
                filename: self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            })?;
        }

        self.maybe_rotate()?;

        Ok(RecordedResponse {
            record_id: response_id,
            payload_digest,
            warc_date: date,
            revisit: revisit_of.is_some(),
        })
    }

    /// Records an exchange that failed before response headers arrived
    pub fn record_failure(&mut self, target_uri: &str, description: &str) -> Result<(), WarcError> {
        let date = Utc::now().format(WARC_DATE_FORMAT).to_string();
        let body = format!("{}\r\n", description);
        let header = RecordBuilder::new(RecordType::Metadata)
            .field("WARC-Date", &date)
            .field("WARC-Target-URI", target_uri)
            .content_type("text/plain")
            .into_header_bytes(body.len() as u64);
        self.append_record(&header, &mut io::Cursor::new(body.as_bytes()))?;
        self.maybe_rotate()
    }

    /// Adds a line to the crawl log stored at close
    pub fn log(&mut self, line: &str) {
        self.log_lines.push(line.to_string());
    }

    /// Finishes the recording
    ///
    /// Writes the crawl-log resource record, drops the journal, and
    /// moves finished files when a destination directory is set.
    pub fn close(mut self) -> Result<Vec<PathBuf>, WarcError> {
        if !self.log_lines.is_empty() {
            let date = Utc::now().format(WARC_DATE_FORMAT).to_string();
            let body = self.log_lines.join("\r\n") + "\r\n";
            let header = RecordBuilder::new(RecordType::Resource)
                .field("WARC-Date", &date)
                .field("WARC-Target-URI", "urn:X-webgrab:log")
                .content_type("text/plain")
                .into_header_bytes(body.len() as u64);
            self.append_record(&header, &mut io::Cursor::new(body.as_bytes()))?;
        }

        self.file.flush()?;
        let journal = journal_path(&self.path);
        if journal.exists() {
            std::fs::remove_file(&journal)?;
        }
        self.finished_files.push(self.path.clone());

        if let Some(dest) = &self.options.move_to {
            let mut moved = Vec::new();
            for path in &self.finished_files {
                let target = dest.join(path.file_name().unwrap_or_default());
                std::fs::rename(path, &target)?;
                moved.push(target);
            }
            return Ok(moved);
        }

        Ok(self.finished_files)
    }

    /// Appends one record, journaling around the write
    ///
    /// Any mid-record failure truncates back to the journaled offset so
    /// the file stays a whole number of records (and of gzip members).
    fn append_record(
        &mut self,
        header: &[u8],
        block: &mut dyn Read,
    ) -> Result<(u64, u64), WarcError> {
        let start = self.offset;
        self.write_journal(start)?;

        let result = self.write_record_bytes(header, block);
        match result {
            Ok(()) => {
                self.offset = self.file.seek(SeekFrom::End(0))?;
                self.write_journal(self.offset)?;
                Ok((start, self.offset - start))
            }
            Err(e) => {
                self.file.set_len(start)?;
                self.file.seek(SeekFrom::Start(start))?;
                Err(e.into())
            }
        }
    }

    fn write_record_bytes(&mut self, header: &[u8], block: &mut dyn Read) -> io::Result<()> {
        if self.options.compress {
            let mut encoder = GzEncoder::new(&mut self.file, Compression::default());
            encoder.write_all(header)?;
            io::copy(block, &mut encoder)?;
            encoder.write_all(b"\r\n\r\n")?;
            encoder.try_finish()?;
        } else {
            self.file.write_all(header)?;
            io::copy(block, &mut self.file)?;
            self.file.write_all(b"\r\n\r\n")?;
        }
        self.file.flush()
    }

    fn write_warcinfo(&mut self) -> Result<(), WarcError> {
        let date = Utc::now().format(WARC_DATE_FORMAT).to_string();
        let mut body = String::new();
        body.push_str(&format!(
            "software: webgrab/{}\r\n",
            env!("CARGO_PKG_VERSION")
        ));
        body.push_str("format: WARC File Format 1.0\r\n");
        for (name, value) in &self.options.headers {
            body.push_str(&format!("{}: {}\r\n", name, value));
        }

        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let header = RecordBuilder::new(RecordType::Warcinfo)
            .field("WARC-Date", &date)
            .field("WARC-Filename", &filename)
            .content_type("application/warc-fields")
            .into_header_bytes(body.len() as u64);

        self.append_record(&header, &mut io::Cursor::new(body.as_bytes()))?;
        Ok(())
    }

    /// Starts the next numbered file once the size threshold is reached
    fn maybe_rotate(&mut self) -> Result<(), WarcError> {
        let max = match self.options.max_size {
            Some(max) => max,
            None => return Ok(()),
        };
        if self.offset < max {
            return Ok(());
        }

        tracing::info!(
            "WARC file {} reached {} bytes, rotating",
            self.path.display(),
            self.offset
        );

        self.file.flush()?;
        let journal = journal_path(&self.path);
        if journal.exists() {
            std::fs::remove_file(&journal)?;
        }
        self.finished_files.push(self.path.clone());

        self.sequence += 1;
        self.path = file_path(&self.options, self.sequence, self.numbered);
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.offset = 0;
        self.write_warcinfo()
    }

    fn write_journal(&self, offset: u64) -> io::Result<()> {
        std::fs::write(journal_path(&self.path), offset.to_string())
    }
}

fn file_path(options: &WarcOptions, sequence: u32, numbered: bool) -> PathBuf {
    let ext = if options.compress { "warc.gz" } else { "warc" };
    if numbered {
        PathBuf::from(format!("{}-{:05}.{}", options.prefix, sequence, ext))
    } else {
        PathBuf::from(format!("{}.{}", options.prefix, ext))
    }
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".journal");
    PathBuf::from(name)
}

fn block_digest(options: &WarcOptions, block: &[u8]) -> io::Result<Option<String>> {
    if options.digests {
        Ok(Some(digest_label(block)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{BodyBuffer, SentRequest};
    use flate2::read::MultiGzDecoder;
    use std::time::Duration;
    use url::Url;

    fn options_in(dir: &Path) -> WarcOptions {
        WarcOptions {
            prefix: dir.join("test").to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    fn exchange(url: &str, body: &[u8]) -> Exchange {
        let url = Url::parse(url).unwrap();
        let mut buffer = BodyBuffer::new();
        buffer.push(body).unwrap();
        Exchange {
            request: SentRequest {
                method: "GET".to_string(),
                url: url.clone(),
                headers: vec![("Host".to_string(), url.host_str().unwrap().to_string())],
                body: None,
            },
            status: 200,
            reason: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: buffer,
            remote_addr: Some("192.0.2.7:443".to_string()),
            duration: Duration::from_millis(5),
        }
    }

    fn decompress(path: &Path) -> String {
        let bytes = std::fs::read(path).unwrap();
        let mut out = Vec::new();
        MultiGzDecoder::new(&bytes[..])
            .read_to_end(&mut out)
            .unwrap();
        String::from_utf8_lossy(&out).to_string()
    }

    #[test]
    fn test_warcinfo_leads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();
        recorder.close().unwrap();

        let text = decompress(&path);
        assert!(text.starts_with("WARC/1.0\r\nWARC-Type: warcinfo\r\n"));
        assert!(text.contains("software: webgrab/"));
    }

    #[test]
    fn test_exchange_writes_request_then_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        let recorded = recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        recorder.close().unwrap();

        let text = decompress(&path);
        let request_pos = text.find("WARC-Type: request").unwrap();
        let response_pos = text.find("WARC-Type: response").unwrap();
        assert!(request_pos < response_pos);
        assert!(text.contains(&format!("WARC-Record-ID: {}", recorded.record_id)));
        assert!(text.contains("WARC-Target-URI: https://example.com/a"));
        assert!(text.contains("WARC-IP-Address: 192.0.2.7"));
        // Both sides point at each other
        assert_eq!(text.matches("WARC-Concurrent-To:").count(), 2);
        assert!(text.contains("GET /a HTTP/1.1"));
        assert!(text.contains("HTTP/1.1 200 OK"));
        assert!(text.contains("abc"));
    }

    #[test]
    fn test_payload_digest_matches_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();

        let recorded = recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        recorder.close().unwrap();

        // sha1("abc"), base32
        assert_eq!(
            recorded.payload_digest.as_deref(),
            Some("sha1:VGMT4NSHA2AWVOR6EVYXQUGCNSONBWE5")
        );
    }

    #[test]
    fn test_digests_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());
        options.digests = false;
        let mut recorder = WarcRecorder::open(options).unwrap();

        let recorded = recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        assert!(recorded.payload_digest.is_none());
        recorder.close().unwrap();
    }

    #[test]
    fn test_revisit_record_references_original() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        let original = VisitRecord {
            warc_record_id: "<urn:uuid:00000000-0000-0000-0000-000000000001>".to_string(),
            target_uri: "https://example.com/a".to_string(),
            warc_date: "2024-01-01T00:00:00Z".to_string(),
        };
        let recorded = recorder
            .record_exchange(
                &exchange("https://example.com/b", b"abc"),
                "https://example.com/b",
                Some(&original),
            )
            .unwrap();
        recorder.close().unwrap();

        assert!(recorded.revisit);
        let text = decompress(&path);
        assert!(text.contains("WARC-Type: revisit"));
        assert!(text.contains("WARC-Refers-To: <urn:uuid:00000000-0000-0000-0000-000000000001>"));
        assert!(text.contains("WARC-Refers-To-Target-URI: https://example.com/a"));
        assert!(text.contains("identical-payload-digest"));
        assert!(!text.contains("WARC-Type: response"));
    }

    #[test]
    fn test_failure_metadata_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        recorder
            .record_failure("https://example.com/dead", "connection refused")
            .unwrap();
        recorder.close().unwrap();

        let text = decompress(&path);
        assert!(text.contains("WARC-Type: metadata"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_log_resource_record_at_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        recorder.log("fetched 3 URLs");
        recorder.close().unwrap();

        let text = decompress(&path);
        assert!(text.contains("WARC-Type: resource"));
        assert!(text.contains("WARC-Target-URI: urn:X-webgrab:log"));
        assert!(text.contains("fetched 3 URLs"));
    }

    #[test]
    fn test_journal_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        assert!(journal_path(&path).exists());
        recorder.close().unwrap();
        assert!(!journal_path(&path).exists());
    }

    #[test]
    fn test_append_refuses_stale_journal() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());

        // Simulate a crashed run: file plus journal left behind
        let crashed = file_path(&options, 0, true);
        std::fs::write(&crashed, b"partial").unwrap();
        std::fs::write(journal_path(&crashed), b"0").unwrap();

        options.append = true;
        let result = WarcRecorder::open(options);
        assert!(matches!(result, Err(WarcError::StaleJournal(_))));
    }

    #[test]
    fn test_append_rotates_to_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());

        let existing = file_path(&options, 0, true);
        std::fs::write(&existing, b"previous run").unwrap();

        options.append = true;
        let recorder = WarcRecorder::open(options).unwrap();
        assert!(recorder
            .current_path()
            .to_string_lossy()
            .ends_with("-00001.warc.gz"));
        recorder.close().unwrap();

        // Prior file untouched
        assert_eq!(std::fs::read(&existing).unwrap(), b"previous run");
    }

    #[test]
    fn test_rotation_on_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());
        options.max_size = Some(1);

        let mut recorder = WarcRecorder::open(options).unwrap();
        let first = recorder.current_path().to_path_buf();
        recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        let second = recorder.current_path().to_path_buf();
        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with("-00000.warc.gz"));
        assert!(second.to_string_lossy().ends_with("-00001.warc.gz"));

        let finished = recorder.close().unwrap();
        assert!(finished.contains(&first));
        assert!(finished.contains(&second));

        // Every finished file is a parseable gzip stream with warcinfo
        assert!(decompress(&first).contains("warcinfo"));
        assert!(decompress(&second).contains("warcinfo"));
    }

    #[test]
    fn test_uncompressed_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());
        options.compress = false;

        let mut recorder = WarcRecorder::open(options).unwrap();
        let path = recorder.current_path().to_path_buf();
        recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        recorder.close().unwrap();

        assert!(path.to_string_lossy().ends_with(".warc"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("WARC/1.0\r\n"));
    }

    #[test]
    fn test_cdx_entry_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_in(dir.path());
        options.cdx = true;
        let prefix = options.prefix.clone();

        let mut recorder = WarcRecorder::open(options).unwrap();
        recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        recorder.close().unwrap();

        let cdx = std::fs::read_to_string(format!("{}.cdx", prefix)).unwrap();
        assert!(cdx.starts_with(" CDX N b a m s k r M S V g"));
        assert!(cdx.contains("https://example.com/a"));
        assert!(cdx.contains("text/plain"));
    }

    #[test]
    fn test_gzip_members_individually_seekable() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WarcRecorder::open(options_in(dir.path())).unwrap();
        let path = recorder.current_path().to_path_buf();

        recorder
            .record_exchange(&exchange("https://example.com/a", b"abc"), "https://example.com/a", None)
            .unwrap();
        recorder.close().unwrap();

        // Multiple independent members: a second gzip magic must appear
        let bytes = std::fs::read(&path).unwrap();
        let magics = bytes
            .windows(2)
            .filter(|w| w == &[0x1f, 0x8b])
            .count();
        assert!(magics >= 3, "expected one member per record, saw {}", magics);
    }

    #[test]
    fn test_move_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("done");
        std::fs::create_dir(&dest).unwrap();

        let mut options = options_in(dir.path());
        options.move_to = Some(dest.clone());

        let recorder = WarcRecorder::open(options).unwrap();
        let original = recorder.current_path().to_path_buf();
        let finished = recorder.close().unwrap();

        assert!(!original.exists());
        assert_eq!(finished.len(), 1);
        assert!(finished[0].starts_with(&dest));
        assert!(finished[0].exists());
    }
}
