//! WARC recording
//!
//! Writes ISO 28500 WARC 1.0 files: a `warcinfo` record at the head of
//! each file, paired `request`/`response` records per HTTP exchange,
//! `revisit` records for payloads seen before, `metadata` records for
//! exchanges that died before response headers, and a closing `resource`
//! record carrying the crawl log. Each record can be wrapped in its own
//! gzip member so the file stays seekable per record, and an offset
//! journal keeps the file well-formed across crashes.

mod cdx;
mod record;
mod recorder;

pub use cdx::CdxWriter;
pub use record::{
    digest_label, RecordBuilder, RecordType, WARC_DATE_FORMAT,
};
pub use recorder::{RecordedResponse, WarcError, WarcRecorder};
