//! WARC record envelopes
//!
//! A record is a CRLF-terminated header block, a blank line, the block
//! payload, and a trailing blank line pair. Header construction and
//! digest computation live here; file placement is the recorder's job.

use data_encoding::BASE32;
use sha1::{Digest, Sha1};
use std::io::Read;
use uuid::Uuid;

/// strftime layout for WARC-Date values
pub const WARC_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The record types this recorder emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Warcinfo,
    Request,
    Response,
    Revisit,
    Metadata,
    Resource,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warcinfo => "warcinfo",
            Self::Request => "request",
            Self::Response => "response",
            Self::Revisit => "revisit",
            Self::Metadata => "metadata",
            Self::Resource => "resource",
        }
    }
}

/// Allocates a fresh record id in urn:uuid form, angle-bracketed
pub fn new_record_id() -> String {
    format!("<urn:uuid:{}>", Uuid::new_v4())
}

/// `sha1:<base32>` label over a byte stream
pub fn digest_label<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha1:{}", BASE32.encode(&hasher.finalize())))
}

/// Builds one record's header block
///
/// Field order follows the common tools: WARC-Type first, then the
/// record headers, with Content-Type and Content-Length last.
pub struct RecordBuilder {
    record_type: RecordType,
    record_id: String,
    fields: Vec<(String, String)>,
    content_type: Option<String>,
}

impl RecordBuilder {
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            record_id: new_record_id(),
            fields: Vec::new(),
            content_type: None,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn field_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    pub fn content_type(mut self, value: &str) -> Self {
        self.content_type = Some(value.to_string());
        self
    }

    /// Serializes the header block for a payload of `content_length`
    /// bytes, blank separator line included
    pub fn into_header_bytes(self, content_length: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"WARC/1.0\r\n");
        push_field(&mut out, "WARC-Type", self.record_type.as_str());
        push_field(&mut out, "WARC-Record-ID", &self.record_id);
        for (name, value) in &self.fields {
            push_field(&mut out, name, value);
        }
        if let Some(ct) = &self.content_type {
            push_field(&mut out, "Content-Type", ct);
        }
        push_field(&mut out, "Content-Length", &content_length.to_string());
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn push_field(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    // Header values must stay on one line
    let cleaned = value.replace(['\r', '\n'], " ");
    out.extend_from_slice(cleaned.as_bytes());
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_form() {
        let id = new_record_id();
        assert!(id.starts_with("<urn:uuid:"));
        assert!(id.ends_with('>'));
    }

    #[test]
    fn test_record_ids_unique() {
        assert_ne!(new_record_id(), new_record_id());
    }

    #[test]
    fn test_digest_label_known_value() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        let label = digest_label(&b"abc"[..]).unwrap();
        assert_eq!(label, "sha1:VGMT4NSHA2AWVOR6EVYXQUGCNSONBWE5");
    }

    #[test]
    fn test_digest_label_empty() {
        let label = digest_label(&b""[..]).unwrap();
        assert!(label.starts_with("sha1:"));
        // Base32 of 20 bytes is 32 chars
        assert_eq!(label.len(), "sha1:".len() + 32);
    }

    #[test]
    fn test_header_block_layout() {
        let builder = RecordBuilder::new(RecordType::Response)
            .field("WARC-Target-URI", "https://example.com/")
            .content_type("application/http;msgtype=response");
        let id = builder.record_id().to_string();
        let bytes = builder.into_header_bytes(123);
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("WARC/1.0\r\n"));
        assert!(text.contains("WARC-Type: response\r\n"));
        assert!(text.contains(&format!("WARC-Record-ID: {}\r\n", id)));
        assert!(text.contains("WARC-Target-URI: https://example.com/\r\n"));
        assert!(text.contains("Content-Type: application/http;msgtype=response\r\n"));
        assert!(text.contains("Content-Length: 123\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_header_values_sanitized() {
        let bytes = RecordBuilder::new(RecordType::Metadata)
            .field("WARC-Target-URI", "https://example.com/a\r\nInjected: x")
            .into_header_bytes(0);
        let text = String::from_utf8(bytes).unwrap();
        // The CRLF inside the value must not start a new header line
        assert!(text.contains("https://example.com/a  Injected: x\r\n"));
    }

    #[test]
    fn test_field_opt() {
        let bytes = RecordBuilder::new(RecordType::Request)
            .field_opt("WARC-IP-Address", None)
            .field_opt("WARC-Target-URI", Some("https://example.com/"))
            .into_header_bytes(0);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("WARC-IP-Address"));
        assert!(text.contains("WARC-Target-URI"));
    }
}
