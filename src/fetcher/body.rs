//! Response body buffering
//!
//! Bodies accumulate in memory up to a threshold, then spill to a
//! temporary file. The buffer can be read back any number of times, so
//! the WARC recorder, the file writer and the scraper all see the same
//! bytes without the fetch holding everything in memory.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Bodies larger than this move to disk
pub const DEFAULT_SPILL_THRESHOLD: usize = 8 * 1024 * 1024;

enum BodyInner {
    Memory(Vec<u8>),
    Spilled { file: NamedTempFile, len: u64 },
}

/// A fetched response body
pub struct BodyBuffer {
    inner: BodyInner,
    threshold: usize,
    tempdir: Option<PathBuf>,
}

impl BodyBuffer {
    /// Creates an empty buffer with the default spill threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SPILL_THRESHOLD, None)
    }

    /// Creates an empty buffer that spills past `threshold` bytes into
    /// `tempdir` (or the system temp directory)
    pub fn with_threshold(threshold: usize, tempdir: Option<&Path>) -> Self {
        Self {
            inner: BodyInner::Memory(Vec::new()),
            threshold,
            tempdir: tempdir.map(Path::to_path_buf),
        }
    }

    /// Appends a chunk
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.inner {
            BodyInner::Memory(buf) => {
                if buf.len() + chunk.len() > self.threshold {
                    let mut file = match &self.tempdir {
                        Some(dir) => NamedTempFile::new_in(dir)?,
                        None => NamedTempFile::new()?,
                    };
                    file.write_all(buf)?;
                    file.write_all(chunk)?;
                    let len = (buf.len() + chunk.len()) as u64;
                    self.inner = BodyInner::Spilled { file, len };
                } else {
                    buf.extend_from_slice(chunk);
                }
            }
            BodyInner::Spilled { file, len } => {
                file.write_all(chunk)?;
                *len += chunk.len() as u64;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        match &self.inner {
            BodyInner::Memory(buf) => buf.len() as u64,
            BodyInner::Spilled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the body has moved to disk
    pub fn is_spilled(&self) -> bool {
        matches!(self.inner, BodyInner::Spilled { .. })
    }

    /// Opens a fresh reader over the whole body
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match &self.inner {
            BodyInner::Memory(buf) => Ok(Box::new(Cursor::new(&buf[..]))),
            BodyInner::Spilled { file, .. } => {
                let mut f = file.reopen()?;
                f.seek(SeekFrom::Start(0))?;
                Ok(Box::new(f))
            }
        }
    }

    /// Copies the whole body into memory
    ///
    /// Callers gate this on `len()`; extractors only parse text-sized
    /// documents.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len() as usize);
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Default for BodyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let body = BodyBuffer::new();
        assert!(body.is_empty());
        assert_eq!(body.len(), 0);
    }

    #[test]
    fn test_memory_roundtrip() {
        let mut body = BodyBuffer::new();
        body.push(b"hello ").unwrap();
        body.push(b"world").unwrap();

        assert_eq!(body.len(), 11);
        assert!(!body.is_spilled());
        assert_eq!(body.to_vec().unwrap(), b"hello world");
    }

    #[test]
    fn test_spill_past_threshold() {
        let mut body = BodyBuffer::with_threshold(8, None);
        body.push(b"12345").unwrap();
        assert!(!body.is_spilled());
        body.push(b"67890").unwrap();
        assert!(body.is_spilled());

        assert_eq!(body.len(), 10);
        assert_eq!(body.to_vec().unwrap(), b"1234567890");
    }

    #[test]
    fn test_push_after_spill() {
        let mut body = BodyBuffer::with_threshold(4, None);
        body.push(b"aaaa").unwrap();
        body.push(b"bbbb").unwrap();
        body.push(b"cccc").unwrap();

        assert_eq!(body.to_vec().unwrap(), b"aaaabbbbcccc");
    }

    #[test]
    fn test_reader_repeatable() {
        let mut body = BodyBuffer::with_threshold(4, None);
        body.push(b"abcdefgh").unwrap();

        for _ in 0..2 {
            let mut out = Vec::new();
            body.reader().unwrap().read_to_end(&mut out).unwrap();
            assert_eq!(out, b"abcdefgh");
        }
    }
}
