//! Response materialization
//!
//! Turns fetched bodies into files under the directory prefix. Path
//! policy lives in [`paths`]; this module handles the filesystem side:
//! directory creation, collision fallbacks, clobber rules, resume and
//! timestamping support.

mod paths;

pub use paths::{restrict_component, truncate_preserving_extension, url_to_relative_path};

use crate::config::OutputOptions;
use crate::fetcher::BodyBuffer;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors from the file writer
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No usable filename for {0}")]
    NoFilename(String),
}

/// Writes response bodies to disk
pub struct FileWriter {
    options: OutputOptions,
    /// Files written this run, in order (drives --delete-after)
    written: Vec<PathBuf>,
}

impl FileWriter {
    pub fn new(options: OutputOptions) -> Self {
        Self {
            options,
            written: Vec::new(),
        }
    }

    /// The path a URL would land at, before collision handling
    pub fn plan(&self, url: &Url) -> PathBuf {
        if let Some(doc) = &self.options.output_document {
            return doc.clone();
        }
        self.options
            .directory_prefix
            .join(url_to_relative_path(url, &self.options))
    }

    /// Local modification time of the planned file, for `--timestamping`
    pub fn local_mtime(&self, url: &Url) -> Option<DateTime<Utc>> {
        if !self.options.timestamping {
            return None;
        }
        let meta = fs::metadata(self.plan(url)).ok()?;
        meta.modified().ok().map(DateTime::<Utc>::from)
    }

    /// Existing partial length, for `--continue` Range requests
    pub fn resume_offset(&self, url: &Url) -> Option<u64> {
        if !self.options.continue_download {
            return None;
        }
        let meta = fs::metadata(self.plan(url)).ok()?;
        (meta.len() > 0).then_some(meta.len())
    }

    /// Writes a body to its place on disk
    ///
    /// # Arguments
    ///
    /// * `url` - The fetched URL
    /// * `body` - The response body
    /// * `append` - Append instead of truncate (resumed download)
    ///
    /// # Returns
    ///
    /// The path actually written, after collision and clobber handling.
    pub fn save(
        &mut self,
        url: &Url,
        body: &BodyBuffer,
        append: bool,
    ) -> Result<PathBuf, WriterError> {
        let planned = self.plan(url);
        let output_document = self.options.output_document.is_some();

        let path = if output_document {
            planned
        } else {
            let resolved = resolve_collisions(&planned)?;
            if self.options.no_clobber && !append && resolved.exists() {
                anti_clobber_path(&resolved)
            } else {
                resolved
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| WriterError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let io_err = |source| WriterError::Io {
            path: path.clone(),
            source,
        };

        let mut file = if output_document || append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?
        } else {
            File::create(&path).map_err(io_err)?
        };

        let mut reader = body.reader().map_err(io_err)?;
        io::copy(&mut reader, &mut file).map_err(io_err)?;

        self.written.push(path.clone());
        Ok(path)
    }

    /// Removes everything written this run (`--delete-after`)
    pub fn delete_written(&mut self) -> usize {
        let mut removed = 0;
        for path in self.written.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Could not remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    pub fn written_count(&self) -> usize {
        self.written.len()
    }
}

/// Adjusts a path around existing files and directories
///
/// A final component that exists as a directory gets a `.f` suffix; an
/// intermediate component that exists as a file pushes the directory to
/// a `.d` name.
fn resolve_collisions(path: &Path) -> Result<PathBuf, WriterError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| WriterError::NoFilename(path.display().to_string()))?
        .to_os_string();

    let mut rebuilt = PathBuf::new();
    for component in path.parent().into_iter().flat_map(|p| p.components()) {
        rebuilt.push(component);
        if rebuilt.is_file() {
            let mut name = rebuilt
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default();
            name.push(".d");
            rebuilt.set_file_name(name);
        }
    }

    rebuilt.push(&file_name);
    if rebuilt.is_dir() {
        let mut name = file_name;
        name.push(".f");
        rebuilt.set_file_name(name);
    }

    Ok(rebuilt)
}

/// First free `.1`, `.2`, ... variant of an occupied path
fn anti_clobber_path(path: &Path) -> PathBuf {
    for n in 1u32.. {
        let mut candidate = path.as_os_str().to_os_string();
        candidate.push(format!(".{}", n));
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("ran out of clobber suffixes")
}
