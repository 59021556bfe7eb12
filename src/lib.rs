//! Webgrab: a resumable recursive web archiver
//!
//! This crate implements a wget-style crawler that downloads a set of seed
//! URLs (optionally recursing into discovered links) while recording every
//! request/response exchange into WARC files. The crawl frontier lives in a
//! SQLite database so an interrupted run can be restarted with the same
//! command line.

pub mod config;
pub mod cookies;
pub mod engine;
pub mod fetcher;
pub mod filters;
pub mod frontier;
pub mod hooks;
pub mod politeness;
pub mod redirect;
pub mod robots;
pub mod scrape;
pub mod stats;
pub mod url;
pub mod warc;
pub mod writer;

use thiserror::Error;

/// Main error type for webgrab operations
#[derive(Debug, Error)]
pub enum WebgrabError {
    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Frontier error: {0}")]
    Store(#[from] frontier::StoreError),

    #[error("WARC error: {0}")]
    Warc(#[from] warc::WarcError),

    #[error("Writer error: {0}")]
    Writer(#[from] writer::WriterError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("Redirect loop detected at {url}")]
    RedirectCycle { url: String },

    #[error("TLS certificate verification failed for {url}")]
    SslVerification { url: String },

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("Download quota exceeded")]
    QuotaExceeded,

    #[error("Hook error: {0}")]
    Hook(#[from] hooks::HookError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for webgrab operations
pub type Result<T> = std::result::Result<T, WebgrabError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Options;
pub use engine::{Engine, ExitStatus};
pub use frontier::{FrontierStore, LinkType, UrlRecord, UrlStatus};
pub use crate::url::{canonicalize, CanonicalUrl};
