use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// All options for one crawl
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub policy: PolicyOptions,
    pub timing: TimingOptions,
    pub retry: RetryOptions,
    pub output: OutputOptions,
    /// WARC recording is off when None
    pub warc: Option<WarcOptions>,
    pub protocol: ProtocolOptions,
    pub tls: TlsOptions,

    /// Path to the frontier database file
    pub database: PathBuf,

    /// Maximum number of in-flight fetches
    pub concurrent: usize,

    /// Aggregate download byte cap
    pub quota: Option<u64>,
}

/// Recursion and URL acceptance policy
#[derive(Debug, Clone)]
pub struct PolicyOptions {
    /// Follow links found in fetched documents
    pub recursive: bool,

    /// Maximum recursion depth for linked pages
    pub level: u32,

    /// Also fetch page requisites (images, stylesheets, scripts)
    pub page_requisites: bool,

    /// Separate recursion budget for requisite chains (CSS imports etc.)
    pub page_requisites_level: u32,

    /// Follow links to other hosts
    pub span_hosts: bool,

    /// Families of links allowed to span hosts when `span_hosts` is off
    pub span_hosts_allow: Vec<SpanHostsAllow>,

    /// Hostname suffixes to stay within (empty means no restriction)
    pub domains: Vec<String>,

    /// Hostname suffixes to avoid
    pub exclude_domains: Vec<String>,

    /// Exact hostnames to stay within
    pub hostnames: Vec<String>,

    /// Exact hostnames to avoid
    pub exclude_hostnames: Vec<String>,

    /// Accept only URLs matching this pattern
    pub accept_regex: Option<String>,

    /// Reject URLs matching this pattern
    pub reject_regex: Option<String>,

    /// Path prefixes to stay within
    pub include_directories: Vec<String>,

    /// Path prefixes to avoid
    pub exclude_directories: Vec<String>,

    /// Never ascend above the seed's directory
    pub no_parent: bool,

    /// Only fetch https URLs
    pub https_only: bool,

    /// Follow links from HTTP pages to FTP resources
    pub follow_ftp: bool,

    /// Redirect targets bypass the span-host family of filters
    pub strong_redirects: bool,

    /// Maximum redirect hops per logical request
    pub max_redirects: u32,

    /// Consult robots.txt before fetching
    pub robots: bool,

    /// Discover URLs from sitemaps referenced in robots.txt
    pub sitemaps: bool,

    /// Extract links only from these tags (empty means all known tags)
    pub follow_tags: Vec<String>,

    /// Never extract links from these tags
    pub ignore_tags: Vec<String>,

    /// Keep bodies of 4xx/5xx responses instead of discarding them
    pub content_on_error: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            level: 5,
            page_requisites: false,
            page_requisites_level: 5,
            span_hosts: false,
            span_hosts_allow: Vec::new(),
            domains: Vec::new(),
            exclude_domains: Vec::new(),
            hostnames: Vec::new(),
            exclude_hostnames: Vec::new(),
            accept_regex: None,
            reject_regex: None,
            include_directories: Vec::new(),
            exclude_directories: Vec::new(),
            no_parent: false,
            https_only: false,
            follow_ftp: false,
            strong_redirects: true,
            max_redirects: 20,
            robots: true,
            sitemaps: false,
            follow_tags: Vec::new(),
            ignore_tags: Vec::new(),
            content_on_error: false,
        }
    }
}

/// Link families permitted to span hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanHostsAllow {
    LinkedPages,
    PageRequisites,
}

/// Politeness and timeout settings
#[derive(Debug, Clone)]
pub struct TimingOptions {
    /// Base wait between requests to one host
    pub wait: Option<Duration>,

    /// Randomize the wait uniformly in [0.5w, 1.5w]
    pub random_wait: bool,

    /// Cap for the retry backoff curve
    pub waitretry: Option<Duration>,

    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,

    /// Bound on one whole exchange
    pub session_timeout: Option<Duration>,

    /// Bytes per second; body reads are paced to stay under it
    pub limit_rate: Option<u64>,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            wait: None,
            random_wait: false,
            waitretry: Some(Duration::from_secs(10)),
            dns_timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(30)),
            session_timeout: None,
            limit_rate: None,
        }
    }
}

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Attempts per URL before giving up
    pub tries: u32,

    /// Treat connection-refused as retryable
    pub retry_connrefused: bool,

    /// Treat DNS failures as retryable
    pub retry_dns_error: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            tries: 20,
            retry_connrefused: false,
            retry_dns_error: false,
        }
    }
}

/// Filename restriction modes, combinable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictMode {
    Ascii,
    Lower,
    Upper,
    Nocontrol,
    Unix,
    Windows,
}

/// Where and how bodies land on disk
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Top-level directory for saved files
    pub directory_prefix: PathBuf,

    /// Save everything into the prefix directly
    pub no_directories: bool,

    /// Always create the full directory hierarchy
    pub force_directories: bool,

    /// Omit the hostname directory
    pub no_host_directories: bool,

    /// Prefix the hostname directory with the scheme
    pub protocol_directories: bool,

    /// Strip this many leading path components
    pub cut_dirs: u32,

    pub restrict: Vec<RestrictMode>,

    /// Longest allowed filename component
    pub max_filename_length: usize,

    /// Keep existing files, saving new ones as .1, .2, ...
    pub no_clobber: bool,

    /// Resume partial files with Range requests
    pub continue_download: bool,

    /// Skip the download when the local copy is at least as new
    pub timestamping: bool,

    /// Remove files after the crawl (archive-only runs)
    pub delete_after: bool,

    /// Write every body into this one file
    pub output_document: Option<PathBuf>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            directory_prefix: PathBuf::from("."),
            no_directories: false,
            force_directories: false,
            no_host_directories: false,
            protocol_directories: false,
            cut_dirs: 0,
            restrict: Vec::new(),
            max_filename_length: 160,
            no_clobber: false,
            continue_download: false,
            timestamping: false,
            delete_after: false,
            output_document: None,
        }
    }
}

/// WARC recording settings
#[derive(Debug, Clone)]
pub struct WarcOptions {
    /// Output prefix; files are named `<prefix>.warc.gz` or
    /// `<prefix>-NNNNN.warc.gz` once rotation kicks in
    pub prefix: String,

    /// Continue a previous recording instead of refusing to overwrite
    pub append: bool,

    /// Rotate to a new file before exceeding this many bytes
    pub max_size: Option<u64>,

    /// Emit revisit records for payloads seen before
    pub dedup: bool,

    /// Maintain a CDX index beside the WARC
    pub cdx: bool,

    /// Wrap each record in its own gzip member
    pub compress: bool,

    /// Compute block and payload digests
    pub digests: bool,

    /// Directory for in-flight temporary files
    pub tempdir: Option<PathBuf>,

    /// Move finished WARC files here
    pub move_to: Option<PathBuf>,

    /// Extra fields for the warcinfo record
    pub headers: Vec<(String, String)>,
}

impl Default for WarcOptions {
    fn default() -> Self {
        Self {
            prefix: "archive".to_string(),
            append: false,
            max_size: None,
            dedup: false,
            cdx: false,
            compress: true,
            digests: true,
            tempdir: None,
            move_to: None,
            headers: Vec::new(),
        }
    }
}

/// HTTP protocol behavior
#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    pub user_agent: String,

    /// Extra request headers
    pub headers: Vec<(String, String)>,

    /// Fixed Referer overriding per-link referers
    pub referer: Option<String>,

    /// Request body; switches the method to POST
    pub post_data: Option<String>,

    /// Reuse connections across requests
    pub keep_alive: bool,

    /// Ask for gzip/brotli encoded responses. Off by default: recorded
    /// bodies and their digests should match the wire bytes.
    pub http_compression: bool,

    pub cookies_enabled: bool,
    pub load_cookies: Option<PathBuf>,
    pub save_cookies: Option<PathBuf>,
    pub keep_session_cookies: bool,

    /// Local address to bind outgoing sockets to
    pub bind_address: Option<IpAddr>,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("webgrab/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
            referer: None,
            post_data: None,
            keep_alive: true,
            http_compression: false,
            cookies_enabled: true,
            load_cookies: None,
            save_cookies: None,
            keep_session_cookies: false,
            bind_address: None,
        }
    }
}

/// Minimum TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecureProtocol {
    #[default]
    Auto,
    TlsV1_2,
    TlsV1_3,
}

/// TLS settings
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub secure_protocol: SecureProtocol,

    /// Verify server certificates
    pub check_certificate: bool,

    /// Client certificate (PEM)
    pub certificate: Option<PathBuf>,

    pub private_key: Option<PathBuf>,

    /// Extra trusted root (PEM)
    pub ca_certificate: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            secure_protocol: SecureProtocol::Auto,
            check_certificate: true,
            certificate: None,
            private_key: None,
            ca_certificate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tool_conventions() {
        let opts = Options::default();
        assert!(!opts.policy.recursive);
        assert_eq!(opts.policy.level, 5);
        assert_eq!(opts.retry.tries, 20);
        assert_eq!(opts.output.max_filename_length, 160);
        assert!(opts.tls.check_certificate);
        assert!(opts.warc.is_none());
    }

    #[test]
    fn test_warc_defaults() {
        let warc = WarcOptions::default();
        assert!(warc.compress);
        assert!(warc.digests);
        assert!(!warc.append);
    }
}
