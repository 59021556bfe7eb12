//! Webgrab command-line interface
//!
//! Flags follow the wget/wpull conventions; parsed arguments are
//! translated into the library's option structs and handed to the
//! engine. The process exit code reports what happened on the wire.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webgrab::config::{
    Options, OutputOptions, PolicyOptions, ProtocolOptions, RestrictMode, RetryOptions,
    SecureProtocol, SpanHostsAllow, TimingOptions, TlsOptions, WarcOptions,
};
use webgrab::{Engine, ExitStatus};

/// Webgrab: a resumable recursive web archiver
#[derive(Parser, Debug)]
#[command(name = "webgrab")]
#[command(version)]
#[command(about = "Download and archive web content, recursively and resumably")]
struct Cli {
    /// Seed URLs to fetch
    #[arg(value_name = "URL", required_unless_present = "input_file")]
    urls: Vec<String>,

    /// Read additional seed URLs from a file (one per line)
    #[arg(short = 'i', long, value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    // ===== Recursion policy =====
    /// Follow links in fetched documents
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Maximum recursion depth
    #[arg(short = 'l', long, default_value_t = 5)]
    level: u32,

    /// Also fetch page requisites (images, stylesheets, scripts)
    #[arg(short = 'p', long)]
    page_requisites: bool,

    /// Separate depth budget for requisite chains
    #[arg(long, default_value_t = 5)]
    page_requisites_level: u32,

    /// Follow links onto other hosts
    #[arg(short = 'H', long)]
    span_hosts: bool,

    /// Allow spanning for a link family: linked-pages, page-requisites
    #[arg(long, value_name = "FAMILY")]
    span_hosts_allow: Vec<String>,

    /// Restrict crawl to these domain suffixes
    #[arg(short = 'D', long, value_delimiter = ',')]
    domains: Vec<String>,

    /// Never visit these domain suffixes
    #[arg(long, value_delimiter = ',')]
    exclude_domains: Vec<String>,

    /// Restrict crawl to these exact hostnames
    #[arg(long, value_delimiter = ',')]
    hostnames: Vec<String>,

    /// Never visit these exact hostnames
    #[arg(long, value_delimiter = ',')]
    exclude_hostnames: Vec<String>,

    /// Only fetch URLs matching this regular expression
    #[arg(long, value_name = "REGEX")]
    accept_regex: Option<String>,

    /// Skip URLs matching this regular expression
    #[arg(long, value_name = "REGEX")]
    reject_regex: Option<String>,

    /// Restrict crawl to these path prefixes
    #[arg(short = 'I', long = "include-directories", value_delimiter = ',')]
    include_directories: Vec<String>,

    /// Never enter these path prefixes
    #[arg(short = 'X', long = "exclude-directories", value_delimiter = ',')]
    exclude_directories: Vec<String>,

    /// Never ascend above the seed's directory
    #[arg(long)]
    no_parent: bool,

    /// Only fetch https URLs
    #[arg(long)]
    https_only: bool,

    /// Follow FTP links from HTTP pages
    #[arg(long)]
    follow_ftp: bool,

    /// Maximum redirect hops per request
    #[arg(long, default_value_t = 20)]
    max_redirect: u32,

    /// Ignore robots.txt
    #[arg(long = "no-robots")]
    no_robots: bool,

    /// Discover URLs from sitemaps listed in robots.txt
    #[arg(long)]
    sitemaps: bool,

    /// Extract links only from these HTML tags
    #[arg(long, value_delimiter = ',')]
    follow_tags: Vec<String>,

    /// Never extract links from these HTML tags
    #[arg(long, value_delimiter = ',')]
    ignore_tags: Vec<String>,

    /// Keep response bodies of error statuses
    #[arg(long)]
    content_on_error: bool,

    // ===== Timing and retries =====
    /// Seconds to wait between requests to one host
    #[arg(short = 'w', long, value_name = "SECONDS")]
    wait: Option<f64>,

    /// Randomize the wait between 0.5x and 1.5x
    #[arg(long)]
    random_wait: bool,

    /// Cap (seconds) for the retry backoff curve
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    waitretry: f64,

    /// Timeout (seconds) applied to connect and read phases
    #[arg(short = 'T', long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Timeout (seconds) for DNS resolution
    #[arg(long, value_name = "SECONDS")]
    dns_timeout: Option<f64>,

    /// Timeout (seconds) for the TCP connect
    #[arg(long, value_name = "SECONDS")]
    connect_timeout: Option<f64>,

    /// Timeout (seconds) waiting for response data
    #[arg(long, value_name = "SECONDS")]
    read_timeout: Option<f64>,

    /// Bound (seconds) on one whole exchange
    #[arg(long, value_name = "SECONDS")]
    session_timeout: Option<f64>,

    /// Limit download rate (bytes per second)
    #[arg(long, value_name = "BYTES")]
    limit_rate: Option<u64>,

    /// Attempts per URL
    #[arg(short = 't', long, default_value_t = 20)]
    tries: u32,

    /// Retry when the connection is refused
    #[arg(long)]
    retry_connrefused: bool,

    /// Retry when DNS resolution fails
    #[arg(long)]
    retry_dns_error: bool,

    /// Stop after downloading this many bytes
    #[arg(short = 'Q', long, value_name = "BYTES")]
    quota: Option<u64>,

    /// Concurrent fetches
    #[arg(long, default_value_t = 1)]
    concurrent: usize,

    // ===== Output =====
    /// Directory to save files under
    #[arg(short = 'P', long, value_name = "DIR", default_value = ".")]
    directory_prefix: PathBuf,

    /// Do not create directories
    #[arg(long = "no-directories")]
    no_directories: bool,

    /// Always create the full hierarchy
    #[arg(long = "force-directories")]
    force_directories: bool,

    /// Omit the hostname directory
    #[arg(long = "no-host-directories")]
    no_host_directories: bool,

    /// Prefix directories with the scheme
    #[arg(long)]
    protocol_directories: bool,

    /// Strip this many leading path components
    #[arg(long, default_value_t = 0)]
    cut_dirs: u32,

    /// Filename restriction modes (ascii,lower,upper,nocontrol,unix,windows)
    #[arg(long, value_delimiter = ',')]
    restrict_file_names: Vec<String>,

    /// Longest allowed filename
    #[arg(long, default_value_t = 160)]
    max_filename_length: usize,

    /// Keep existing files; save new versions as .1, .2, ...
    #[arg(long = "no-clobber")]
    no_clobber: bool,

    /// Resume partial downloads with Range requests
    #[arg(short = 'c', long = "continue")]
    continue_download: bool,

    /// Skip downloads whose local copy is at least as new
    #[arg(short = 'N', long)]
    timestamping: bool,

    /// Delete files after the crawl (archive-only runs)
    #[arg(long)]
    delete_after: bool,

    /// Write every body into one file
    #[arg(short = 'O', long, value_name = "FILE")]
    output_document: Option<PathBuf>,

    // ===== WARC recording =====
    /// Record all traffic into WARC files with this prefix
    #[arg(long, value_name = "PREFIX")]
    warc_file: Option<String>,

    /// Continue an existing WARC recording
    #[arg(long)]
    warc_append: bool,

    /// Rotate WARC files at this size (bytes)
    #[arg(long, value_name = "BYTES")]
    warc_max_size: Option<u64>,

    /// Emit revisit records for duplicate payloads
    #[arg(long)]
    warc_dedup: bool,

    /// Maintain a CDX index beside the WARC
    #[arg(long)]
    warc_cdx: bool,

    /// Write WARC records without per-record gzip
    #[arg(long)]
    no_warc_compression: bool,

    /// Skip block and payload digests
    #[arg(long)]
    no_warc_digests: bool,

    /// Directory for in-flight temporary files
    #[arg(long, value_name = "DIR")]
    warc_tempdir: Option<PathBuf>,

    /// Move finished WARC files into this directory
    #[arg(long, value_name = "DIR")]
    warc_move: Option<PathBuf>,

    /// Extra warcinfo field, NAME:VALUE (repeatable)
    #[arg(long = "warc-header", value_name = "NAME:VALUE")]
    warc_headers: Vec<String>,

    // ===== Protocol =====
    /// User-Agent header
    #[arg(short = 'U', long, value_name = "AGENT")]
    user_agent: Option<String>,

    /// Extra request header, NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Fixed Referer header
    #[arg(long)]
    referer: Option<String>,

    /// Send this body with POST instead of GET
    #[arg(long, value_name = "DATA")]
    post_data: Option<String>,

    /// Read the POST body from a file
    #[arg(long, value_name = "FILE")]
    post_file: Option<PathBuf>,

    /// Disable connection reuse
    #[arg(long = "no-http-keep-alive")]
    no_http_keep_alive: bool,

    /// Ask servers for compressed responses
    #[arg(long)]
    http_compression: bool,

    /// Disable cookie handling
    #[arg(long = "no-cookies")]
    no_cookies: bool,

    /// Load cookies from a cookies.txt file
    #[arg(long, value_name = "FILE")]
    load_cookies: Option<PathBuf>,

    /// Save cookies to a cookies.txt file at exit
    #[arg(long, value_name = "FILE")]
    save_cookies: Option<PathBuf>,

    /// Keep session cookies when saving
    #[arg(long)]
    keep_session_cookies: bool,

    /// Bind outgoing connections to this local address
    #[arg(long, value_name = "ADDRESS")]
    bind_address: Option<IpAddr>,

    // ===== TLS =====
    /// Minimum TLS version: auto, TLSv1_2, TLSv1_3
    #[arg(long, value_name = "PROTOCOL", default_value = "auto")]
    secure_protocol: String,

    /// Skip certificate verification
    #[arg(long = "no-check-certificate")]
    no_check_certificate: bool,

    /// Client certificate (PEM)
    #[arg(long, value_name = "FILE")]
    certificate: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, value_name = "FILE")]
    private_key: Option<PathBuf>,

    /// Extra trusted CA certificate (PEM)
    #[arg(long, value_name = "FILE")]
    ca_certificate: Option<PathBuf>,

    // ===== Database =====
    /// Path to the frontier database
    #[arg(long, value_name = "FILE", default_value = "webgrab.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let code = match run(cli).await {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };
    ExitCode::from(code as u8)
}

async fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    let mut seeds = cli.urls.clone();
    if let Some(path) = &cli.input_file {
        let content = std::fs::read_to_string(path)?;
        seeds.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    if seeds.is_empty() {
        anyhow::bail!("no seed URLs given");
    }

    let options = build_options(&cli)?;

    tracing::info!(
        "Starting crawl: {} seeds, database {}",
        seeds.len(),
        options.database.display()
    );
    tracing::debug!("Options: {:?}", options);

    let mut engine = Engine::new(options)?;
    let added = engine.seed_urls(&seeds)?;
    if added < seeds.len() {
        tracing::info!(
            "{} of {} seeds already known from a previous run",
            seeds.len() - added,
            seeds.len()
        );
    }

    Ok(engine.run().await?)
}

fn build_options(cli: &Cli) -> anyhow::Result<Options> {
    let mut span_hosts_allow = Vec::new();
    for family in &cli.span_hosts_allow {
        match family.as_str() {
            "linked-pages" => span_hosts_allow.push(SpanHostsAllow::LinkedPages),
            "page-requisites" => span_hosts_allow.push(SpanHostsAllow::PageRequisites),
            other => anyhow::bail!("unknown --span-hosts-allow family: {}", other),
        }
    }

    let mut restrict = Vec::new();
    for mode in &cli.restrict_file_names {
        restrict.push(match mode.as_str() {
            "ascii" => RestrictMode::Ascii,
            "lower" => RestrictMode::Lower,
            "upper" => RestrictMode::Upper,
            "nocontrol" => RestrictMode::Nocontrol,
            "unix" => RestrictMode::Unix,
            "windows" => RestrictMode::Windows,
            other => anyhow::bail!("unknown --restrict-file-names mode: {}", other),
        });
    }

    let secure_protocol = match cli.secure_protocol.as_str() {
        "auto" => SecureProtocol::Auto,
        "TLSv1_2" => SecureProtocol::TlsV1_2,
        "TLSv1_3" => SecureProtocol::TlsV1_3,
        other => anyhow::bail!("unknown --secure-protocol: {}", other),
    };

    let post_data = match (&cli.post_data, &cli.post_file) {
        (Some(_), Some(_)) => anyhow::bail!("--post-data conflicts with --post-file"),
        (Some(data), None) => Some(data.clone()),
        (None, Some(path)) => Some(std::fs::read_to_string(path)?),
        (None, None) => None,
    };

    let warc = match cli.warc_file.as_ref() {
        Some(prefix) => Some(WarcOptions {
            prefix: prefix.clone(),
            append: cli.warc_append,
            max_size: cli.warc_max_size,
            dedup: cli.warc_dedup,
            cdx: cli.warc_cdx,
            compress: !cli.no_warc_compression,
            digests: !cli.no_warc_digests,
            tempdir: cli.warc_tempdir.clone(),
            move_to: cli.warc_move.clone(),
            headers: parse_headers(&cli.warc_headers)?,
        }),
        None => None,
    };

    let secs = |v: f64| Duration::from_secs_f64(v);

    Ok(Options {
        policy: PolicyOptions {
            recursive: cli.recursive,
            level: cli.level,
            page_requisites: cli.page_requisites,
            page_requisites_level: cli.page_requisites_level,
            span_hosts: cli.span_hosts,
            span_hosts_allow,
            domains: cli.domains.clone(),
            exclude_domains: cli.exclude_domains.clone(),
            hostnames: cli.hostnames.clone(),
            exclude_hostnames: cli.exclude_hostnames.clone(),
            accept_regex: cli.accept_regex.clone(),
            reject_regex: cli.reject_regex.clone(),
            include_directories: cli.include_directories.clone(),
            exclude_directories: cli.exclude_directories.clone(),
            no_parent: cli.no_parent,
            https_only: cli.https_only,
            follow_ftp: cli.follow_ftp,
            strong_redirects: true,
            max_redirects: cli.max_redirect,
            robots: !cli.no_robots,
            sitemaps: cli.sitemaps,
            follow_tags: cli.follow_tags.clone(),
            ignore_tags: cli.ignore_tags.clone(),
            content_on_error: cli.content_on_error,
        },
        timing: TimingOptions {
            wait: cli.wait.map(secs),
            random_wait: cli.random_wait,
            waitretry: Some(secs(cli.waitretry)),
            dns_timeout: cli.dns_timeout.or(cli.timeout).map(secs),
            connect_timeout: cli.connect_timeout.or(cli.timeout).map(secs).or(Some(
                Duration::from_secs(10),
            )),
            read_timeout: cli
                .read_timeout
                .or(cli.timeout)
                .map(secs)
                .or(Some(Duration::from_secs(30))),
            session_timeout: cli.session_timeout.map(secs),
            limit_rate: cli.limit_rate,
        },
        retry: RetryOptions {
            tries: cli.tries,
            retry_connrefused: cli.retry_connrefused,
            retry_dns_error: cli.retry_dns_error,
        },
        output: OutputOptions {
            directory_prefix: cli.directory_prefix.clone(),
            no_directories: cli.no_directories,
            force_directories: cli.force_directories,
            no_host_directories: cli.no_host_directories,
            protocol_directories: cli.protocol_directories,
            cut_dirs: cli.cut_dirs,
            restrict,
            max_filename_length: cli.max_filename_length,
            no_clobber: cli.no_clobber,
            continue_download: cli.continue_download,
            timestamping: cli.timestamping,
            delete_after: cli.delete_after,
            output_document: cli.output_document.clone(),
        },
        warc,
        protocol: ProtocolOptions {
            user_agent: cli
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("webgrab/{}", env!("CARGO_PKG_VERSION"))),
            headers: parse_headers(&cli.headers)?,
            referer: cli.referer.clone(),
            post_data,
            keep_alive: !cli.no_http_keep_alive,
            http_compression: cli.http_compression,
            cookies_enabled: !cli.no_cookies,
            load_cookies: cli.load_cookies.clone(),
            save_cookies: cli.save_cookies.clone(),
            keep_session_cookies: cli.keep_session_cookies,
            bind_address: cli.bind_address,
        },
        tls: TlsOptions {
            secure_protocol,
            check_certificate: !cli.no_check_certificate,
            certificate: cli.certificate.clone(),
            private_key: cli.private_key.clone(),
            ca_certificate: cli.ca_certificate.clone(),
        },
        database: cli.database.clone(),
        concurrent: cli.concurrent.max(1),
        quota: cli.quota,
    })
}

fn parse_headers(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for entry in raw {
        match entry.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()))
            }
            None => anyhow::bail!("header {:?} is not NAME:VALUE", entry),
        }
    }
    Ok(headers)
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("webgrab=info,warn"),
            1 => EnvFilter::new("webgrab=debug,info"),
            2 => EnvFilter::new("webgrab=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
