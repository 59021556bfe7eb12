//! HTTP fetching
//!
//! The fetcher executes exactly one HTTP exchange per call. Redirects
//! are returned to the caller as ordinary responses so the engine can
//! record and filter every hop. Bodies stream into a [`BodyBuffer`]
//! with pacing applied for `--limit-rate`.

mod body;
mod client;

pub use body::{BodyBuffer, DEFAULT_SPILL_THRESHOLD};
pub use client::build_http_client;

use crate::config::{Options, RetryOptions};
use crate::stats::Stats;
use futures_util::StreamExt;
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Classified fetch failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP connection refused
    ConnectRefused,

    /// Connection reset or dropped mid-exchange
    ConnectionReset,

    /// Name resolution failed
    Dns,

    /// A timeout fired (connect, read or whole-session)
    Timeout,

    /// Malformed response framing
    Protocol(String),

    /// Certificate verification failed
    Ssl,

    /// Anything else
    Other(String),
}

impl ErrorKind {
    /// Whether the failure is worth another attempt
    pub fn is_retryable(&self, retry: &RetryOptions) -> bool {
        match self {
            Self::ConnectRefused => retry.retry_connrefused,
            Self::Dns => retry.retry_dns_error,
            Self::ConnectionReset | Self::Timeout | Self::Protocol(_) => true,
            Self::Ssl => false,
            Self::Other(_) => true,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectRefused => write!(f, "connection refused"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::Dns => write!(f, "DNS resolution failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Ssl => write!(f, "certificate verification failed"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Result of one fetch attempt
pub enum FetchOutcome {
    /// The exchange completed; any status code, redirects included
    Completed(Exchange),

    /// Failed in a way worth retrying
    Retryable(ErrorKind),

    /// Failed terminally
    Fatal(ErrorKind),
}

/// The request half of an exchange, as sent
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: String,
    pub url: Url,
    /// Headers in send order, Host first
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SentRequest {
    /// Reconstructs the request head as it went on the wire
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let path = match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        };
        out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, path).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// One completed HTTP exchange
pub struct Exchange {
    pub request: SentRequest,
    pub status: u16,
    pub reason: String,
    /// Response headers in receive order
    pub headers: Vec<(String, String)>,
    pub body: BodyBuffer,
    /// Peer address, when the transport exposes it
    pub remote_addr: Option<String>,
    pub duration: Duration,
}

impl Exchange {
    /// First value of a response header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Content-Type without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .map(|m| format!("{}/{}", m.type_(), m.subtype()))
    }

    /// Reconstructs the response head as received
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Parameters for one fetch
pub struct FetchRequest {
    pub url: Url,
    pub referer: Option<String>,
    pub post_data: Option<String>,
    pub cookie_header: Option<String>,
    /// Resume offset for `--continue`
    pub range_from: Option<u64>,
    /// Conditional fetch for `--timestamping`
    pub if_modified_since: Option<String>,
    /// Drop Authorization on cross-origin redirect hops
    pub strip_authorization: bool,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            referer: None,
            post_data: None,
            cookie_header: None,
            range_from: None,
            if_modified_since: None,
            strip_authorization: false,
        }
    }
}

/// Executes HTTP exchanges over the shared client
pub struct Fetcher {
    client: Client,
    options: Options,
    stats: Arc<Stats>,
}

impl Fetcher {
    pub fn new(client: Client, options: Options, stats: Arc<Stats>) -> Self {
        Self {
            client,
            options,
            stats,
        }
    }

    /// Performs one HTTP exchange, streaming the body to a buffer
    ///
    /// The returned outcome carries redirects and error statuses as
    /// completed exchanges; only transport-level failures surface as
    /// `Retryable`/`Fatal`.
    pub async fn fetch_one(&self, req: FetchRequest) -> FetchOutcome {
        let started = Instant::now();
        let sent = self.build_request(&req);

        let work = self.execute(&req, &sent);
        let result = match self.options.timing.session_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => return FetchOutcome::Retryable(ErrorKind::Timeout),
            },
            None => work.await,
        };

        match result {
            Ok((status, reason, headers, remote_addr, body)) => {
                FetchOutcome::Completed(Exchange {
                    request: sent,
                    status,
                    reason,
                    headers,
                    body,
                    remote_addr,
                    duration: started.elapsed(),
                })
            }
            Err(kind) => {
                if kind.is_retryable(&self.options.retry) {
                    FetchOutcome::Retryable(kind)
                } else {
                    FetchOutcome::Fatal(kind)
                }
            }
        }
    }

    fn build_request(&self, req: &FetchRequest) -> SentRequest {
        let method = if req.post_data.is_some() { "POST" } else { "GET" };
        let mut headers: Vec<(String, String)> = Vec::new();

        if let Some(host) = req.url.host_str() {
            let host_value = match req.url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.push(("Host".to_string(), host_value));
        }
        headers.push((
            "User-Agent".to_string(),
            self.options.protocol.user_agent.clone(),
        ));
        headers.push(("Accept".to_string(), "*/*".to_string()));

        let referer = self
            .options
            .protocol
            .referer
            .clone()
            .or_else(|| req.referer.clone());
        if let Some(referer) = referer {
            headers.push(("Referer".to_string(), referer));
        }

        if let Some(cookie) = &req.cookie_header {
            headers.push(("Cookie".to_string(), cookie.clone()));
        }

        if let Some(from) = req.range_from {
            headers.push(("Range".to_string(), format!("bytes={}-", from)));
        }

        if let Some(since) = &req.if_modified_since {
            headers.push(("If-Modified-Since".to_string(), since.clone()));
        }

        if !self.options.protocol.keep_alive {
            headers.push(("Connection".to_string(), "close".to_string()));
        }

        for (name, value) in &self.options.protocol.headers {
            if req.strip_authorization && name.eq_ignore_ascii_case("authorization") {
                continue;
            }
            headers.push((name.clone(), value.clone()));
        }

        if let Some(body) = &req.post_data {
            headers.push((
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
            headers.push(("Content-Length".to_string(), body.len().to_string()));
        }

        SentRequest {
            method: method.to_string(),
            url: req.url.clone(),
            headers,
            body: req.post_data.clone(),
        }
    }

    async fn execute(
        &self,
        req: &FetchRequest,
        sent: &SentRequest,
    ) -> Result<
        (
            u16,
            String,
            Vec<(String, String)>,
            Option<String>,
            BodyBuffer,
        ),
        ErrorKind,
    > {
        let method = if sent.method == "POST" {
            Method::POST
        } else {
            Method::GET
        };

        let mut builder = self.client.request(method, req.url.clone());
        for (name, value) in &sent.headers {
            // reqwest fills Host itself
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(body) = &sent.body {
            builder = builder.body(body.clone());
        }

        // reqwest has no per-read timeout; waiting for headers and each
        // body chunk is bounded separately instead.
        let read_timeout = self.options.timing.read_timeout;
        let response = with_read_timeout(read_timeout, builder.send())
            .await?
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let remote_addr = response.remote_addr().map(|a| a.to_string());
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(n, v)| {
                (
                    n.to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();

        let tempdir = self
            .options
            .warc
            .as_ref()
            .and_then(|w| w.tempdir.clone());
        let mut body = BodyBuffer::with_threshold(DEFAULT_SPILL_THRESHOLD, tempdir.as_deref());

        let host = req.url.host_str().map(|h| h.to_string());
        let limit = self.options.timing.limit_rate;
        let body_started = Instant::now();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = with_read_timeout(read_timeout, stream.next()).await? {
            let chunk = chunk.map_err(classify_reqwest_error)?;
            body.push(&chunk).map_err(|e| ErrorKind::Other(e.to_string()))?;
            self.stats.add_bytes_in(chunk.len() as u64);
            if let Some(host) = &host {
                self.stats.add_host_bytes(host, chunk.len() as u64);
            }

            if let Some(limit) = limit {
                pace(body.len(), limit, body_started).await;
            }
        }

        self.stats
            .add_bytes_out(sent.head_bytes().len() as u64);

        Ok((status, reason, headers, remote_addr, body))
    }
}

/// Bounds one await with the read timeout, when configured
async fn with_read_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T, ErrorKind>
where
    F: std::future::Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ErrorKind::Timeout),
        None => Ok(fut.await),
    }
}

/// Sleeps long enough to keep the transfer under the byte rate cap
async fn pace(transferred: u64, limit: u64, started: Instant) {
    if limit == 0 {
        return;
    }
    let expected = Duration::from_secs_f64(transferred as f64 / limit as f64);
    let elapsed = started.elapsed();
    if expected > elapsed {
        tokio::time::sleep(expected - elapsed).await;
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        return ErrorKind::Timeout;
    }

    let text = full_error_text(&e);
    if text.contains("certificate") || text.contains("handshake") {
        return ErrorKind::Ssl;
    }
    if text.contains("dns") || text.contains("resolve") {
        return ErrorKind::Dns;
    }
    if e.is_connect() {
        if text.contains("refused") {
            return ErrorKind::ConnectRefused;
        }
        return ErrorKind::ConnectionReset;
    }
    if text.contains("reset") || text.contains("broken pipe") || text.contains("closed") {
        return ErrorKind::ConnectionReset;
    }
    if e.is_decode() || e.is_body() {
        return ErrorKind::Protocol(text);
    }
    ErrorKind::Other(text)
}

/// The whole source chain, lowercased, for classification
fn full_error_text(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out.to_ascii_lowercase()
}
