//! The crawl engine
//!
//! A single event loop drives the whole crawl. URL records are checked
//! out of the frontier, run through the filter chain and the robots
//! gate, paced by the politeness waiter, and fetched on spawned tasks.
//! Everything stateful (frontier, cookie jar, robots cache, WARC
//! recorder, file writer) is touched only from this loop; tasks do
//! nothing but the network exchange.
//!
//! Stop handling: the first interrupt blocks new dispatches and lets
//! in-flight work finish; a second interrupt aborts the tasks, flips
//! their records back to TODO and closes the outputs.

use crate::config::Options;
use crate::cookies::{load_cookies_txt, save_cookies_txt, CookieJar};
use crate::fetcher::{
    build_http_client, ErrorKind, Exchange, FetchOutcome, FetchRequest, Fetcher,
};
use crate::filters::FilterChain;
use crate::frontier::{
    FrontierStore, LinkType, RecordUpdate, UrlRecord, UrlStatus, VisitRecord,
};
use crate::hooks::{Action, ErrorInfo, HookRegistry, ResponseInfo};
use crate::politeness::PolitenessWaiter;
use crate::redirect::RedirectTracker;
use crate::robots::RobotsCache;
use crate::scrape::{extract_links, LinkKind};
use crate::stats::Stats;
use crate::url::{canonicalize, host_key, hostname};
use crate::warc::WarcRecorder;
use crate::writer::FileWriter;
use crate::{Result, WebgrabError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use url::Url;

/// Idle tick between dispatch scans
const TICK: Duration = Duration::from_millis(100);

/// Documents larger than this are not scraped for links
const SCRAPE_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Hold-off applied to a host that answered 429
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Process exit codes, wget-compatible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    GenericError,
    ParseError,
    NetworkError,
    SslError,
    AuthFailure,
    ServerError,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::GenericError => 1,
            Self::ParseError => 2,
            Self::NetworkError => 4,
            Self::SslError => 6,
            Self::AuthFailure => 7,
            Self::ServerError => 8,
        }
    }
}

/// Why a task was spawned
enum TaskKind {
    /// A frontier record
    Item,
    /// A robots.txt probe for one host
    Robots { host_key: String },
}

/// State carried through one logical request (all its redirect hops)
struct TaskCtx {
    record: UrlRecord,
    kind: TaskKind,
    /// Current hop target
    url: Url,
    tracker: RedirectTracker,
    /// Set on hops past the first
    is_redirect: bool,
    strip_authorization: bool,
}

/// A prepared request waiting for its host to become available
struct Parked {
    ctx: Box<TaskCtx>,
    /// Host key the item waits on for robots resolution
    waiting_robots: Option<String>,
}

/// The crawl engine
pub struct Engine {
    options: Options,
    store: FrontierStore,
    fetcher: Arc<Fetcher>,
    filters: FilterChain,
    cookies: CookieJar,
    robots: RobotsCache,
    waiter: PolitenessWaiter,
    writer: FileWriter,
    recorder: Option<WarcRecorder>,
    hooks: HookRegistry,
    stats: Arc<Stats>,

    saw_ssl_error: bool,
    saw_network_error: bool,
    saw_auth_error: bool,
    saw_server_error: bool,
    stop_requested: bool,
}

impl Engine {
    /// Builds an engine and all its collaborators from options
    pub fn new(options: Options) -> Result<Self> {
        let stats = Arc::new(Stats::new());

        let filters = FilterChain::from_policy(
            &options.policy,
            options.quota.map(|q| (q, stats.clone())),
        )
        .map_err(|e| WebgrabError::Url(crate::UrlError::Malformed(e.to_string())))?;

        let client = build_http_client(&options)?;
        let fetcher = Arc::new(Fetcher::new(client, options.clone(), stats.clone()));

        let store = FrontierStore::open(&options.database)?;

        let mut cookies = CookieJar::new();
        if options.protocol.cookies_enabled {
            if let Some(path) = &options.protocol.load_cookies {
                let loaded = load_cookies_txt(&mut cookies, path)?;
                tracing::info!("Loaded {} cookies from {}", loaded, path.display());
            }
        }

        let recorder = match &options.warc {
            Some(warc_options) => Some(WarcRecorder::open(warc_options.clone())?),
            None => None,
        };

        let writer = FileWriter::new(options.output.clone());
        let waiter = PolitenessWaiter::new(&options.timing);

        Ok(Self {
            options,
            store,
            fetcher,
            filters,
            cookies,
            robots: RobotsCache::new(),
            waiter,
            writer,
            recorder,
            hooks: HookRegistry::new(),
            stats,
            saw_ssl_error: false,
            saw_network_error: false,
            saw_auth_error: false,
            saw_server_error: false,
            stop_requested: false,
        })
    }

    pub fn register_hook(&mut self, hook: Box<dyn crate::hooks::Hook>) {
        self.hooks.register(hook);
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn store(&self) -> &FrontierStore {
        &self.store
    }

    /// Adds seed URLs at level 0
    pub fn seed_urls<I, S>(&mut self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = Vec::new();
        for url in urls {
            let canonical = canonicalize(url.as_ref())?;
            records.push(UrlRecord::seed(canonical.fetch.as_str(), &canonical.key));
        }

        let inserted = self.store.add_many(&records)?;
        self.stats.add_queued(inserted as u64);
        for rec in &records {
            self.hooks.queued_url(&rec.url);
        }
        Ok(inserted)
    }

    /// Runs the crawl to completion (or until stopped)
    pub async fn run(&mut self) -> Result<ExitStatus> {
        let released = self.store.release_in_progress()?;
        if released > 0 {
            tracing::info!("Recovered {} interrupted URLs back into the queue", released);
        }

        let mut tasks: JoinSet<(Box<TaskCtx>, FetchOutcome)> = JoinSet::new();
        let mut parked: Vec<Parked> = Vec::new();
        let mut robots_inflight: HashSet<String> = HashSet::new();
        let mut interrupts = 0u32;

        loop {
            if !self.stop_requested {
                self.dispatch_ready(&mut tasks, &mut parked, &mut robots_inflight)?;
            }

            if tasks.is_empty() && (self.stop_requested || parked.is_empty()) {
                // Nothing in flight; the frontier decides whether we are done
                if self.stop_requested || self.store.check_out()?.is_none() {
                    break;
                } else {
                    // check_out flipped one to IN_PROGRESS; put it back and
                    // let the next dispatch pass pick it up in order
                    self.store.release_in_progress()?;
                    continue;
                }
            }

            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => {
                    interrupts += 1;
                    if interrupts == 1 {
                        tracing::warn!("Interrupt: finishing in-flight requests, no new work");
                        self.stop_requested = true;
                        self.release_parked(&mut parked)?;
                    } else {
                        tracing::warn!("Second interrupt: aborting in-flight requests");
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((ctx, outcome)) => {
                            self.handle_completion(*ctx, outcome, &mut parked, &mut robots_inflight)?;
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => tracing::error!("Fetch task died: {}", e),
                    }
                }

                _ = tokio::time::sleep(TICK) => {}
            }

            if self.quota_spent() && !self.stop_requested {
                tracing::info!("Download quota reached, finishing in-flight requests");
                self.stop_requested = true;
                self.release_parked(&mut parked)?;
            }
        }

        self.release_parked(&mut parked)?;
        self.finish().await
    }

    /// Moves parked work back to TODO so a resume picks it up
    fn release_parked(&mut self, parked: &mut Vec<Parked>) -> Result<()> {
        for p in parked.drain(..) {
            if matches!(p.ctx.kind, TaskKind::Item) {
                self.store
                    .update(&p.ctx.record.url_key, &RecordUpdate::status(UrlStatus::Todo))?;
            }
        }
        Ok(())
    }

    fn quota_spent(&self) -> bool {
        matches!(self.options.quota, Some(q) if self.stats.bytes_in() >= q)
    }

    /// Pulls work from the frontier and parked list onto tasks
    fn dispatch_ready(
        &mut self,
        tasks: &mut JoinSet<(Box<TaskCtx>, FetchOutcome)>,
        parked: &mut Vec<Parked>,
        robots_inflight: &mut HashSet<String>,
    ) -> Result<()> {
        let now = Instant::now();

        // Parked items first; they were checked out earlier
        let mut still_parked = Vec::new();
        for mut p in parked.drain(..) {
            if tasks.len() >= self.options.concurrent {
                still_parked.push(p);
                continue;
            }
            if let Some(host_key) = &p.waiting_robots {
                if robots_inflight.contains(host_key) {
                    still_parked.push(p);
                    continue;
                }
                p.waiting_robots = None;
                // Robots answer is in; re-run the gate
                match self.robots_gate(&p.ctx, tasks, robots_inflight)? {
                    RobotsGate::Allowed => {}
                    RobotsGate::Denied => {
                        self.skip_record(&p.ctx.record, &["robots"])?;
                        continue;
                    }
                    RobotsGate::Pending(host_key) => {
                        p.waiting_robots = Some(host_key);
                        still_parked.push(p);
                        continue;
                    }
                }
            }

            let host = match hostname(&p.ctx.url) {
                Some(h) => h,
                None => continue,
            };
            if self.waiter.can_request(&host, now) {
                self.spawn_fetch(tasks, p.ctx, &host);
            } else {
                still_parked.push(p);
            }
        }
        *parked = still_parked;

        // Then fresh checkouts
        while tasks.len() + parked.len() < self.options.concurrent {
            let record = match self.store.check_out()? {
                Some(r) => r,
                None => break,
            };
            self.stats.add_dequeued();
            self.hooks.dequeued_url(&record);
            if let Some(parked_entry) = self.prepare(record, tasks, robots_inflight)? {
                parked.push(parked_entry);
            }
        }

        Ok(())
    }

    /// Runs a checked-out record through filters and the robots gate
    ///
    /// Returns a parked entry when the item must wait (robots fetch in
    /// flight, host busy); None when it was spawned or settled.
    fn prepare(
        &mut self,
        record: UrlRecord,
        tasks: &mut JoinSet<(Box<TaskCtx>, FetchOutcome)>,
        robots_inflight: &mut HashSet<String>,
    ) -> Result<Option<Parked>> {
        let url = match Url::parse(&record.url) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("Unfetchable URL {}: {}", record.url, e);
                self.store.update(
                    &record.url_key,
                    &RecordUpdate::status(UrlStatus::Error),
                )?;
                self.stats.add_error();
                return Ok(None);
            }
        };

        let verdict = self.filters.evaluate(&record, &url);
        let accepted = match self.hooks.accept_url(&record, verdict.passed()) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        };
        if !accepted {
            self.skip_record(&record, &verdict.failed)?;
            return Ok(None);
        }

        let ctx = Box::new(TaskCtx {
            tracker: RedirectTracker::new(url.clone(), self.options.policy.max_redirects),
            url,
            record,
            kind: TaskKind::Item,
            is_redirect: false,
            strip_authorization: false,
        });

        match self.robots_gate(&ctx, tasks, robots_inflight)? {
            RobotsGate::Denied => {
                self.skip_record(&ctx.record, &["robots"])?;
                return Ok(None);
            }
            RobotsGate::Pending(host_key) => {
                return Ok(Some(Parked {
                    ctx,
                    waiting_robots: Some(host_key),
                }));
            }
            RobotsGate::Allowed => {}
        }

        let host = match hostname(&ctx.url) {
            Some(h) => h,
            None => {
                self.skip_record(&ctx.record, &["scheme"])?;
                return Ok(None);
            }
        };

        if self.waiter.can_request(&host, Instant::now()) {
            self.spawn_fetch(tasks, ctx, &host);
            Ok(None)
        } else {
            Ok(Some(Parked {
                ctx,
                waiting_robots: None,
            }))
        }
    }

    /// Consults the robots cache, scheduling a fetch on a miss
    fn robots_gate(
        &mut self,
        ctx: &TaskCtx,
        tasks: &mut JoinSet<(Box<TaskCtx>, FetchOutcome)>,
        robots_inflight: &mut HashSet<String>,
    ) -> Result<RobotsGate> {
        if !self.options.policy.robots
            || !matches!(ctx.url.scheme(), "http" | "https")
            || matches!(ctx.kind, TaskKind::Robots { .. })
        {
            return Ok(RobotsGate::Allowed);
        }

        let key = match host_key(&ctx.url) {
            Some(k) => k,
            None => return Ok(RobotsGate::Allowed),
        };

        match self.robots.lookup(&key) {
            Some(entry) => {
                let allowed = entry.is_allowed(
                    ctx.url.as_str(),
                    &self.options.protocol.user_agent,
                );
                if let Some(delay) = entry.crawl_delay(&self.options.protocol.user_agent) {
                    if let Some(host) = hostname(&ctx.url) {
                        self.waiter.set_crawl_delay(&host, delay);
                    }
                }
                if allowed {
                    Ok(RobotsGate::Allowed)
                } else {
                    Ok(RobotsGate::Denied)
                }
            }
            None => {
                if !robots_inflight.contains(&key) {
                    robots_inflight.insert(key.clone());
                    self.spawn_robots_fetch(tasks, &ctx.url, &key)?;
                }
                Ok(RobotsGate::Pending(key))
            }
        }
    }

    /// Robots probes run outside the frontier on a synthetic record
    fn spawn_robots_fetch(
        &mut self,
        tasks: &mut JoinSet<(Box<TaskCtx>, FetchOutcome)>,
        for_url: &Url,
        key: &str,
    ) -> Result<()> {
        let mut robots_url = for_url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        let canonical = canonicalize(robots_url.as_str())?;
        let mut record = UrlRecord::seed(canonical.fetch.as_str(), &canonical.key);
        record.link_type = Some(LinkType::Robots);

        tracing::debug!("Fetching {}", robots_url);

        // The probe ignores politeness readiness but still counts as the
        // host's in-flight request.
        let host = hostname(for_url).unwrap_or_default();
        self.waiter.begin_request(&host);

        let ctx = Box::new(TaskCtx {
            tracker: RedirectTracker::new(robots_url.clone(), self.options.policy.max_redirects),
            url: robots_url,
            record,
            kind: TaskKind::Robots {
                host_key: key.to_string(),
            },
            is_redirect: false,
            strip_authorization: false,
        });

        let fetcher = self.fetcher.clone();
        let request = self.build_fetch_request(&ctx);
        tasks.spawn(async move { (ctx, fetcher.fetch_one(request).await) });
        Ok(())
    }

    fn build_fetch_request(&mut self, ctx: &TaskCtx) -> FetchRequest {
        let mut request = FetchRequest::get(ctx.url.clone());
        request.referer = ctx.record.referer.clone();
        request.strip_authorization = ctx.strip_authorization;

        if matches!(ctx.kind, TaskKind::Item) {
            request.post_data = ctx
                .record
                .post_data
                .clone()
                .or_else(|| self.options.protocol.post_data.clone());
            if !ctx.is_redirect {
                request.range_from = self.writer.resume_offset(&ctx.url);
                request.if_modified_since = self
                    .writer
                    .local_mtime(&ctx.url)
                    .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
            }
        }

        if self.options.protocol.cookies_enabled {
            request.cookie_header = self.cookies.header_for(&ctx.url);
        }

        request
    }

    fn spawn_fetch(
        &mut self,
        tasks: &mut JoinSet<(Box<TaskCtx>, FetchOutcome)>,
        ctx: Box<TaskCtx>,
        host: &str,
    ) {
        self.waiter.begin_request(host);
        let request = self.build_fetch_request(&ctx);
        let fetcher = self.fetcher.clone();
        tracing::debug!("Fetching {}", ctx.url);
        tasks.spawn(async move {
            let outcome = fetcher.fetch_one(request).await;
            (ctx, outcome)
        });
    }

    /// Routes a finished task
    fn handle_completion(
        &mut self,
        ctx: TaskCtx,
        outcome: FetchOutcome,
        parked: &mut Vec<Parked>,
        robots_inflight: &mut HashSet<String>,
    ) -> Result<()> {
        let host = hostname(&ctx.url).unwrap_or_default();

        match outcome {
            FetchOutcome::Completed(exchange) => {
                self.waiter
                    .complete_request(&host, exchange.status < 500);
                if self.options.protocol.cookies_enabled {
                    let set_cookies: Vec<String> = exchange
                        .headers
                        .iter()
                        .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
                        .map(|(_, v)| v.clone())
                        .collect();
                    self.cookies.store_response(&ctx.url, &set_cookies);
                }

                match ctx.kind {
                    TaskKind::Robots { ref host_key } => {
                        self.finish_robots(&ctx, &exchange, host_key.clone(), robots_inflight)?;
                    }
                    TaskKind::Item => {
                        self.finish_item(ctx, exchange, parked)?;
                    }
                }
            }
            FetchOutcome::Retryable(kind) => {
                self.waiter.complete_request(&host, false);
                self.saw_network_error = true;
                // Died before response headers: a metadata record stands
                // in for the missing exchange
                if let Some(recorder) = &mut self.recorder {
                    recorder.record_failure(ctx.url.as_str(), &kind.to_string())?;
                }
                match ctx.kind {
                    TaskKind::Robots { ref host_key } => {
                        self.robots.record_failure(host_key);
                        robots_inflight.remove(host_key);
                    }
                    TaskKind::Item => self.retry_or_fail(&ctx, &kind)?,
                }
            }
            FetchOutcome::Fatal(kind) => {
                self.waiter.complete_request(&host, false);
                if kind == ErrorKind::Ssl {
                    self.saw_ssl_error = true;
                } else {
                    self.saw_network_error = true;
                }
                if let Some(recorder) = &mut self.recorder {
                    recorder.record_failure(ctx.url.as_str(), &kind.to_string())?;
                }
                match ctx.kind {
                    TaskKind::Robots { ref host_key } => {
                        // A host whose robots.txt cannot be fetched at all
                        // is treated as allow-all after the failure budget
                        self.robots.record_failure(host_key);
                        robots_inflight.remove(host_key);
                    }
                    TaskKind::Item => self.fail_record(&ctx, &kind)?,
                }
            }
        }

        Ok(())
    }

    fn finish_robots(
        &mut self,
        ctx: &TaskCtx,
        exchange: &Exchange,
        host_key: String,
        robots_inflight: &mut HashSet<String>,
    ) -> Result<()> {
        self.record_to_warc(ctx, exchange)?;

        if (500..600).contains(&exchange.status) {
            // Transient server trouble; another probe happens on the
            // next lookup unless the budget is gone
            if !self.robots.record_failure(&host_key) {
                robots_inflight.remove(&host_key);
                return Ok(());
            }
        } else {
            let body = exchange.body.to_vec().unwrap_or_default();
            let text = String::from_utf8_lossy(&body);
            self.robots
                .insert_fetched(&host_key, exchange.status, &text);

            if self.options.policy.sitemaps {
                self.enqueue_robots_sitemaps(ctx, &text)?;
            }
        }

        robots_inflight.remove(&host_key);
        Ok(())
    }

    /// `Sitemap:` lines in robots.txt seed sitemap processing
    fn enqueue_robots_sitemaps(&mut self, ctx: &TaskCtx, robots_body: &str) -> Result<()> {
        let mut records = Vec::new();
        for line in robots_body.lines() {
            let line = line.trim();
            if let Some(rest) = line
                .strip_prefix("Sitemap:")
                .or_else(|| line.strip_prefix("sitemap:"))
            {
                if let Ok(canonical) = canonicalize(rest.trim()) {
                    let mut rec =
                        UrlRecord::child(canonical.fetch.as_str(), &canonical.key, &ctx.record, false);
                    rec.link_type = Some(LinkType::Sitemap);
                    records.push(rec);
                }
            }
        }

        if !records.is_empty() {
            let inserted = self.store.add_many(&records)?;
            self.stats.add_queued(inserted as u64);
            tracing::info!("Queued {} sitemaps from robots.txt", inserted);
        }
        Ok(())
    }

    /// Post-fetch pipeline for a frontier item
    fn finish_item(
        &mut self,
        mut ctx: TaskCtx,
        exchange: Exchange,
        parked: &mut Vec<Parked>,
    ) -> Result<()> {
        let status = exchange.status;
        let response_info = ResponseInfo {
            status,
            content_type: exchange.content_type(),
            body_length: exchange.body.len(),
        };

        match self.hooks.handle_response(&ctx.record, &response_info) {
            Ok(Action::Normal) => {}
            Ok(Action::Retry) => return self.retry_or_fail(&ctx, &ErrorKind::Other("hook retry".into())),
            Ok(Action::Finish) => {
                self.record_to_warc(&ctx, &exchange)?;
                return self.complete_record(&ctx, status, None);
            }
            Ok(Action::Stop) => {
                self.stop_requested = true;
                self.record_to_warc(&ctx, &exchange)?;
                return self.complete_record(&ctx, status, None);
            }
            Err(e) => tracing::error!("{}", e),
        }

        self.record_to_warc(&ctx, &exchange)?;

        // Redirect?
        if (300..400).contains(&status) && status != 304 {
            let location = match exchange.header("location") {
                Some(l) => l.to_string(),
                None => {
                    tracing::warn!("{}: redirect without Location", ctx.url);
                    return self.fail_record(&ctx, &ErrorKind::Protocol("redirect without Location".into()));
                }
            };
            return self.follow_redirect(ctx, &location, parked);
        }

        // Conditional fetch satisfied locally
        if status == 304 {
            tracing::debug!("{} not modified, keeping local copy", ctx.url);
            return self.complete_record(&ctx, status, None);
        }

        if status == 401 || status == 407 {
            self.saw_auth_error = true;
        }

        if (400..500).contains(&status) && status != 429 {
            self.saw_server_error = true;
            self.stats.add_server_error();
            if self.options.policy.content_on_error {
                let path = self.save_body(&ctx, &exchange)?;
                return self.complete_error(&ctx, status, path);
            }
            return self.complete_error(&ctx, status, None);
        }

        if status == 429 || (500..600).contains(&status) {
            self.saw_server_error = true;
            self.stats.add_server_error();
            if status == 429 {
                if let Some(h) = hostname(&ctx.url) {
                    self.waiter.apply_cooldown(&h, RATE_LIMIT_COOLDOWN);
                }
            }
            return self.retry_or_fail(&ctx, &ErrorKind::Other(format!("HTTP {}", status)));
        }

        // Success: write, scrape, enqueue
        let path = self.save_body(&ctx, &exchange)?;
        self.scrape_and_enqueue(&mut ctx, &exchange)?;
        self.complete_record(&ctx, status, path)
    }

    fn follow_redirect(
        &mut self,
        mut ctx: TaskCtx,
        location: &str,
        parked: &mut Vec<Parked>,
    ) -> Result<()> {
        let current = ctx.url.clone();
        let hop = match ctx.tracker.follow(&current, location) {
            Ok(hop) => hop,
            Err(WebgrabError::RedirectCycle { url }) => {
                tracing::warn!("Redirect loop at {}", url);
                return self.fail_record(&ctx, &ErrorKind::Other("redirect loop".into()));
            }
            Err(WebgrabError::RedirectLimit { url }) => {
                tracing::warn!("Too many redirects from {}", url);
                return self.fail_record(&ctx, &ErrorKind::Other("too many redirects".into()));
            }
            Err(_) => {
                return self.fail_record(&ctx, &ErrorKind::Protocol("bad redirect target".into()));
            }
        };

        let verdict = if self.options.policy.strong_redirects {
            self.filters.evaluate_redirect(&ctx.record, &hop.target)
        } else {
            self.filters.evaluate(&ctx.record, &hop.target)
        };
        if !verdict.passed() {
            return self.skip_record(&ctx.record, &verdict.failed);
        }

        tracing::debug!("{} -> {}", current, hop.target);
        ctx.url = hop.target;
        ctx.is_redirect = true;
        ctx.strip_authorization = !hop.keep_authorization;
        parked.push(Parked {
            ctx: Box::new(ctx),
            waiting_robots: None,
        });
        Ok(())
    }

    fn save_body(&mut self, ctx: &TaskCtx, exchange: &Exchange) -> Result<Option<String>> {
        let append = exchange.status == 206;
        let path = self.writer.save(&ctx.url, &exchange.body, append)?;
        Ok(Some(path.to_string_lossy().to_string()))
    }

    fn scrape_and_enqueue(&mut self, ctx: &mut TaskCtx, exchange: &Exchange) -> Result<()> {
        let policy = &self.options.policy;
        if !policy.recursive && !policy.page_requisites && !policy.sitemaps {
            return Ok(());
        }
        if exchange.body.len() > SCRAPE_SIZE_LIMIT {
            tracing::debug!("{} too large to scrape", ctx.url);
            return Ok(());
        }

        let body = exchange.body.to_vec()?;
        let content_type = exchange.content_type();
        let links = extract_links(content_type.as_deref(), &ctx.url, &body, policy);
        if links.is_empty() && self.hooks.is_empty() {
            return Ok(());
        }

        let mut children = Vec::new();
        for link in &links {
            let wanted = match link.kind {
                LinkKind::PageRequisite | LinkKind::ScriptSrc => policy.page_requisites,
                LinkKind::LinkedPage => policy.recursive,
                LinkKind::SitemapEntry => policy.sitemaps,
            };
            if !wanted {
                continue;
            }
            let canonical = match canonicalize(&link.url) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let mut rec = UrlRecord::child(
                canonical.fetch.as_str(),
                &canonical.key,
                &ctx.record,
                link.kind.is_inline(),
            );
            rec.link_type = link.link_type;
            children.push(rec);
        }

        match self.hooks.get_urls(&ctx.record) {
            Ok(injected) => {
                for inj in injected {
                    if let Ok(canonical) = canonicalize(&inj.url) {
                        children.push(UrlRecord::child(
                            canonical.fetch.as_str(),
                            &canonical.key,
                            &ctx.record,
                            inj.inline,
                        ));
                    }
                }
            }
            Err(e) => tracing::error!("{}", e),
        }

        // Requisites first so a page is usable as soon as it lands
        children.sort_by_key(|r| !r.inline);

        let inserted = self.store.add_many(&children)?;
        self.stats.add_queued(inserted as u64);
        for rec in children.iter() {
            self.hooks.queued_url(&rec.url);
        }
        tracing::debug!(
            "{}: {} links found, {} new",
            ctx.url,
            links.len(),
            inserted
        );
        Ok(())
    }

    /// Records the exchange into the WARC, revisit-aware
    fn record_to_warc(&mut self, ctx: &TaskCtx, exchange: &Exchange) -> Result<()> {
        let recorder = match &mut self.recorder {
            Some(r) => r,
            None => return Ok(()),
        };

        let dedup = self.options.warc.as_ref().map(|w| w.dedup).unwrap_or(false);

        // A revisit needs the digest before writing, so compute it here
        // when dedup is on; the recorder recomputes for the record.
        let previous = if dedup && exchange.status == 200 {
            let digest = crate::warc::digest_label(exchange.body.reader()?)?;
            self.store.find_visit_by_digest(&digest)?
        } else {
            None
        };

        let recorded =
            recorder.record_exchange(exchange, ctx.url.as_str(), previous.as_ref())?;

        if let (Some(digest), false) = (&recorded.payload_digest, recorded.revisit) {
            self.store.record_visit(
                &ctx.record.url_key,
                digest,
                &VisitRecord {
                    warc_record_id: recorded.record_id.clone(),
                    target_uri: ctx.url.to_string(),
                    warc_date: recorded.warc_date.clone(),
                },
            )?;
        }

        Ok(())
    }

    /// Retryable failure: requeue with backoff or mark terminal
    fn retry_or_fail(&mut self, ctx: &TaskCtx, kind: &ErrorKind) -> Result<()> {
        let tries = ctx.record.try_count + 1;
        let error_info = ErrorInfo {
            description: kind.to_string(),
            retryable: true,
        };
        let action = self.hooks.handle_error(&ctx.record, &error_info);

        let exhausted = tries >= self.options.retry.tries;
        let give_up = match action {
            Ok(Action::Finish) | Ok(Action::Stop) => true,
            Ok(Action::Retry) => false,
            _ => exhausted,
        };

        if give_up {
            tracing::warn!("{} failed after {} tries: {}", ctx.record.url, tries, kind);
            self.store.update(
                &ctx.record.url_key,
                &RecordUpdate {
                    status: Some(UrlStatus::Error),
                    try_count: Some(tries),
                    ..Default::default()
                },
            )?;
            self.stats.add_error();
        } else {
            tracing::debug!(
                "{} attempt {} failed ({}), will retry",
                ctx.record.url,
                tries,
                kind
            );
            self.store.update(
                &ctx.record.url_key,
                &RecordUpdate {
                    status: Some(UrlStatus::Todo),
                    try_count: Some(tries),
                    ..Default::default()
                },
            )?;
        }

        if matches!(action, Ok(Action::Stop)) {
            self.stop_requested = true;
        }
        Ok(())
    }

    /// Terminal failure
    fn fail_record(&mut self, ctx: &TaskCtx, kind: &ErrorKind) -> Result<()> {
        let error_info = ErrorInfo {
            description: kind.to_string(),
            retryable: false,
        };
        if let Ok(Action::Stop) = self.hooks.handle_error(&ctx.record, &error_info) {
            self.stop_requested = true;
        }

        tracing::warn!("{} failed: {}", ctx.record.url, kind);
        self.store.update(
            &ctx.record.url_key,
            &RecordUpdate {
                status: Some(UrlStatus::Error),
                try_count: Some(ctx.record.try_count + 1),
                ..Default::default()
            },
        )?;
        self.stats.add_error();
        Ok(())
    }

    fn skip_record(&mut self, record: &UrlRecord, reasons: &[&str]) -> Result<()> {
        tracing::debug!("Skipping {} ({})", record.url, reasons.join(", "));
        self.store
            .update(&record.url_key, &RecordUpdate::status(UrlStatus::Skipped))?;
        self.stats.add_skipped();
        Ok(())
    }

    fn complete_record(
        &mut self,
        ctx: &TaskCtx,
        status: u16,
        filename: Option<String>,
    ) -> Result<()> {
        self.store.update(
            &ctx.record.url_key,
            &RecordUpdate {
                status: Some(UrlStatus::Done),
                try_count: Some(ctx.record.try_count + 1),
                status_code: Some(status),
                filename,
            },
        )?;
        self.stats.add_done();
        Ok(())
    }

    fn complete_error(
        &mut self,
        ctx: &TaskCtx,
        status: u16,
        filename: Option<String>,
    ) -> Result<()> {
        self.store.update(
            &ctx.record.url_key,
            &RecordUpdate {
                status: Some(UrlStatus::Error),
                try_count: Some(ctx.record.try_count + 1),
                status_code: Some(status),
                filename,
            },
        )?;
        self.stats.add_error();
        Ok(())
    }

    /// Flushes and closes every collaborator, computes the exit status
    async fn finish(&mut self) -> Result<ExitStatus> {
        self.store.release_in_progress()?;

        if self.options.output.delete_after {
            let removed = self.writer.delete_written();
            tracing::info!("Removed {} files (--delete-after)", removed);
        }

        if self.options.protocol.cookies_enabled {
            if let Some(path) = &self.options.protocol.save_cookies {
                let saved = save_cookies_txt(
                    &self.cookies,
                    path,
                    self.options.protocol.keep_session_cookies,
                )?;
                tracing::info!("Saved {} cookies to {}", saved, path.display());
            }
        }

        if let Some(mut recorder) = self.recorder.take() {
            recorder.log(&format!(
                "fetched={} failed={} skipped={} bytes={}",
                self.stats.done(),
                self.stats.errors(),
                self.stats.skipped(),
                self.stats.bytes_in()
            ));
            let files = recorder.close()?;
            for file in files {
                tracing::info!("WARC written: {}", file.display());
            }
        }

        self.stats.report();
        self.hooks.finish_statistics(
            self.stats.done(),
            self.stats.errors(),
            self.stats.bytes_in(),
        );

        let status = if self.saw_ssl_error {
            ExitStatus::SslError
        } else if self.saw_auth_error {
            ExitStatus::AuthFailure
        } else if self.saw_server_error {
            ExitStatus::ServerError
        } else if self.saw_network_error {
            ExitStatus::NetworkError
        } else {
            ExitStatus::Success
        };

        let code = self.hooks.exit_status(status.code());
        Ok(match code {
            0 => ExitStatus::Success,
            2 => ExitStatus::ParseError,
            4 => ExitStatus::NetworkError,
            6 => ExitStatus::SslError,
            7 => ExitStatus::AuthFailure,
            8 => ExitStatus::ServerError,
            _ => {
                if code == status.code() {
                    status
                } else {
                    ExitStatus::GenericError
                }
            }
        })
    }
}

enum RobotsGate {
    Allowed,
    Denied,
    Pending(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::GenericError.code(), 1);
        assert_eq!(ExitStatus::ParseError.code(), 2);
        assert_eq!(ExitStatus::NetworkError.code(), 4);
        assert_eq!(ExitStatus::SslError.code(), 6);
        assert_eq!(ExitStatus::AuthFailure.code(), 7);
        assert_eq!(ExitStatus::ServerError.code(), 8);
    }
}
