//! Per-host politeness
//!
//! Tracks when each host was last hit and how long to hold off before
//! the next request. The engine consults this before dispatching work;
//! one in-flight request per host also keeps same-host ordering intact.

use crate::config::TimingOptions;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-host pacing state
#[derive(Debug, Default)]
struct HostState {
    last_request: Option<Instant>,
    in_flight: bool,
    /// Consecutive retryable failures, drives backoff
    failures: u32,
    /// Crawl-delay picked up from robots.txt
    crawl_delay: Option<Duration>,
    /// Extra hold-off from a 429 response
    cooldown_until: Option<Instant>,
}

/// Politeness bookkeeping for all hosts
pub struct PolitenessWaiter {
    wait: Option<Duration>,
    random_wait: bool,
    waitretry: Option<Duration>,
    hosts: HashMap<String, HostState>,
}

impl PolitenessWaiter {
    pub fn new(timing: &TimingOptions) -> Self {
        Self {
            wait: timing.wait,
            random_wait: timing.random_wait,
            waitretry: timing.waitretry,
            hosts: HashMap::new(),
        }
    }

    /// True when a request to the host may start now
    pub fn can_request(&self, host: &str, now: Instant) -> bool {
        match self.hosts.get(host) {
            None => true,
            Some(state) => {
                !state.in_flight
                    && self
                        .next_allowed(state)
                        .map(|at| now >= at)
                        .unwrap_or(true)
            }
        }
    }

    /// Time until the host is ready, None when ready now
    pub fn time_until_ready(&self, host: &str, now: Instant) -> Option<Duration> {
        let state = self.hosts.get(host)?;
        if state.in_flight {
            // Unknowable until the in-flight request finishes
            return Some(Duration::from_millis(100));
        }
        let at = self.next_allowed(state)?;
        if at > now {
            Some(at - now)
        } else {
            None
        }
    }

    /// Marks a request started
    pub fn begin_request(&mut self, host: &str) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.in_flight = true;
    }

    /// Marks a request finished
    ///
    /// Success resets the failure streak; a retryable failure extends
    /// it, which lengthens the backoff applied on the next attempt.
    pub fn complete_request(&mut self, host: &str, success: bool) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.in_flight = false;
        state.last_request = Some(Instant::now());
        if success {
            state.failures = 0;
        } else {
            state.failures += 1;
        }
    }

    /// Records a robots.txt crawl-delay for the host
    pub fn set_crawl_delay(&mut self, host: &str, seconds: f64) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.crawl_delay = Some(Duration::from_secs_f64(seconds));
    }

    /// Applies an extended cooldown (server sent 429)
    pub fn apply_cooldown(&mut self, host: &str, duration: Duration) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.cooldown_until = Some(Instant::now() + duration);
    }

    /// Delay before retrying a failed URL: capped exponential
    ///
    /// min(2^attempt seconds, waitretry); without a waitretry cap the
    /// exponent alone decides.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(2u64.saturating_pow(attempt.min(16)));
        match self.waitretry {
            Some(cap) => exp.min(cap),
            None => exp,
        }
    }

    fn next_allowed(&self, state: &HostState) -> Option<Instant> {
        let last = state.last_request?;

        let base = self.effective_wait(state);
        let backoff = if state.failures > 0 {
            self.retry_delay(state.failures)
        } else {
            Duration::ZERO
        };

        let mut at = last + base.max(backoff);
        if let Some(cooldown) = state.cooldown_until {
            at = at.max(cooldown);
        }
        Some(at)
    }

    /// The larger of the configured wait and the host's crawl-delay,
    /// with random-wait jitter in [0.5w, 1.5w] when enabled
    fn effective_wait(&self, state: &HostState) -> Duration {
        let configured = match self.wait {
            Some(w) if self.random_wait => {
                let factor = rand::thread_rng().gen_range(0.5..=1.5);
                w.mul_f64(factor)
            }
            Some(w) => w,
            None => Duration::ZERO,
        };

        configured.max(state.crawl_delay.unwrap_or(Duration::ZERO))
    }
}
