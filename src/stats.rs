//! Crawl counters
//!
//! Shared, lock-free counters the engine and fetcher bump as work
//! happens. A snapshot is printed at the end of the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Process-wide crawl statistics
pub struct Stats {
    started: Instant,
    queued: AtomicU64,
    dequeued: AtomicU64,
    done: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    /// Server 4xx/5xx responses seen, for the exit status
    server_errors: AtomicU64,
    /// Bytes per host, for the bandwidth report
    host_bytes: Mutex<HashMap<String, u64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            queued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            host_bytes: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_queued(&self, n: u64) {
        self.queued.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_host_bytes(&self, host: &str, n: u64) {
        let mut map = self.host_bytes.lock().unwrap_or_else(|e| e.into_inner());
        *map.entry(host.to_string()).or_insert(0) += n;
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn server_errors(&self) -> u64 {
        self.server_errors.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Logs the end-of-run summary
    pub fn report(&self) {
        let elapsed = self.started.elapsed();
        let bytes = self.bytes_in();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            bytes as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        tracing::info!(
            "Finished: {} fetched, {} failed, {} skipped, {} bytes in {:.1}s ({:.0} B/s)",
            self.done(),
            self.errors(),
            self.skipped(),
            bytes,
            elapsed.as_secs_f64(),
            rate
        );

        let map = self.host_bytes.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts: Vec<_> = map.iter().collect();
        hosts.sort_by(|a, b| b.1.cmp(a.1));
        for (host, bytes) in hosts.iter().take(10) {
            tracing::debug!("  {}: {} bytes", host, bytes);
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = Stats::new();
        assert_eq!(stats.queued(), 0);
        assert_eq!(stats.bytes_in(), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = Stats::new();
        stats.add_queued(3);
        stats.add_dequeued();
        stats.add_done();
        stats.add_bytes_in(1024);

        assert_eq!(stats.queued(), 3);
        assert_eq!(stats.dequeued(), 1);
        assert_eq!(stats.done(), 1);
        assert_eq!(stats.bytes_in(), 1024);
    }

    #[test]
    fn test_in_flight_invariant() {
        let stats = Stats::new();
        stats.add_queued(5);
        stats.add_dequeued();
        stats.add_dequeued();
        // queued - dequeued equals work not yet picked up
        assert_eq!(stats.queued() - stats.dequeued(), 3);
    }

    #[test]
    fn test_host_bytes() {
        let stats = Stats::new();
        stats.add_host_bytes("example.com", 10);
        stats.add_host_bytes("example.com", 5);
        let map = stats.host_bytes.lock().unwrap();
        assert_eq!(map.get("example.com"), Some(&15));
    }
}
