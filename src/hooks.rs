//! Extension points
//!
//! Hooks observe and steer the crawl: veto URLs, rewrite wait times,
//! inject children, classify errors, adjust the exit code. The engine
//! owns a registration table and consults every hook in order; a
//! panicking hook is caught and surfaced as a `HookError` rather than
//! taking the engine down.

use crate::frontier::UrlRecord;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// A hook failed (panicked); the URL it was handling is skipped
#[derive(Debug, Error)]
#[error("hook {hook} failed while handling {context}")]
pub struct HookError {
    pub hook: &'static str,
    pub context: String,
}

/// What a hook wants done with the current item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Continue normal processing
    #[default]
    Normal,

    /// Requeue the item for another attempt
    Retry,

    /// Mark the item finished regardless of outcome
    Finish,

    /// Stop the whole crawl
    Stop,
}

/// Response details passed to response hooks
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub content_type: Option<String>,
    pub body_length: u64,
}

/// Error details passed to error hooks
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub description: String,
    pub retryable: bool,
}

/// A child URL a hook wants enqueued
#[derive(Debug, Clone)]
pub struct InjectedUrl {
    pub url: String,
    pub inline: bool,
}

/// Crawl extension point
///
/// Every method has a no-op default; implementors override what they
/// need. Methods must not block; they run on the engine's loop.
pub trait Hook: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Last word on whether a URL is fetched. Runs after the filter
    /// chain; returning false skips the URL.
    fn accept_url(&self, _record: &UrlRecord, _verdict_passed: bool) -> bool {
        _verdict_passed
    }

    /// Called when response headers are in, before the body is read
    fn handle_pre_response(&self, _record: &UrlRecord, _response: &ResponseInfo) -> Action {
        Action::Normal
    }

    /// Called when the body is complete
    fn handle_response(&self, _record: &UrlRecord, _response: &ResponseInfo) -> Action {
        Action::Normal
    }

    /// Called when a fetch failed
    fn handle_error(&self, _record: &UrlRecord, _error: &ErrorInfo) -> Action {
        Action::Normal
    }

    /// Extra child URLs to enqueue for this item
    fn get_urls(&self, _record: &UrlRecord) -> Vec<InjectedUrl> {
        Vec::new()
    }

    /// May stretch or shrink a politeness wait
    fn wait_time(&self, seconds: f64, _record: &UrlRecord) -> f64 {
        seconds
    }

    /// A URL entered the frontier
    fn queued_url(&self, _url: &str) {}

    /// A URL left the frontier for processing
    fn dequeued_url(&self, _record: &UrlRecord) {}

    /// End-of-run statistics are final
    fn finish_statistics(&self, _fetched: u64, _failed: u64, _bytes: u64) {}

    /// Last chance to change the process exit code
    fn exit_status(&self, code: i32) -> i32 {
        code
    }
}

/// The engine's hook table
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        tracing::debug!("Registered hook {}", hook.name());
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs `accept_url` through every hook, catching panics
    pub fn accept_url(&self, record: &UrlRecord, chain_passed: bool) -> Result<bool, HookError> {
        let mut verdict = chain_passed;
        for hook in &self.hooks {
            verdict = self.guard(hook.as_ref(), &record.url, || hook.accept_url(record, verdict))?;
        }
        Ok(verdict)
    }

    /// Folds the response through every hook; the strongest action wins
    pub fn handle_response(
        &self,
        record: &UrlRecord,
        response: &ResponseInfo,
    ) -> Result<Action, HookError> {
        let mut action = Action::Normal;
        for hook in &self.hooks {
            let a = self.guard(hook.as_ref(), &record.url, || hook.handle_response(record, response))?;
            action = strongest(action, a);
        }
        Ok(action)
    }

    pub fn handle_error(
        &self,
        record: &UrlRecord,
        error: &ErrorInfo,
    ) -> Result<Action, HookError> {
        let mut action = Action::Normal;
        for hook in &self.hooks {
            let a = self.guard(hook.as_ref(), &record.url, || hook.handle_error(record, error))?;
            action = strongest(action, a);
        }
        Ok(action)
    }

    pub fn get_urls(&self, record: &UrlRecord) -> Result<Vec<InjectedUrl>, HookError> {
        let mut urls = Vec::new();
        for hook in &self.hooks {
            urls.extend(self.guard(hook.as_ref(), &record.url, || hook.get_urls(record))?);
        }
        Ok(urls)
    }

    pub fn wait_time(&self, seconds: f64, record: &UrlRecord) -> f64 {
        let mut value = seconds;
        for hook in &self.hooks {
            if let Ok(v) = self.guard(hook.as_ref(), &record.url, || hook.wait_time(value, record)) {
                value = v;
            }
        }
        value
    }

    pub fn queued_url(&self, url: &str) {
        for hook in &self.hooks {
            let _ = self.guard(hook.as_ref(), url, || hook.queued_url(url));
        }
    }

    pub fn dequeued_url(&self, record: &UrlRecord) {
        for hook in &self.hooks {
            let _ = self.guard(hook.as_ref(), &record.url, || hook.dequeued_url(record));
        }
    }

    pub fn finish_statistics(&self, fetched: u64, failed: u64, bytes: u64) {
        for hook in &self.hooks {
            let _ = self.guard(hook.as_ref(), "finish", || {
                hook.finish_statistics(fetched, failed, bytes)
            });
        }
    }

    pub fn exit_status(&self, code: i32) -> i32 {
        let mut value = code;
        for hook in &self.hooks {
            if let Ok(v) = self.guard(hook.as_ref(), "exit", || hook.exit_status(value)) {
                value = v;
            }
        }
        value
    }

    fn guard<T>(
        &self,
        hook: &dyn Hook,
        context: &str,
        f: impl FnOnce() -> T,
    ) -> Result<T, HookError> {
        catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
            tracing::error!("Hook {} panicked handling {}", hook.name(), context);
            HookError {
                hook: hook.name(),
                context: context.to_string(),
            }
        })
    }
}

/// Stop > Finish > Retry > Normal
fn strongest(a: Action, b: Action) -> Action {
    use Action::*;
    match (a, b) {
        (Stop, _) | (_, Stop) => Stop,
        (Finish, _) | (_, Finish) => Finish,
        (Retry, _) | (_, Retry) => Retry,
        _ => Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontier::UrlRecord;

    struct Vetoer;
    impl Hook for Vetoer {
        fn name(&self) -> &'static str {
            "vetoer"
        }
        fn accept_url(&self, record: &UrlRecord, verdict: bool) -> bool {
            verdict && !record.url.contains("blocked")
        }
    }

    struct Rescuer;
    impl Hook for Rescuer {
        fn name(&self) -> &'static str {
            "rescuer"
        }
        fn accept_url(&self, _record: &UrlRecord, _verdict: bool) -> bool {
            true
        }
    }

    struct Panicker;
    impl Hook for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }
        fn accept_url(&self, _record: &UrlRecord, _verdict: bool) -> bool {
            panic!("boom")
        }
    }

    struct Retrier;
    impl Hook for Retrier {
        fn name(&self) -> &'static str {
            "retrier"
        }
        fn handle_response(&self, _r: &UrlRecord, _resp: &ResponseInfo) -> Action {
            Action::Retry
        }
    }

    struct Stopper;
    impl Hook for Stopper {
        fn name(&self) -> &'static str {
            "stopper"
        }
        fn handle_response(&self, _r: &UrlRecord, _resp: &ResponseInfo) -> Action {
            Action::Stop
        }
    }

    fn record(url: &str) -> UrlRecord {
        UrlRecord::seed(url, "key")
    }

    fn response() -> ResponseInfo {
        ResponseInfo {
            status: 200,
            content_type: None,
            body_length: 0,
        }
    }

    #[test]
    fn test_empty_registry_passes_through() {
        let registry = HookRegistry::new();
        assert!(registry
            .accept_url(&record("https://example.com/"), true)
            .unwrap());
        assert!(!registry
            .accept_url(&record("https://example.com/"), false)
            .unwrap());
    }

    #[test]
    fn test_hook_can_veto() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(Vetoer));
        assert!(!registry
            .accept_url(&record("https://example.com/blocked"), true)
            .unwrap());
        assert!(registry
            .accept_url(&record("https://example.com/fine"), true)
            .unwrap());
    }

    #[test]
    fn test_hook_can_rescue_a_filtered_url() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(Rescuer));
        assert!(registry
            .accept_url(&record("https://example.com/"), false)
            .unwrap());
    }

    #[test]
    fn test_panicking_hook_is_an_error_not_a_crash() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(Panicker));
        let result = registry.accept_url(&record("https://example.com/"), true);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().hook, "panicker");
    }

    #[test]
    fn test_strongest_action_wins() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(Retrier));
        registry.register(Box::new(Stopper));
        let action = registry
            .handle_response(&record("https://example.com/"), &response())
            .unwrap();
        assert_eq!(action, Action::Stop);
    }

    #[test]
    fn test_wait_time_chain() {
        struct Doubler;
        impl Hook for Doubler {
            fn name(&self) -> &'static str {
                "doubler"
            }
            fn wait_time(&self, seconds: f64, _r: &UrlRecord) -> f64 {
                seconds * 2.0
            }
        }

        let mut registry = HookRegistry::new();
        registry.register(Box::new(Doubler));
        registry.register(Box::new(Doubler));
        assert_eq!(registry.wait_time(1.0, &record("https://example.com/")), 4.0);
    }

    #[test]
    fn test_exit_status_chain() {
        struct Forcer;
        impl Hook for Forcer {
            fn name(&self) -> &'static str {
                "forcer"
            }
            fn exit_status(&self, _code: i32) -> i32 {
                42
            }
        }

        let mut registry = HookRegistry::new();
        registry.register(Box::new(Forcer));
        assert_eq!(registry.exit_status(0), 42);
    }
}
