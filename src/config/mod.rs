//! Crawl options
//!
//! Plain-data option groups populated by the command line (or by test
//! code). The library never parses flags itself; the binary translates
//! clap output into these structs.

mod types;

pub use types::{
    Options, OutputOptions, PolicyOptions, ProtocolOptions, RestrictMode, RetryOptions,
    SecureProtocol, SpanHostsAllow, TimingOptions, TlsOptions, WarcOptions,
};
