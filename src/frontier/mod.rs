//! Durable crawl frontier
//!
//! The frontier is the set of URLs discovered but not yet completed,
//! together with their bookkeeping state. It is backed by a SQLite
//! database so that a crawl killed mid-flight resumes where it stopped.

mod record;
mod schema;
mod store;

pub use record::{LinkType, UrlRecord, UrlStatus};
pub use schema::initialize_schema;
pub use store::{FrontierStore, RecordUpdate, StoreError, StoreResult, VisitRecord};
