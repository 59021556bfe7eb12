//! Cookie storage
//!
//! An RFC 6265 style jar with the usual browser caps, plus load/save in
//! the Mozilla cookies.txt format so jars can be carried between runs
//! and tools.

mod format;
mod jar;

pub use format::{load_cookies_txt, save_cookies_txt};
pub use jar::{Cookie, CookieJar};
