//! ttlcache - An in-memory key/value cache with per-entry TTLs
//!
//! Expired entries are removed lazily on write: reads never check expiry, and
//! no background thread or timer is involved.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheBuilder, CacheStats, Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
