//! Cache Module
//!
//! Provides the TTL cache engine: a hash index and an expiry min-heap over a
//! shared bucket arena, behind a single reader/writer lock.

mod bucket;
mod clock;
mod heap;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use stats::CacheStats;
pub use store::{Cache, CacheBuilder, ExpireCallback};
