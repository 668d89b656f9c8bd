pub mod date_range;
pub mod manager;
pub mod store;

pub use date_range::{merge, overlaps_within, subtract, DateRange, Overlap};
pub use manager::CrawlLockManager;
pub use store::{InMemoryRangeLockStore, RangeLockStore, RedisRangeLockStore, LOCK_NAMESPACE};
