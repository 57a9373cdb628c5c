pub mod hasher;
pub mod hashrate;
pub mod pool;
pub mod seed;
pub mod slice;
mod thread;

pub use pool::{PoolEvent, SearchParams, SearchPool};
pub use seed::{ProgressKey, SeedStore};
pub use thread::REPORT_EVERY;
