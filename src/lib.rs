#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

#[cfg(any(test, feature = "tracing"))]
macro_rules! trace {
    ($($t:tt)*) => { tracing::trace!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! trace {
    ($($t:tt)*) => {};
}

pub mod block;
pub use block::{BlockList, Waiter};

pub mod cache_aware;
pub use cache_aware::{CacheAwarePushLock, Error, MAX_SHARDS, Placement};

pub mod config;
pub use config::{Config, DefaultConfig};

#[cfg(all(feature = "lock_api", not(feature = "loom")))]
mod lock_api;
#[cfg(all(feature = "lock_api", not(feature = "loom")))]
pub use lock_api::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod push_lock;
pub use push_lock::PushLock;

mod chain;
mod wait_block;
mod word;

#[cfg(test)]
mod tests;
