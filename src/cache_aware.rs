//! [`CacheAwarePushLock`] spreads shared owners over several cache-line padded push locks.

use std::fmt;
use std::iter;
use std::num::NonZeroUsize;
use std::thread::available_parallelism;

use crate::config::{Config, DefaultConfig};
use crate::push_lock::PushLock;

/// Maximum number of shards: one page worth of 128-byte cache lines.
pub const MAX_SHARDS: usize = 32;

/// Memory layout of the shards of a [`CacheAwarePushLock`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Placement {
    /// All shards share a single allocation.
    #[default]
    Contiguous,
    /// Every shard is allocated on its own, so that each can be placed near the processor using
    /// it.
    Scattered,
}

/// Errors returned when a [`CacheAwarePushLock`] cannot be created.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The requested number of shards is zero or larger than [`MAX_SHARDS`].
    #[error("invalid shard count {0}, expected a value between 1 and {MAX_SHARDS}")]
    InvalidShardCount(usize),
    /// The shards could not be allocated.
    #[error("failed to allocate {shards} push lock shards")]
    OutOfMemory {
        /// The number of shards requested.
        shards: usize,
    },
}

/// [`CacheAwarePushLock`] is a reader-writer lock made of one [`PushLock`] per processor.
///
/// A shared owner acquires a single shard, normally the one belonging to the processor it runs
/// on, so that concurrent readers do not contend on a single cache line. An exclusive owner
/// acquires every shard.
///
/// # Examples
///
/// ```
/// use pushlock::{CacheAwarePushLock, Placement};
///
/// let lock: CacheAwarePushLock = CacheAwarePushLock::with_shards(4, Placement::Contiguous).unwrap();
///
/// lock.acquire_shared(1);
/// lock.acquire_shared(3);
/// lock.release_shared(3);
/// lock.release_shared(1);
///
/// lock.acquire_exclusive();
/// assert!(!lock.try_acquire_shared(2));
/// lock.release_exclusive();
/// ```
pub struct CacheAwarePushLock<C: Config = DefaultConfig> {
    shards: Shards<C>,
}

/// Pads and aligns a value to the size of a cache line.
#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Default)]
struct CachePadded<T>(T);

enum Shards<C: Config> {
    Contiguous(Box<[CachePadded<PushLock<C>>]>),
    /// One single-shard allocation per shard.
    Scattered(Box<[Box<[CachePadded<PushLock<C>>]>]>),
}

/// Allocates `len` padded push locks in a single allocation.
fn allocate_shards<C: Config>(len: usize) -> Option<Box<[CachePadded<PushLock<C>>]>> {
    let mut shards = Vec::new();
    shards.try_reserve_exact(len).ok()?;
    shards.extend(iter::repeat_with(CachePadded::default).take(len));
    Some(shards.into_boxed_slice())
}

impl<C: Config> CacheAwarePushLock<C> {
    /// Creates a [`CacheAwarePushLock`] with one shard per available processor, up to
    /// [`MAX_SHARDS`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the shards could not be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::{CacheAwarePushLock, MAX_SHARDS};
    ///
    /// let lock: CacheAwarePushLock = CacheAwarePushLock::new().unwrap();
    /// assert!(lock.shards() >= 1 && lock.shards() <= MAX_SHARDS);
    /// ```
    pub fn new() -> Result<Self, Error> {
        let shards = available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .min(MAX_SHARDS);
        Self::with_shards(shards, Placement::Contiguous)
    }

    /// Creates a [`CacheAwarePushLock`] with `shards` shards laid out according to `placement`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShardCount`] if `shards` is zero or larger than [`MAX_SHARDS`], and
    /// [`Error::OutOfMemory`] if the shards could not be allocated; shards allocated before the
    /// failure are freed.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::{CacheAwarePushLock, Error, Placement};
    ///
    /// let lock: CacheAwarePushLock = CacheAwarePushLock::with_shards(2, Placement::Scattered).unwrap();
    /// assert_eq!(lock.placement(), Placement::Scattered);
    ///
    /// let result = CacheAwarePushLock::<pushlock::DefaultConfig>::with_shards(0, Placement::Contiguous);
    /// assert_eq!(result.err(), Some(Error::InvalidShardCount(0)));
    /// ```
    pub fn with_shards(shards: usize, placement: Placement) -> Result<Self, Error> {
        if shards == 0 || shards > MAX_SHARDS {
            return Err(Error::InvalidShardCount(shards));
        }
        let out_of_memory = Error::OutOfMemory { shards };
        let shards_allocated = match placement {
            Placement::Contiguous => {
                Shards::Contiguous(allocate_shards(shards).ok_or(out_of_memory)?)
            }
            Placement::Scattered => {
                let mut scattered = Vec::new();
                scattered
                    .try_reserve_exact(shards)
                    .map_err(|_| out_of_memory.clone())?;
                for _ in 0..shards {
                    scattered.push(allocate_shards(1).ok_or_else(|| out_of_memory.clone())?);
                }
                Shards::Scattered(scattered.into_boxed_slice())
            }
        };
        trace!(shards, ?placement, "CacheAwarePushLock: allocated");
        Ok(Self {
            shards: shards_allocated,
        })
    }

    /// Returns the number of shards.
    #[inline]
    pub fn shards(&self) -> usize {
        match &self.shards {
            Shards::Contiguous(shards) => shards.len(),
            Shards::Scattered(shards) => shards.len(),
        }
    }

    /// Returns the memory layout of the shards.
    #[inline]
    pub fn placement(&self) -> Placement {
        match &self.shards {
            Shards::Contiguous(_) => Placement::Contiguous,
            Shards::Scattered(_) => Placement::Scattered,
        }
    }

    /// Acquires every shard exclusively.
    ///
    /// The first shard is always acquired first; the remaining shards are tried from the low end
    /// while the high end is waited for, so that concurrent exclusive acquirers cannot deadlock.
    pub fn acquire_exclusive(&self) {
        self.shard(0).acquire_exclusive();
        let (mut start, mut end) = (1, self.shards());
        while start < end {
            if self.shard(start).try_acquire_exclusive() {
                start += 1;
            } else {
                end -= 1;
                self.shard(end).acquire_exclusive();
            }
        }
    }

    /// Releases every shard, in ascending order.
    pub fn release_exclusive(&self) {
        for index in 0..self.shards() {
            self.shard(index).release_exclusive();
        }
    }

    /// Acquires the shard at `index` shared.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`shards`](Self::shards).
    #[inline]
    pub fn acquire_shared(&self, index: usize) {
        self.shard(index).acquire_shared();
    }

    /// Tries to acquire the shard at `index` shared without blocking.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`shards`](Self::shards).
    #[inline]
    pub fn try_acquire_shared(&self, index: usize) -> bool {
        self.shard(index).try_acquire_shared()
    }

    /// Releases the shard at `index` acquired shared.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`shards`](Self::shards).
    #[inline]
    pub fn release_shared(&self, index: usize) {
        self.shard(index).release_shared();
    }

    #[inline]
    fn shard(&self, index: usize) -> &PushLock<C> {
        match &self.shards {
            Shards::Contiguous(shards) => &shards[index].0,
            Shards::Scattered(shards) => &shards[index][0].0,
        }
    }
}

impl<C: Config> fmt::Debug for CacheAwarePushLock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAwarePushLock")
            .field("placement", &self.placement())
            .field(
                "shards",
                &(0..self.shards())
                    .map(|index| self.shard(index))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
