//! [`Config`] defines tunable parameters shared by every push lock.

use std::fmt;
use std::marker::PhantomData;

#[cfg(not(feature = "loom"))]
use std::hint::spin_loop;
#[cfg(not(feature = "loom"))]
use std::thread::yield_now;

#[cfg(feature = "loom")]
use loom::hint::spin_loop;
#[cfg(feature = "loom")]
use loom::thread::yield_now;

/// [`Config`] defines tunable parameters shared by every push lock.
///
/// The spin count and the backoff curve depend on the hardware the lock runs on, so they are
/// supplied through this trait instead of being hard-coded. The preemption hooks let an embedder
/// defer rescheduling while a releasing thread resumes a batch of waiters.
///
/// # Examples
///
/// ```
/// use pushlock::{Config, PushLock};
///
/// #[derive(Debug, Default)]
/// struct Uniprocessor;
///
/// impl Config for Uniprocessor {
///     fn spin_count() -> usize {
///         0
///     }
/// }
///
/// let lock: PushLock<Uniprocessor> = PushLock::new();
/// lock.acquire_exclusive();
/// lock.release_exclusive();
/// ```
pub trait Config: fmt::Debug + Default {
    /// Defines the number of times a waiter polls its wait block before blocking.
    #[inline]
    #[must_use]
    fn spin_count() -> usize {
        1024
    }

    /// Backs off after a failed compare-and-swap on a lock word.
    ///
    /// `retries` is the number of consecutive failures so far, starting at `0`.
    #[inline]
    fn backoff(retries: usize) {
        for _ in 0..(1_usize << retries.min(6)) {
            spin_loop();
        }
        if retries % 64 == 63 {
            yield_now();
        }
    }

    /// Suspends preemption of the current execution unit.
    ///
    /// Called before a waker resumes more than one waiter.
    #[inline]
    fn suspend_preemption() {}

    /// Resumes preemption suspended by [`suspend_preemption`](Self::suspend_preemption).
    #[inline]
    fn resume_preemption() {}
}

/// Default configuration for push locks.
#[derive(Debug, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {}

/// Keeps preemption suspended until dropped.
pub(crate) struct PreemptionGuard<C: Config> {
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> PreemptionGuard<C> {
    #[inline]
    pub(crate) fn new() -> Self {
        C::suspend_preemption();
        Self {
            _config: PhantomData,
        }
    }
}

impl<C: Config> Drop for PreemptionGuard<C> {
    #[inline]
    fn drop(&mut self) {
        C::resume_preemption();
    }
}
