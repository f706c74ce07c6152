//! [`PushLock`] is a pointer-sized reader-writer lock that queues contended acquirers in their own
//! stack frames.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicUsize, fence};
use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release, SeqCst};

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicUsize, fence};

use crate::chain::find_tail;
use crate::config::{Config, DefaultConfig};
use crate::wait_block::{LinkedGuard, WaitBlock};
use crate::word::{LockWord, State, Step};

/// [`PushLock`] is a pointer-sized reader-writer lock.
///
/// The uncontended paths are a single atomic instruction each. Contended acquirers push a wait
/// block living in their own stack frame onto a chain hanging off the lock word, spin for a while,
/// and then block. Releasing the lock with waiters queued resumes either the oldest exclusive
/// waiter or the whole run of waiters ending in the oldest shared waiter; resumed waiters compete
/// for the lock again instead of receiving ownership.
///
/// [`PushLock`] only provides raw acquire and release methods; the caller is responsible for
/// pairing them. Enable the `lock_api` feature for guard-based wrappers.
///
/// # Examples
///
/// ```
/// use pushlock::PushLock;
/// use std::sync::Arc;
/// use std::thread;
///
/// let lock: Arc<PushLock> = Arc::new(PushLock::new());
/// let lock_clone = lock.clone();
///
/// lock.acquire_exclusive();
/// let thread = thread::spawn(move || {
///     lock_clone.acquire_shared();
///     lock_clone.release_shared();
/// });
/// lock.release_exclusive();
/// thread.join().unwrap();
///
/// assert!(lock.is_free(std::sync::atomic::Ordering::Relaxed));
/// ```
pub struct PushLock<C: Config = DefaultConfig> {
    /// [`PushLock`] state.
    state: AtomicUsize,
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> PushLock<C> {
    /// Creates a new unlocked [`PushLock`].
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// static LOCK: PushLock = PushLock::new();
    /// assert!(LOCK.try_acquire_exclusive());
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::FREE.value()),
            _config: PhantomData,
        }
    }

    /// Creates a new unlocked [`PushLock`].
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::FREE.value()),
            _config: PhantomData,
        }
    }

    /// Returns `true` if the lock is neither held nor waited on.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: PushLock = PushLock::new();
    /// assert!(lock.is_free(Relaxed));
    ///
    /// lock.acquire_shared();
    /// assert!(!lock.is_free(Relaxed));
    /// ```
    #[inline]
    pub fn is_free(&self, mo: Ordering) -> bool {
        self.load(mo) == State::FREE
    }

    /// Returns `true` if the lock is held in either mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: PushLock = PushLock::new();
    /// assert!(!lock.is_locked(Relaxed));
    ///
    /// lock.acquire_exclusive();
    /// assert!(lock.is_locked(Relaxed));
    /// ```
    #[inline]
    pub fn is_locked(&self, mo: Ordering) -> bool {
        self.load(mo).locked()
    }

    /// Returns `true` if wait blocks are queued on the lock.
    #[inline]
    pub fn has_waiters(&self, mo: Ordering) -> bool {
        self.load(mo).waiting()
    }

    /// Returns the number of shared owners.
    ///
    /// Returns `None` if waiters are queued, in which case the count is no longer kept in the lock
    /// word. An exclusively held lock has no shared owners.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_shared();
    /// lock.acquire_shared();
    /// assert_eq!(lock.shared_owners(Relaxed), Some(2));
    /// ```
    #[inline]
    pub fn shared_owners(&self, mo: Ordering) -> Option<usize> {
        let state = self.load(mo);
        if state.waiting() {
            None
        } else {
            Some(state.share_count())
        }
    }

    /// Acquires the lock exclusively, blocking the current thread until it is available.
    ///
    /// An exclusive acquirer takes an unlocked lock even if other threads are queued.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_exclusive();
    /// assert!(!lock.try_acquire_shared());
    /// lock.release_exclusive();
    /// ```
    #[inline]
    pub fn acquire_exclusive(&self) {
        if !self.try_acquire_exclusive() {
            self.acquire_contended(true);
        }
    }

    /// Tries to acquire the lock exclusively without blocking.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// assert!(lock.try_acquire_exclusive());
    /// assert!(!lock.try_acquire_exclusive());
    /// ```
    #[inline]
    pub fn try_acquire_exclusive(&self) -> bool {
        self.state.fetch_or(State::LOCKED, Acquire) & State::LOCKED == 0
    }

    /// Acquires the lock shared, blocking the current thread until it is available.
    ///
    /// A shared acquirer queues behind any waiter already queued, so that a stream of readers
    /// cannot starve a writer.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_shared();
    /// lock.acquire_shared();
    /// assert!(!lock.try_acquire_exclusive());
    /// lock.release_shared();
    /// lock.release_shared();
    /// ```
    #[inline]
    pub fn acquire_shared(&self) {
        if self
            .state
            .compare_exchange(
                State::FREE.value(),
                State::SINGLE_SHARED.value(),
                Acquire,
                Relaxed,
            )
            .is_err()
        {
            self.acquire_contended(false);
        }
    }

    /// Tries to acquire the lock shared without blocking.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// assert!(lock.try_acquire_shared());
    /// assert!(lock.try_acquire_shared());
    /// assert!(!lock.try_acquire_exclusive());
    /// ```
    #[inline]
    pub fn try_acquire_shared(&self) -> bool {
        let state = self.load(Relaxed);
        self.transition::<C, _, _>(state, |state| match Self::enter_shared(state) {
            Some(next) => Step::Swap(next, true),
            None => Step::Stop(false),
        })
    }

    /// Releases an exclusively held lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_exclusive();
    /// lock.release_exclusive();
    /// assert!(lock.try_acquire_shared());
    /// ```
    #[inline]
    pub fn release_exclusive(&self) {
        if self
            .state
            .compare_exchange(
                State::EXCLUSIVE.value(),
                State::FREE.value(),
                Release,
                Relaxed,
            )
            .is_err()
        {
            self.release_contended();
        }
    }

    /// Releases a lock held shared.
    ///
    /// The last shared owner to leave resumes waiters, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_shared();
    /// lock.release_shared();
    /// assert!(lock.try_acquire_exclusive());
    /// ```
    #[inline]
    pub fn release_shared(&self) {
        if self
            .state
            .compare_exchange(
                State::SINGLE_SHARED.value(),
                State::FREE.value(),
                Release,
                Relaxed,
            )
            .is_err()
        {
            self.release_shared_contended();
        }
    }

    /// Releases the lock regardless of the mode it is held in.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_exclusive();
    /// lock.release();
    ///
    /// lock.acquire_shared();
    /// lock.release();
    /// assert!(lock.is_free(Relaxed));
    /// ```
    pub fn release(&self) {
        // Synchronizes with the CAS that published the chain walked below.
        let state = self.load(Acquire);
        debug_assert!(state.locked(), "releasing a push lock that is not held");
        let Some(state) = self.leave_untagged(state) else {
            return;
        };
        if state.multiple_shared() {
            // SAFETY: the chain cannot be detached while the lock is held.
            let tail = unsafe { find_tail(state.chain_head()).as_ref() };
            if tail.share_count() > 0 && tail.release_share() > 0 {
                return;
            }
        }
        self.unlock_queued(state);
    }

    /// Converts an exclusively held lock into a lock held by the caller shared.
    ///
    /// Returns `false` without converting if waiters are queued; the caller then still owns the
    /// lock exclusively.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_exclusive();
    /// assert!(lock.convert_exclusive_to_shared());
    /// assert!(lock.try_acquire_shared());
    /// assert!(!lock.try_acquire_exclusive());
    /// ```
    pub fn convert_exclusive_to_shared(&self) -> bool {
        let state = self.load(Relaxed);
        self.transition::<C, _, _>(state, |state| {
            debug_assert!(state.locked(), "converting a push lock that is not held");
            if state.waiting() {
                Step::Stop(false)
            } else {
                debug_assert_eq!(state, State::EXCLUSIVE);
                Step::Swap(State::SINGLE_SHARED, true)
            }
        })
    }

    /// Tries to convert a lock held shared into an exclusively held lock.
    ///
    /// Succeeds only if the caller is the sole shared owner and no waiters are queued.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_shared();
    /// assert!(lock.try_convert_shared_to_exclusive());
    /// assert!(!lock.try_acquire_shared());
    /// lock.release_exclusive();
    /// ```
    #[inline]
    pub fn try_convert_shared_to_exclusive(&self) -> bool {
        self.state
            .compare_exchange(
                State::SINGLE_SHARED.value(),
                State::EXCLUSIVE.value(),
                Acquire,
                Relaxed,
            )
            .is_ok()
    }

    /// Waits until every current holder of the lock has released it.
    ///
    /// The lock is acquired exclusively and released right away if it is held; otherwise the lock
    /// word is not modified.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.acquire_release_exclusive();
    /// assert!(lock.is_free(Relaxed));
    /// ```
    #[inline]
    pub fn acquire_release_exclusive(&self) {
        // Stores made before the call must be visible to the holders being waited out.
        fence(SeqCst);
        if self.load(Relaxed).locked() {
            self.acquire_exclusive();
            self.release_exclusive();
        }
    }

    /// Resumes queued waiters if the lock is free and nobody else is about to.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::PushLock;
    ///
    /// let lock: PushLock = PushLock::new();
    ///
    /// lock.try_wake();
    /// assert!(lock.try_acquire_exclusive());
    /// ```
    pub fn try_wake(&self) {
        let state = self.load(Relaxed);
        if state.waking() || state.locked() || !state.waiting() {
            return;
        }
        let next = state.with(State::WAKING);
        if self
            .state
            .compare_exchange(state.value(), next.value(), Acquire, Relaxed)
            .is_ok()
        {
            self.wake(next);
        }
    }

    /// Returns the state that admits one more shared owner, if the lock can be shared right now.
    #[inline]
    fn enter_shared(state: State) -> Option<State> {
        if !state.locked() {
            if state.waiting() {
                // The shared owner does not fit in a tagged word; it releases as if exclusive.
                Some(state.with(State::LOCKED))
            } else {
                state.add_shared()
            }
        } else if !state.waiting() && state.share_count() > 0 {
            state.add_shared()
        } else {
            None
        }
    }

    /// Builds the state that chains `wait_block` in front of the waiters of `state`.
    ///
    /// Returns the new state and whether the caller has to optimize the chain.
    fn link(wait_block: &WaitBlock, state: State) -> (State, bool) {
        debug_assert!(state.locked());
        if state.waiting() {
            wait_block.set_next(Some(state.chain_head()));
            wait_block.set_last(None);
            wait_block.set_share_count(0);
            (
                State::chain(wait_block, state.flags() | State::WAKING),
                !state.waking(),
            )
        } else {
            wait_block.set_next(None);
            wait_block.set_last(Some(NonNull::from(wait_block)));
            let share_count = state.share_count();
            if share_count > 1 {
                wait_block.set_share_count(share_count);
                (
                    State::chain(wait_block, State::LOCKED | State::MULTIPLE_SHARED),
                    false,
                )
            } else {
                wait_block.set_share_count(0);
                (State::chain(wait_block, State::LOCKED), false)
            }
        }
    }

    /// Acquires the lock after the fast path failed.
    #[cold]
    fn acquire_contended(&self, exclusive: bool) {
        let wait_block = WaitBlock::new();
        let mut state = self.load(Relaxed);
        loop {
            wait_block.prepare(exclusive);
            let queued = self.transition::<C, _, _>(state, |state| {
                let entered = if exclusive {
                    (!state.locked()).then(|| state.with(State::LOCKED))
                } else {
                    Self::enter_shared(state)
                };
                if let Some(next) = entered {
                    return Step::Swap(next, None);
                }
                let (next, optimize) = Self::link(&wait_block, state);
                Step::Swap(next, Some((next, optimize)))
            });
            let Some((top, optimize)) = queued else {
                return;
            };
            trace!(state = ?top, exclusive, optimize, "PushLock::acquire: queued");

            let linked = LinkedGuard;
            if optimize {
                self.optimize_chain(top);
            }
            wait_block.wait::<C>();
            mem::forget(linked);

            state = self.load(Relaxed);
        }
    }

    /// Removes one owner from an untagged lock word.
    ///
    /// Returns the current state if waiters are queued.
    #[inline]
    fn leave_untagged(&self, state: State) -> Option<State> {
        self.transition::<C, _, _>(state, |state| {
            if state.waiting() {
                Step::Stop(Some(state))
            } else {
                Step::Swap(state.remove_shared(), None)
            }
        })
    }

    /// Releases the lock, taking over the right to wake waiters unless another thread holds it.
    fn unlock_queued(&self, state: State) {
        let wake = self.transition::<C, _, _>(state, |state| {
            debug_assert!(state.waiting());
            let next = state.without(State::LOCKED | State::MULTIPLE_SHARED);
            if state.waking() {
                Step::Swap(next, None)
            } else {
                let next = next.with(State::WAKING);
                Step::Swap(next, Some(next))
            }
        });
        if let Some(state) = wake {
            self.wake(state);
        }
    }

    #[cold]
    fn release_contended(&self) {
        let state = self.load(Acquire);
        debug_assert!(state.locked(), "releasing a push lock that is not held");
        if let Some(state) = self.leave_untagged(state) {
            self.unlock_queued(state);
        }
    }

    #[cold]
    fn release_shared_contended(&self) {
        // Synchronizes with the CAS that published the chain walked below.
        let state = self.load(Acquire);
        debug_assert!(state.locked(), "releasing a push lock that is not held");
        let Some(state) = self.leave_untagged(state) else {
            return;
        };
        if state.multiple_shared() {
            // SAFETY: the chain cannot be detached while the lock is held.
            let tail = unsafe { find_tail(state.chain_head()).as_ref() };
            debug_assert!(tail.is_exclusive());
            if tail.release_share() > 0 {
                return;
            }
        }
        self.unlock_queued(state);
    }

    /// Counts the queued wait blocks; only meaningful while the chain is not being woken.
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        let state = self.load(Acquire);
        if !state.waiting() {
            return 0;
        }
        let mut count = 0;
        let mut current = Some(state.chain_head());
        while let Some(wait_block) = current {
            count += 1;
            current = unsafe { wait_block.as_ref() }.next();
        }
        count
    }
}

impl<C: Config> Default for PushLock<C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> fmt::Debug for PushLock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushLock")
            .field("state", &self.load(Relaxed))
            .finish()
    }
}

impl<C: Config> LockWord for PushLock<C> {
    #[inline]
    fn word(&self) -> &AtomicUsize {
        &self.state
    }
}
