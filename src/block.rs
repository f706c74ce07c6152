//! [`BlockList`] lets threads block until another thread broadcasts a wakeup.

use std::cell::Cell;
use std::fmt;
use std::marker::{PhantomData, PhantomPinned};
use std::pin::Pin;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Relaxed};
#[cfg(not(feature = "loom"))]
use std::time::{Duration, Instant};

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use crate::config::{Config, DefaultConfig, PreemptionGuard};
use crate::wait_block::WaitBlock;
use crate::word::{LockWord, State, Step};

/// [`BlockList`] is a list of blocked threads that are all resumed at once.
///
/// A thread registers a pinned [`Waiter`] with [`block`](Self::block), checks whatever condition
/// it is waiting for, and then calls [`wait`](Self::wait). Any thread may resume every registered
/// waiter with [`unblock`](Self::unblock). Since registration happens before the condition is
/// checked, a broadcast following a change of the condition is never missed.
///
/// # Examples
///
/// ```
/// use pushlock::{BlockList, Waiter};
/// use std::pin::pin;
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
/// use std::sync::atomic::Ordering::{Acquire, Release};
/// use std::thread;
///
/// let list: Arc<BlockList> = Arc::new(BlockList::new());
/// let ready = Arc::new(AtomicBool::new(false));
///
/// let (list_clone, ready_clone) = (list.clone(), ready.clone());
/// let thread = thread::spawn(move || {
///     ready_clone.store(true, Release);
///     list_clone.unblock();
/// });
///
/// loop {
///     let waiter = pin!(Waiter::new());
///     assert!(list.block(waiter.as_ref()));
///     if ready.load(Acquire) {
///         break;
///     }
///     list.wait(waiter.as_ref());
/// }
/// thread.join().unwrap();
/// ```
pub struct BlockList<C: Config = DefaultConfig> {
    /// Newest registered wait block, if any.
    state: AtomicUsize,
    _config: PhantomData<fn() -> C>,
}

/// [`Waiter`] registers the current thread with a [`BlockList`].
///
/// A registered [`Waiter`] that is dropped before being resumed resumes every waiter of the list,
/// and then waits until it has been detached from the list.
pub struct Waiter<'l, C: Config = DefaultConfig> {
    wait_block: WaitBlock,
    list: Cell<Option<&'l BlockList<C>>>,
    _pinned: PhantomPinned,
}

impl<C: Config> BlockList<C> {
    /// Creates an empty [`BlockList`].
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::FREE.value()),
            _config: PhantomData,
        }
    }

    /// Creates an empty [`BlockList`].
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::FREE.value()),
            _config: PhantomData,
        }
    }

    /// Returns `true` if no waiter is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.load(Relaxed).waiting()
    }

    /// Registers `waiter` with the list.
    ///
    /// Returns `false` if `waiter` is still registered: a registered waiter stays registered,
    /// even once resumed by [`unblock`](Self::unblock), until it has been passed to
    /// [`wait`](Self::wait) or [`wait_timeout`](Self::wait_timeout).
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::{BlockList, Waiter};
    /// use std::pin::pin;
    ///
    /// let list: BlockList = BlockList::new();
    /// let waiter = pin!(Waiter::new());
    ///
    /// assert!(list.block(waiter.as_ref()));
    /// assert!(!list.block(waiter.as_ref()));
    /// assert_eq!(list.unblock(), 1);
    /// ```
    pub fn block<'l>(&'l self, waiter: Pin<&Waiter<'l, C>>) -> bool {
        let waiter = waiter.get_ref();
        if waiter.list.get().is_some() {
            return false;
        }
        let wait_block = &waiter.wait_block;
        wait_block.prepare(false);
        waiter.list.set(Some(self));

        let state = self.load(Relaxed);
        self.transition::<C, _, _>(state, |state| {
            wait_block.set_next(state.waiting().then(|| state.chain_head()));
            Step::Swap(State::chain(wait_block, 0), ())
        });
        true
    }

    /// Waits until `waiter` is resumed by [`unblock`](Self::unblock).
    ///
    /// Returns immediately if `waiter` is not registered, or if it was resumed before the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::{BlockList, Waiter};
    /// use std::pin::pin;
    ///
    /// let list: BlockList = BlockList::new();
    /// let waiter = pin!(Waiter::new());
    ///
    /// list.block(waiter.as_ref());
    /// list.unblock();
    /// list.wait(waiter.as_ref());
    /// ```
    pub fn wait(&self, waiter: Pin<&Waiter<'_, C>>) {
        let waiter = waiter.get_ref();
        if !waiter.is_registered_with(self) {
            return;
        }
        waiter.wait_block.wait::<C>();
        waiter.list.set(None);
    }

    /// Waits until `waiter` is resumed by [`unblock`](Self::unblock) or `timeout` elapses.
    ///
    /// Returns `false` if the wait timed out. A timed out waiter resumes every waiter of the list
    /// and waits until it is detached before returning, so `waiter` can be registered again.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::{BlockList, Waiter};
    /// use std::pin::pin;
    /// use std::time::Duration;
    ///
    /// let list: BlockList = BlockList::new();
    /// let waiter = pin!(Waiter::new());
    ///
    /// list.block(waiter.as_ref());
    /// assert!(!list.wait_timeout(waiter.as_ref(), Duration::from_millis(1)));
    /// assert!(list.is_empty());
    /// ```
    #[cfg(not(feature = "loom"))]
    pub fn wait_timeout(&self, waiter: Pin<&Waiter<'_, C>>, timeout: Duration) -> bool {
        let waiter = waiter.get_ref();
        if !waiter.is_registered_with(self) {
            return true;
        }
        let resumed = match Instant::now().checked_add(timeout) {
            Some(deadline) => waiter.wait_block.wait_until::<C>(deadline),
            None => {
                waiter.wait_block.wait::<C>();
                true
            }
        };
        if !resumed {
            trace!(?timeout, "BlockList::wait_timeout: timed out");
            self.unblock();
            waiter.wait_block.wait_signaled();
        }
        waiter.list.set(None);
        resumed
    }

    /// Resumes every registered waiter.
    ///
    /// Returns the number of waiters detached from the list.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushlock::BlockList;
    ///
    /// let list: BlockList = BlockList::new();
    /// assert_eq!(list.unblock(), 0);
    /// ```
    pub fn unblock(&self) -> usize {
        let state = self.swap(State::FREE, AcqRel);
        if !state.waiting() {
            return 0;
        }
        let head = state.chain_head();
        let preemption = unsafe { head.as_ref() }
            .next()
            .is_some()
            .then(PreemptionGuard::<C>::new);

        let mut woken = 0;
        let mut current = Some(head);
        while let Some(wait_block) = current {
            current = unsafe { wait_block.as_ref() }.next();
            // SAFETY: the wait block was detached by the swap above.
            unsafe {
                WaitBlock::wake(wait_block);
            }
            woken += 1;
        }
        drop(preemption);
        trace!(woken, "BlockList::unblock");
        woken
    }
}

impl<C: Config> Default for BlockList<C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> fmt::Debug for BlockList<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockList")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl<C: Config> LockWord for BlockList<C> {
    #[inline]
    fn word(&self) -> &AtomicUsize {
        &self.state
    }
}

impl<C: Config> Waiter<'_, C> {
    /// Creates a new [`Waiter`] that is not registered with any list.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            wait_block: WaitBlock::new(),
            list: Cell::new(None),
            _pinned: PhantomPinned,
        }
    }

    /// Returns `true` if the [`Waiter`] is registered with `list` and has not been resumed yet.
    fn is_registered_with(&self, list: &BlockList<C>) -> bool {
        match self.list.get() {
            Some(registered) => {
                debug_assert!(
                    std::ptr::eq(registered, list),
                    "waiting on a list the waiter is not registered with"
                );
                true
            }
            None => false,
        }
    }
}

impl<C: Config> Default for Waiter<'_, C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> fmt::Debug for Waiter<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("registered", &self.list.get().is_some())
            .finish()
    }
}

impl<C: Config> Drop for Waiter<'_, C> {
    #[inline]
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            // The wait block may still be linked; detach it before its memory goes away.
            list.unblock();
            self.wait_block.wait::<C>();
        }
    }
}
