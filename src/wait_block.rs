//! Stack-resident wait blocks chained off a lock word by contended acquirers.

use std::cell::UnsafeCell;
use std::ptr::{NonNull, from_ref, null_mut};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize};
#[cfg(not(feature = "loom"))]
use std::thread::{Thread, current, park};
#[cfg(not(feature = "loom"))]
use std::time::Instant;

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize};
#[cfg(feature = "loom")]
use loom::thread::{Thread, current, park};

#[cfg(not(feature = "loom"))]
use std::hint::spin_loop;

#[cfg(feature = "loom")]
use loom::hint::spin_loop;

use crate::config::Config;

/// Wait block queued by a thread that failed to acquire a lock on the fast path.
///
/// Wait blocks form an intrusive, singly linked list through `next`, newest first. The oldest
/// block is reachable in constant time through the `last` field of the newest block once the
/// chain has been optimized, and the optimizer installs `previous` links on the way so that wakers
/// can walk the chain oldest first.
///
/// A wait block lives in the stack frame of the waiting thread. Once the block is detached and
/// signaled, no other thread may touch it.
#[derive(Debug)]
#[repr(align(16))]
pub(crate) struct WaitBlock {
    /// Points to the block that was pushed right before this one.
    next: AtomicPtr<WaitBlock>,
    /// Points to the oldest block of the chain, if known.
    last: AtomicPtr<WaitBlock>,
    /// Points to the block that was pushed right after this one.
    previous: AtomicPtr<WaitBlock>,
    /// Share count moved off the lock word by the first waiter.
    share_count: AtomicUsize,
    /// [`Self::EXCLUSIVE`] and [`Self::SPINNING`].
    flags: AtomicU8,
    /// Blocks the owning thread once spinning is over.
    gate: Gate,
    /// Detects double wakeups; a std atomic, since the check is not part of the wake protocol.
    #[cfg(debug_assertions)]
    signaled: std::sync::atomic::AtomicBool,
}

/// One-shot wake handle for a single thread.
#[derive(Debug)]
struct Gate {
    /// The thread to unpark; taken by the signaling thread.
    thread: UnsafeCell<Option<Thread>>,
    /// Set once the gate has been signaled.
    open: AtomicBool,
}

/// Aborts the process if dropped.
///
/// Unwinding out of a frame that owns a linked wait block would leave a dangling pointer in the
/// chain, so such frames keep a [`LinkedGuard`] alive until the block has been detached.
pub(crate) struct LinkedGuard;

impl WaitBlock {
    /// The waiter wants exclusive ownership.
    const EXCLUSIVE: u8 = 1;

    /// The waiter has not started blocking yet.
    const SPINNING: u8 = 1 << 1;

    /// Creates an idle wait block.
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicPtr::new(null_mut()),
            last: AtomicPtr::new(null_mut()),
            previous: AtomicPtr::new(null_mut()),
            share_count: AtomicUsize::new(0),
            flags: AtomicU8::new(0),
            gate: Gate {
                thread: UnsafeCell::new(None),
                open: AtomicBool::new(false),
            },
            #[cfg(debug_assertions)]
            signaled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Resets the wait block before it is linked into a chain.
    ///
    /// The wait block must not be reachable by any other thread.
    pub(crate) fn prepare(&self, exclusive: bool) {
        let flags = if exclusive {
            Self::EXCLUSIVE | Self::SPINNING
        } else {
            Self::SPINNING
        };
        self.flags.store(flags, Relaxed);
        self.next.store(null_mut(), Relaxed);
        self.last.store(null_mut(), Relaxed);
        self.previous.store(null_mut(), Relaxed);
        self.share_count.store(0, Relaxed);
        self.gate.close();
        #[cfg(debug_assertions)]
        self.signaled.store(false, Relaxed);
    }

    /// Converts a reference to `Self` to a raw pointer.
    #[inline]
    pub(crate) const fn ref_to_ptr(this: &Self) -> *const Self {
        from_ref(this)
    }

    #[inline]
    pub(crate) fn is_exclusive(&self) -> bool {
        self.flags.load(Acquire) & Self::EXCLUSIVE != 0
    }

    /// Returns `true` if the wait block has not been signaled and its owner is not blocked.
    #[inline]
    pub(crate) fn is_spinning(&self) -> bool {
        self.flags.load(Acquire) & Self::SPINNING != 0
    }

    /// Gets the block that was pushed right before this one.
    #[inline]
    pub(crate) fn next(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.next.load(Acquire))
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<NonNull<Self>>) {
        self.next
            .store(next.map_or(null_mut(), NonNull::as_ptr), Release);
    }

    /// Gets the cached oldest block of the chain.
    #[inline]
    pub(crate) fn last(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.last.load(Acquire))
    }

    #[inline]
    pub(crate) fn set_last(&self, last: Option<NonNull<Self>>) {
        self.last
            .store(last.map_or(null_mut(), NonNull::as_ptr), Release);
    }

    /// Gets the block that was pushed right after this one.
    #[inline]
    pub(crate) fn previous(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.previous.load(Acquire))
    }

    #[inline]
    pub(crate) fn set_previous(&self, previous: Option<NonNull<Self>>) {
        self.previous
            .store(previous.map_or(null_mut(), NonNull::as_ptr), Release);
    }

    #[inline]
    pub(crate) fn share_count(&self) -> usize {
        self.share_count.load(Acquire)
    }

    #[inline]
    pub(crate) fn set_share_count(&self, share_count: usize) {
        self.share_count.store(share_count, Relaxed);
    }

    /// Removes a shared owner, returning the remaining number of owners.
    #[inline]
    pub(crate) fn release_share(&self) -> usize {
        let previous = self.share_count.fetch_sub(1, AcqRel);
        debug_assert_ne!(previous, 0, "share count underflow");
        previous - 1
    }

    /// Spins for up to [`Config::spin_count`] iterations, then blocks until signaled.
    pub(crate) fn wait<C: Config>(&self) {
        for _ in 0..C::spin_count() {
            if !self.is_spinning() {
                return;
            }
            spin_loop();
        }
        // The waiting thread may differ from the one that linked the block.
        self.gate.arm();
        if self.flags.fetch_and(!Self::SPINNING, AcqRel) & Self::SPINNING != 0 {
            self.gate.wait();
        }
    }

    /// Spins, then blocks until signaled or until `deadline` has passed.
    ///
    /// Returns `false` if the deadline passed; the wait block may still be signaled later.
    #[cfg(not(feature = "loom"))]
    pub(crate) fn wait_until<C: Config>(&self, deadline: Instant) -> bool {
        for _ in 0..C::spin_count() {
            if !self.is_spinning() {
                return true;
            }
            spin_loop();
        }
        self.gate.arm();
        if self.flags.fetch_and(!Self::SPINNING, AcqRel) & Self::SPINNING != 0 {
            return self.gate.wait_until(deadline);
        }
        true
    }

    /// Blocks until the gate is signaled after [`Self::wait_until`] timed out.
    ///
    /// Every thread detaching the wait block after the owner stopped spinning signals the gate, so
    /// the wait block is no longer referenced by any other thread once this returns.
    #[cfg(not(feature = "loom"))]
    pub(crate) fn wait_signaled(&self) {
        debug_assert!(!self.is_spinning());
        self.gate.wait();
    }

    /// Resumes the owner of a detached wait block.
    ///
    /// # Safety
    ///
    /// `this` must point to a live wait block that the caller has detached from its chain, and
    /// that has not been signaled since it was last prepared. The wait block must not be accessed
    /// by the caller after this returns.
    pub(crate) unsafe fn wake(this: NonNull<Self>) {
        let this = this.as_ptr().cast_const();
        unsafe {
            #[cfg(debug_assertions)]
            debug_assert!(
                !(*this).signaled.swap(true, Relaxed),
                "wait block signaled twice"
            );
            if (*this).flags.fetch_and(!Self::SPINNING, AcqRel) & Self::SPINNING == 0 {
                // The owner stopped spinning and is blocked, or is about to block, on the gate.
                Gate::signal(&raw const (*this).gate);
            }
        }
    }
}

impl Gate {
    /// Forgets any previous signal.
    ///
    /// The gate must not be reachable by a signaling thread.
    fn close(&self) {
        unsafe {
            *self.thread.get() = None;
        }
        self.open.store(false, Release);
    }

    /// Records the current thread as the one to unpark.
    ///
    /// Must be called before clearing [`WaitBlock::SPINNING`], which publishes the thread handle
    /// to the signaling thread.
    fn arm(&self) {
        unsafe {
            *self.thread.get() = Some(current());
        }
    }

    fn wait(&self) {
        while !self.open.load(Acquire) {
            park();
        }
    }

    #[cfg(not(feature = "loom"))]
    fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if self.open.load(Acquire) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::park_timeout(deadline - now);
        }
    }

    /// Opens the gate and unparks the waiting thread.
    ///
    /// # Safety
    ///
    /// `this` must point to a live gate. The gate may be freed as soon as it is opened, so the
    /// thread handle is taken out first.
    unsafe fn signal(this: *const Self) {
        unsafe {
            let thread = (*(*this).thread.get()).take();
            (*this).open.store(true, Release);
            if let Some(thread) = thread {
                thread.unpark();
            }
        }
    }
}

impl Drop for LinkedGuard {
    fn drop(&mut self) {
        // A linked wait block is about to be freed while other threads can reach it.
        std::process::abort();
    }
}

unsafe impl Send for Gate {}
unsafe impl Sync for Gate {}
