//! Encoding of the push lock word and the compare-and-swap loop shared by all lock words.

use std::fmt;
use std::ptr::{NonNull, with_exposed_provenance};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{self, Acquire};

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use crate::config::Config;
use crate::wait_block::WaitBlock;

/// Snapshot of a push lock word.
///
/// ```text
/// +--------------+---+---+---+---+
/// |  share count | M | K | W | L |   W == 0
/// +--------------+---+---+---+---+
/// | chain head   | M | K | W | L |   W == 1
/// +--------------+---+---+---+---+
/// ```
///
/// `L` is set while the lock is held in either mode, `W` while wait blocks are chained off the
/// word, `K` while a thread owns the right to walk and wake the chain, and `M` while more than one
/// shared owner holds the lock and the share count lives in the oldest wait block.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct State(usize);

/// Owners or waiters recorded in the value bits of a [`State`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Holders {
    /// No waiters: the value bits count shared owners.
    Owners {
        /// Number of shared owners.
        share_count: usize,
    },
    /// Waiters are queued: the value bits point to the newest wait block.
    Chain {
        /// The newest wait block.
        head: NonNull<WaitBlock>,
    },
}

/// Outcome of a single step of [`LockWord::transition`].
pub(crate) enum Step<T> {
    /// Installs the state, and returns the value once the state is installed.
    Swap(State, T),
    /// Returns the value without modifying the lock word.
    Stop(T),
}

/// Operations shared by atomic words encoding a [`State`].
pub(crate) trait LockWord {
    /// Returns a reference to the underlying word.
    fn word(&self) -> &AtomicUsize;

    /// Loads the current state.
    #[inline]
    fn load(&self, mo: Ordering) -> State {
        State(self.word().load(mo))
    }

    /// Replaces the current state.
    #[inline]
    fn swap(&self, state: State, mo: Ordering) -> State {
        State(self.word().swap(state.0, mo))
    }

    /// Repeatedly feeds the latest state into `f` until `f` stops or its state is installed.
    ///
    /// Every failed compare-and-swap backs off according to `C` before retrying with the state
    /// that was observed.
    #[inline]
    fn transition<C: Config, T, F: FnMut(State) -> Step<T>>(&self, mut state: State, mut f: F) -> T {
        let mut retries = 0;
        loop {
            match f(state) {
                Step::Stop(result) => return result,
                Step::Swap(next, result) => {
                    next.debug_check();
                    match self
                        .word()
                        .compare_exchange(state.0, next.0, Ordering::AcqRel, Acquire)
                    {
                        Ok(_) => return result,
                        Err(actual) => {
                            C::backoff(retries);
                            retries += 1;
                            state = State(actual);
                        }
                    }
                }
            }
        }
    }
}

impl State {
    /// The lock is held in either mode.
    pub(crate) const LOCKED: usize = 1;

    /// Wait blocks are chained off the word.
    pub(crate) const WAITING: usize = 1 << 1;

    /// A thread is optimizing or waking the wait chain.
    pub(crate) const WAKING: usize = 1 << 2;

    /// Multiple shared owners hold the lock while wait blocks are queued.
    pub(crate) const MULTIPLE_SHARED: usize = 1 << 3;

    /// Share count increment.
    pub(crate) const SHARE_INC: usize = 1 << 4;

    /// Mask of the flag bits.
    pub(crate) const FLAG_MASK: usize = Self::SHARE_INC - 1;

    /// Mask of the share count or wait block address.
    pub(crate) const VALUE_MASK: usize = !Self::FLAG_MASK;

    /// The unlocked state without waiters.
    pub(crate) const FREE: Self = Self(0);

    /// The state of a lock held by a single shared owner without waiters.
    pub(crate) const SINGLE_SHARED: Self = Self(Self::SHARE_INC | Self::LOCKED);

    /// The state of a lock held exclusively without waiters.
    pub(crate) const EXCLUSIVE: Self = Self(Self::LOCKED);

    /// Builds a state chaining `head` with the supplied flag bits.
    #[inline]
    pub(crate) fn chain(head: &WaitBlock, flags: usize) -> Self {
        let addr = WaitBlock::ref_to_ptr(head).expose_provenance();
        debug_assert_eq!(addr & Self::FLAG_MASK, 0);
        debug_assert_eq!(flags & Self::VALUE_MASK, 0);
        Self(addr | flags | Self::WAITING)
    }

    /// Returns the raw value.
    #[inline]
    pub(crate) const fn value(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) const fn locked(self) -> bool {
        self.0 & Self::LOCKED != 0
    }

    #[inline]
    pub(crate) const fn waiting(self) -> bool {
        self.0 & Self::WAITING != 0
    }

    #[inline]
    pub(crate) const fn waking(self) -> bool {
        self.0 & Self::WAKING != 0
    }

    #[inline]
    pub(crate) const fn multiple_shared(self) -> bool {
        self.0 & Self::MULTIPLE_SHARED != 0
    }

    /// Returns the flag bits.
    #[inline]
    pub(crate) const fn flags(self) -> usize {
        self.0 & Self::FLAG_MASK
    }

    /// Returns the share count of an untagged state.
    #[inline]
    pub(crate) fn share_count(self) -> usize {
        debug_assert!(!self.waiting());
        (self.0 & Self::VALUE_MASK) / Self::SHARE_INC
    }

    /// Returns the newest wait block of a tagged state.
    #[inline]
    pub(crate) fn chain_head(self) -> NonNull<WaitBlock> {
        debug_assert!(self.waiting());
        let head = with_exposed_provenance::<WaitBlock>(self.0 & Self::VALUE_MASK).cast_mut();
        debug_assert!(!head.is_null());
        // SAFETY: the value bits of a tagged state always hold a wait block address.
        unsafe { NonNull::new_unchecked(head) }
    }

    /// Interprets the value bits.
    #[inline]
    pub(crate) fn holders(self) -> Holders {
        if self.waiting() {
            Holders::Chain {
                head: self.chain_head(),
            }
        } else {
            Holders::Owners {
                share_count: self.share_count(),
            }
        }
    }

    #[inline]
    #[must_use]
    pub(crate) const fn with(self, flags: usize) -> Self {
        Self(self.0 | flags)
    }

    #[inline]
    #[must_use]
    pub(crate) const fn without(self, flags: usize) -> Self {
        Self(self.0 & !flags)
    }

    /// Adds a shared owner to an untagged state.
    #[inline]
    #[must_use]
    pub(crate) fn add_shared(self) -> Option<Self> {
        debug_assert!(!self.waiting());
        self.0
            .checked_add(Self::SHARE_INC)
            .map(|value| Self(value | Self::LOCKED))
    }

    /// Removes a shared owner from an untagged state.
    #[inline]
    #[must_use]
    pub(crate) fn remove_shared(self) -> Self {
        debug_assert!(!self.waiting());
        if self.share_count() > 1 {
            Self(self.0 - Self::SHARE_INC)
        } else {
            Self::FREE
        }
    }

    /// Asserts the invariants that can be checked from the word alone.
    #[inline]
    pub(crate) fn debug_check(self) {
        if !self.locked() && !self.waiting() {
            debug_assert_eq!(self.share_count(), 0, "unlocked word carries a share count");
        }
        if self.multiple_shared() {
            debug_assert!(self.waiting(), "multiple shared owners without a chain");
            debug_assert!(self.locked(), "multiple shared owners of an unlocked word");
        }
        if self.waking() {
            debug_assert!(self.waiting(), "waking without a chain");
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("State");
        d.field("locked", &self.locked())
            .field("waiting", &self.waiting())
            .field("waking", &self.waking())
            .field("multiple_shared", &self.multiple_shared());
        match self.holders() {
            Holders::Owners { share_count } => d.field("share_count", &share_count),
            Holders::Chain { head } => d.field("chain_head", &head),
        };
        d.finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn untagged_share_counting() {
        let one = State::FREE.add_shared().unwrap();
        assert_eq!(one, State::SINGLE_SHARED);
        let two = one.add_shared().unwrap();
        assert!(two.locked());
        assert_eq!(two.holders(), Holders::Owners { share_count: 2 });
        assert_eq!(two.remove_shared(), State::SINGLE_SHARED);
        assert_eq!(State::SINGLE_SHARED.remove_shared(), State::FREE);
    }

    #[test]
    fn tagged_state_keeps_flags_apart_from_address() {
        let wait_block = WaitBlock::new();
        let state = State::chain(&wait_block, State::LOCKED | State::MULTIPLE_SHARED);
        assert!(state.locked() && state.waiting() && state.multiple_shared());
        assert!(!state.waking());
        assert_eq!(
            state.chain_head().as_ptr().cast_const(),
            WaitBlock::ref_to_ptr(&wait_block)
        );
        let woken = state.with(State::WAKING).without(State::LOCKED | State::MULTIPLE_SHARED);
        assert_eq!(woken.flags(), State::WAITING | State::WAKING);
        assert_eq!(woken.chain_head(), state.chain_head());
    }
}
