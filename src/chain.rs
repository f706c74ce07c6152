//! Walking, optimizing, and waking the wait chain of a [`PushLock`].
//!
//! Wait blocks are pushed newest first, but waiters are resumed oldest first. Only the thread
//! that owns the right to wake, either by having set [`State::WAKING`] or by having chained the
//! first wait block, may install `previous` links or cache the oldest block in the head.

use std::ptr::NonNull;
use std::sync::atomic::Ordering::{AcqRel, Acquire};

use crate::config::{Config, PreemptionGuard};
use crate::push_lock::PushLock;
use crate::wait_block::WaitBlock;
use crate::word::{LockWord, State, Step};

/// Finds the oldest wait block without modifying the chain.
///
/// # Safety
///
/// `head` must be the head of a chain that cannot be detached during the call.
pub(crate) unsafe fn find_tail(head: NonNull<WaitBlock>) -> NonNull<WaitBlock> {
    let mut current = head;
    loop {
        let wait_block = unsafe { current.as_ref() };
        if let Some(last) = wait_block.last() {
            return last;
        }
        let Some(next) = wait_block.next() else {
            debug_assert!(false, "wait chain without a tail");
            return current;
        };
        current = next;
    }
}

/// Finds the oldest wait block, linking every block it passes to its successor.
///
/// # Safety
///
/// `head` must be the head of a chain, and the caller must own the right to modify it.
unsafe fn link_to_tail(head: NonNull<WaitBlock>) -> NonNull<WaitBlock> {
    let mut current = head;
    loop {
        let wait_block = unsafe { current.as_ref() };
        if let Some(last) = wait_block.last() {
            return last;
        }
        let Some(next) = wait_block.next() else {
            debug_assert!(false, "wait chain without a tail");
            return current;
        };
        unsafe { next.as_ref() }.set_previous(Some(current));
        current = next;
    }
}

impl<C: Config> PushLock<C> {
    /// Caches the oldest wait block in the head of the chain, and gives up the right to wake.
    ///
    /// Wakes the chain instead if the lock was released in the meantime, since the releasing
    /// thread left waking to the current owner of [`State::WAKING`].
    pub(crate) fn optimize_chain(&self, state: State) {
        let released = self.transition::<C, _, _>(state, |state| {
            debug_assert!(state.waking());
            if !state.locked() {
                return Step::Stop(Some(state));
            }
            let head = state.chain_head();
            // SAFETY: the current thread owns `State::WAKING`.
            unsafe {
                let tail = link_to_tail(head);
                head.as_ref().set_last(Some(tail));
            }
            Step::Swap(state.without(State::WAKING), None)
        });
        trace!(woke = released.is_some(), "PushLock::optimize_chain");
        if let Some(state) = released {
            self.wake(state);
        }
    }

    /// Resumes waiters on behalf of the owner of [`State::WAKING`].
    ///
    /// If the oldest waiter wants exclusive ownership, it alone is detached and resumed; otherwise
    /// the whole chain is detached and every waiter is resumed, oldest first.
    pub(crate) fn wake(&self, state: State) {
        let mut state = state;
        let tail = loop {
            let unlocked = self.transition::<C, _, _>(state, |state| {
                debug_assert!(state.waking() && !state.multiple_shared());
                if state.locked() {
                    // The new owner will wake the chain when it releases the lock.
                    Step::Swap(state.without(State::WAKING), None)
                } else {
                    Step::Stop(Some(state))
                }
            });
            let Some(unlocked) = unlocked else {
                return;
            };
            state = unlocked;

            let head = state.chain_head();
            // SAFETY: the current thread owns `State::WAKING`.
            let tail = unsafe { link_to_tail(head) };
            let tail_ref = unsafe { tail.as_ref() };
            if let Some(previous) = tail_ref.previous().filter(|_| tail_ref.is_exclusive()) {
                // Newer waiters stay queued behind the detached exclusive waiter.
                unsafe { head.as_ref() }.set_last(Some(previous));
                tail_ref.set_previous(None);
                self.word().fetch_and(!State::WAKING, AcqRel);
                break tail;
            }
            if self
                .word()
                .compare_exchange(state.value(), State::FREE.value(), AcqRel, Acquire)
                .is_ok()
            {
                break tail;
            }
            state = self.load(Acquire);
        };

        // Resumed waiters must not race ahead of a preempted waker.
        let preemption = unsafe { tail.as_ref() }
            .previous()
            .is_some()
            .then(PreemptionGuard::<C>::new);

        let mut current = Some(tail);
        while let Some(wait_block) = current {
            // `wait_block` must not be accessed after it has been signaled.
            current = unsafe { wait_block.as_ref() }.previous();
            unsafe {
                WaitBlock::wake(wait_block);
            }
        }
        trace!(multiple = preemption.is_some(), "PushLock::wake");
        drop(preemption);
    }
}
