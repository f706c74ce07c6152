//! Implementations of locking traits from the [`lock_api`](https://crates.io/crates/lock_api) crate.

use crate::config::Config;
use crate::push_lock::PushLock;

/// A mutual exclusion primitive for protecting shared data of type `T`.
///
/// # Examples
///
/// ```
/// use pushlock::Mutex;
///
/// let mutex: Mutex<usize> = Mutex::new(0);
/// ```
pub type Mutex<T> = lock_api::Mutex<PushLock, T>;

/// An RAII implementation of a scoped mutex.
///
/// # Examples
///
/// ```
/// use pushlock::{Mutex, MutexGuard};
///
/// let mutex: Mutex<usize> = Mutex::new(0);
/// let mut guard: MutexGuard<usize> = mutex.lock();
/// *guard += 1;
/// drop(guard);
///
/// assert_eq!(*mutex.try_lock().unwrap(), 1);
/// ```
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, PushLock, T>;

/// A reader-writer lock for protecting shared data of type `T`.
///
/// # Examples
///
/// ```
/// use pushlock::RwLock;
///
/// let rwlock: RwLock<usize> = RwLock::new(0);
/// ```
pub type RwLock<T> = lock_api::RwLock<PushLock, T>;

/// An RAII implementation of a scoped read lock.
///
/// # Examples
///
/// ```
/// use pushlock::{RwLock, RwLockReadGuard};
///
/// let rwlock: RwLock<usize> = RwLock::new(0);
/// let guard: RwLockReadGuard<usize> = rwlock.read();
/// let other: RwLockReadGuard<usize> = rwlock.read();
/// assert_eq!(*guard + *other, 0);
/// assert!(rwlock.try_write().is_none());
/// ```
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, PushLock, T>;

/// An RAII implementation of a scoped write lock.
///
/// # Examples
///
/// ```
/// use pushlock::{RwLock, RwLockWriteGuard};
///
/// let rwlock: RwLock<usize> = RwLock::new(0);
/// let mut guard: RwLockWriteGuard<usize> = rwlock.write();
/// *guard += 1;
/// drop(guard);
///
/// assert_eq!(*rwlock.read(), 1);
/// ```
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, PushLock, T>;

unsafe impl<C: Config> lock_api::RawMutex for PushLock<C> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = PushLock::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        self.acquire_exclusive();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_acquire_exclusive()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.release_exclusive();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        PushLock::is_locked(self, std::sync::atomic::Ordering::Relaxed)
    }
}

unsafe impl<C: Config> lock_api::RawRwLock for PushLock<C> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = PushLock::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        self.acquire_shared();
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        self.try_acquire_shared()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        self.release_shared();
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.acquire_exclusive();
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        self.try_acquire_exclusive()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        self.release_exclusive();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        PushLock::is_locked(self, std::sync::atomic::Ordering::Relaxed)
    }
}
