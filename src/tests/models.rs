use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use loom::sync::atomic::AtomicBool;
use loom::thread::{spawn, yield_now};

use crate::{BlockList, Config, PushLock, Waiter};

#[derive(Debug, Default)]
struct Model;

impl Config for Model {
    fn spin_count() -> usize {
        0
    }

    fn backoff(_retries: usize) {
        yield_now();
    }
}

#[test]
fn exclusive_to_exclusive() {
    loom::model(|| {
        let lock = Arc::new(PushLock::<Model>::new());
        let check = Arc::new(AtomicBool::new(false));

        lock.acquire_exclusive();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.acquire_exclusive();
            assert!(check_clone.load(Relaxed));
            lock_clone.release_exclusive();
        });

        check.store(true, Relaxed);
        lock.release_exclusive();
        assert!(thread.join().is_ok());
        assert!(lock.is_free(Relaxed));
    });
}

#[test]
fn shared_to_exclusive() {
    loom::model(|| {
        let lock = Arc::new(PushLock::<Model>::new());
        let check = Arc::new(AtomicBool::new(false));

        lock.acquire_shared();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.acquire_exclusive();
            assert!(check_clone.load(Relaxed));
            lock_clone.release();
        });

        check.store(true, Relaxed);
        lock.release_shared();
        assert!(thread.join().is_ok());
        assert!(lock.is_free(Relaxed));
    });
}

#[test]
fn exclusive_to_shared_pair() {
    loom::model(|| {
        let lock = Arc::new(PushLock::<Model>::new());
        let check = Arc::new(AtomicBool::new(false));

        lock.acquire_exclusive();

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let lock_clone = lock.clone();
                let check_clone = check.clone();
                spawn(move || {
                    lock_clone.acquire_shared();
                    assert!(check_clone.load(Relaxed));
                    lock_clone.release_shared();
                })
            })
            .collect();

        check.store(true, Relaxed);
        lock.release_exclusive();
        for thread in threads {
            assert!(thread.join().is_ok());
        }
        assert!(lock.is_free(Relaxed));
    });
}

fn shared_pair_to_exclusive(release_any_mode: bool) {
    loom::model(move || {
        let lock = Arc::new(PushLock::<Model>::new());
        let check = Arc::new(AtomicBool::new(false));

        lock.acquire_shared();
        lock.acquire_shared();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.acquire_exclusive();
            assert!(check_clone.load(Relaxed));
            lock_clone.release_exclusive();
        });

        check.store(true, Relaxed);
        for _ in 0..2 {
            if release_any_mode {
                lock.release();
            } else {
                lock.release_shared();
            }
        }
        assert!(thread.join().is_ok());
        assert!(lock.is_free(Relaxed));
    });
}

#[test]
fn shared_pair_to_exclusive_release_shared() {
    shared_pair_to_exclusive(false);
}

#[test]
fn shared_pair_to_exclusive_release() {
    shared_pair_to_exclusive(true);
}

#[test]
fn unblock_after_condition_change() {
    loom::model(|| {
        let list = Arc::new(BlockList::<Model>::new());
        let ready = Arc::new(AtomicBool::new(false));

        let list_clone = list.clone();
        let ready_clone = ready.clone();
        let thread = spawn(move || {
            loop {
                let waiter = pin!(Waiter::new());
                assert!(list_clone.block(waiter.as_ref()));
                if ready_clone.load(Acquire) {
                    break;
                }
                list_clone.wait(waiter.as_ref());
            }
        });

        ready.store(true, Release);
        list.unblock();
        assert!(thread.join().is_ok());
    });
}
