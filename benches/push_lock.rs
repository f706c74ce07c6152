use criterion::{Criterion, criterion_group, criterion_main};
use pushlock::PushLock;

fn exclusive_release(c: &mut Criterion) {
    c.bench_function("push-lock-exclusive-release", |b| {
        b.iter(|| {
            let lock: PushLock = PushLock::new();
            lock.acquire_exclusive();
            lock.release_exclusive();
        });
    });
}

fn shared_shared_release_release(c: &mut Criterion) {
    c.bench_function("push-lock-shared-shared-release-release", |b| {
        b.iter(|| {
            let lock: PushLock = PushLock::new();
            lock.acquire_shared();
            lock.acquire_shared();
            lock.release_shared();
            lock.release_shared();
        });
    });
}

fn convert_release(c: &mut Criterion) {
    c.bench_function("push-lock-exclusive-convert-release", |b| {
        b.iter(|| {
            let lock: PushLock = PushLock::new();
            lock.acquire_exclusive();
            assert!(lock.convert_exclusive_to_shared());
            lock.release();
        });
    });
}

criterion_group!(
    push_lock,
    exclusive_release,
    shared_shared_release_release,
    convert_release
);
criterion_main!(push_lock);
