use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(result: LockResult<G>, target: &'static str, op: &'static str, kind: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind = kind,
            result = "poisoned_recovered",
            hint = "cached lookups may be stale after a panic in another thread",
            "Recovered from poisoned stash lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), target, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), target, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op, "mutex.lock")
}
