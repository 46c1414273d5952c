//! Lock helpers that read the same with `std::sync` and `parking_lot`.

#[cfg(feature = "parking-lot")]
pub(crate) use parking_lot::{Condvar, Mutex, MutexGuard};

#[cfg(not(feature = "parking-lot"))]
pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};

// parking_lot never poisons, so it always yields Ok.
#[cfg(feature = "parking-lot")]
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn lock_mutex<T>(m: &Mutex<T>) -> std::result::Result<MutexGuard<'_, T>, ()> {
    Ok(m.lock())
}

#[cfg(not(feature = "parking-lot"))]
pub(crate) fn lock_mutex<T>(m: &Mutex<T>) -> std::result::Result<MutexGuard<'_, T>, ()> {
    m.lock().map_err(|std::sync::PoisonError { .. }| ())
}

// Both variants consume the guard and hand it back after the wakeup.
#[cfg(feature = "parking-lot")]
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn condvar_wait<'a, T>(
    cv: &Condvar,
    mut guard: MutexGuard<'a, T>,
) -> std::result::Result<MutexGuard<'a, T>, ()> {
    cv.wait(&mut guard);
    Ok(guard)
}

#[cfg(not(feature = "parking-lot"))]
pub(crate) fn condvar_wait<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
) -> std::result::Result<MutexGuard<'a, T>, ()> {
    cv.wait(guard).map_err(|std::sync::PoisonError { .. }| ())
}
