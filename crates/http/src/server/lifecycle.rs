//! Lifecycle callback bookkeeping.
//!
//! Four independent callback sets mirror the server's observable events:
//! start, stop, fail and client-connection-fail. Each registered callback is
//! invoked at most once per event occurrence; registering after the event
//! has already occurred fires the callback immediately in addition to
//! keeping it registered for future occurrences.

use std::sync::Mutex;
use std::sync::PoisonError;

use crate::error::ServerError;

type Callback = Box<dyn Fn() + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&ServerError) + Send + Sync>;

#[derive(Default)]
pub(crate) struct LifecycleListener {
    start: Mutex<Vec<Callback>>,
    stop: Mutex<Vec<Callback>>,
    fail: Mutex<Vec<ErrorCallback>>,
    client_connection_fail: Mutex<Vec<ErrorCallback>>,
}

impl std::fmt::Debug for LifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleListener").finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LifecycleListener {
    pub(crate) fn add_start_callback<F: Fn() + Send + Sync + 'static>(&self, perform_now: bool, callback: F) {
        if perform_now {
            callback();
        }
        lock(&self.start).push(Box::new(callback));
    }

    pub(crate) fn add_stop_callback<F: Fn() + Send + Sync + 'static>(&self, perform_now: bool, callback: F) {
        if perform_now {
            callback();
        }
        lock(&self.stop).push(Box::new(callback));
    }

    pub(crate) fn add_fail_callback<F: Fn(&ServerError) + Send + Sync + 'static>(&self, callback: F) {
        lock(&self.fail).push(Box::new(callback));
    }

    pub(crate) fn add_client_connection_fail_callback<F: Fn(&ServerError) + Send + Sync + 'static>(&self, callback: F) {
        lock(&self.client_connection_fail).push(Box::new(callback));
    }

    pub(crate) fn perform_start_callbacks(&self) {
        for callback in lock(&self.start).iter() {
            callback();
        }
    }

    pub(crate) fn perform_stop_callbacks(&self) {
        for callback in lock(&self.stop).iter() {
            callback();
        }
    }

    pub(crate) fn perform_fail_callbacks(&self, error: &ServerError) {
        for callback in lock(&self.fail).iter() {
            callback(error);
        }
    }

    pub(crate) fn perform_client_connection_fail_callbacks(&self, error: &ServerError) {
        for callback in lock(&self.client_connection_fail).iter() {
            callback(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callbacks_fire_once_per_event() {
        let listener = LifecycleListener::default();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        listener.add_start_callback(false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listener.perform_start_callbacks();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        listener.perform_start_callbacks();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_registration_fires_immediately_and_stays_registered() {
        let listener = LifecycleListener::default();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        listener.add_stop_callback(true, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        listener.perform_stop_callbacks();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
