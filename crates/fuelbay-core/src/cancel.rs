//! Cooperative cancellation of blocked agents.
//!
//! A [`CancelToken`] is shared between an agent and whoever may want to stop
//! it. [`CancelToken::cancel`] flips the flag, interrupts
//! [`CancelToken::sleep`] and wakes every station request queued with the
//! token. A queued request registers a [`CancelWaker`] before it checks the
//! flag, and the waker signals it under the monitor lock, so the wake-up
//! cannot fall between that check and the wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Returned by [`CancelToken::sleep`] when the delay was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Wakes one blocked waiter when its token is cancelled.
pub(crate) trait CancelWaker: Send + Sync {
    fn wake(&self);
}

/// Handle for removing a registered waker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WakerKey(u64);

#[derive(Default)]
struct WakerRegistry {
    next_key: u64,
    entries: Vec<(u64, Arc<dyn CancelWaker>)>,
}

struct CancelInner {
    cancelled: AtomicBool,
    sleep_lock: Mutex<()>,
    sleepers: Condvar,
    wakers: Mutex<WakerRegistry>,
}

/// Shared cancellation flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                sleep_lock: Mutex::new(()),
                sleepers: Condvar::new(),
                wakers: Mutex::new(WakerRegistry::default()),
            }),
        }
    }

    /// Check whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless the token is cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.sleep_lock.lock();
        while !self.is_cancelled() {
            if self
                .inner
                .sleepers
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                break;
            }
        }
        if self.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Check whether two handles refer to the same token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Flip the flag, wake sleepers and wake every request queued with this
    /// token. Returns `false` if already cancelled.
    ///
    /// Must not be called while holding a facility's monitor lock.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        {
            let _guard = self.inner.sleep_lock.lock();
            self.inner.sleepers.notify_all();
        }

        // Taken out first: wakers lock their facility.
        let wakers = std::mem::take(&mut self.inner.wakers.lock().entries);
        for (_, waker) in wakers {
            waker.wake();
        }
        first
    }

    /// Register `waker` to run on cancellation.
    ///
    /// Registration is not checked against the flag; callers check
    /// [`CancelToken::is_cancelled`] afterwards.
    pub(crate) fn register(&self, waker: Arc<dyn CancelWaker>) -> WakerKey {
        let mut registry = self.inner.wakers.lock();
        let key = registry.next_key;
        registry.next_key += 1;
        registry.entries.push((key, waker));
        WakerKey(key)
    }

    /// Remove a waker that is no longer needed. Unknown keys are ignored.
    pub(crate) fn deregister(&self, key: WakerKey) {
        self.inner
            .wakers
            .lock()
            .entries
            .retain(|(own, _)| *own != key.0);
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.wakers.lock().entries.len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.sleep(Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.clone().is_cancelled());
        assert!(token.same_as(&token.clone()));
        assert!(!token.same_as(&CancelToken::new()));
    }

    #[test]
    fn test_sleep_is_interrupted() {
        let token = CancelToken::new();
        let sleeper = token.clone();

        let start = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert_eq!(handle.join().unwrap(), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    struct CountingWaker(std::sync::atomic::AtomicUsize);

    impl CancelWaker for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_runs_registered_wakers_once() {
        let token = CancelToken::new();
        let kept = Arc::new(CountingWaker(Default::default()));
        let removed = Arc::new(CountingWaker(Default::default()));

        token.register(Arc::clone(&kept) as Arc<dyn CancelWaker>);
        let key = token.register(Arc::clone(&removed) as Arc<dyn CancelWaker>);
        assert_eq!(token.registered(), 2);
        token.deregister(key);
        assert_eq!(token.registered(), 1);

        token.cancel();
        token.cancel();
        assert_eq!(kept.0.load(Ordering::SeqCst), 1);
        assert_eq!(removed.0.load(Ordering::SeqCst), 0);
        assert_eq!(token.registered(), 0);
    }
}
