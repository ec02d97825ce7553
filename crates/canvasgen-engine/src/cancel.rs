use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const UNBOUNDED_SLICE: Duration = Duration::from_secs(3_600);

/// Shared flag that aborts a generation between provider calls and wakes
/// any backoff wait in progress.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        match flag.lock() {
            Ok(mut cancelled) => *cancelled = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        match flag.lock() {
            Ok(cancelled) => *cancelled,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleeps up to `timeout`. Returns `true` when woken by cancellation.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let Ok(mut cancelled) = flag.lock() else {
            return true;
        };
        // An unrepresentable deadline means waiting until cancelled.
        let until = Instant::now().checked_add(timeout);
        while !*cancelled {
            let remaining = match until {
                Some(until) => {
                    let now = Instant::now();
                    if now >= until {
                        return false;
                    }
                    until - now
                }
                None => UNBOUNDED_SLICE,
            };
            match signal.wait_timeout(cancelled, remaining) {
                Ok((guard, _)) => cancelled = guard,
                Err(_) => return true,
            }
        }
        true
    }
}
