//! Counting semaphore used to wake the pacing thread.
//!
//! Each [`crate::VideoOutput`] pairs one producer-side counter with one
//! dedicated delivery thread. Every `unlock_frame` posts the semaphore once;
//! the pacing thread performs one delivery pass per wakeup. The permit count
//! is therefore the number of produced-but-undelivered frames, and a final
//! post during shutdown guarantees the thread observes the stop flag.

use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// Result of a bounded wait attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A permit was acquired.
    Acquired,
    /// The timeout elapsed with no permit available.
    TimedOut,
}

/// A counting semaphore built from a mutex and condition variable.
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads. Mutex poisoning is
/// recovered with `into_inner` so a panicking producer can never wedge the
/// delivery thread.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// # use framesync::semaphore::Semaphore;
///
/// let sem = Arc::new(Semaphore::new(0));
///
/// let worker = {
///     let sem = Arc::clone(&sem);
///     thread::spawn(move || {
///         sem.wait();
///     })
/// };
///
/// sem.post();
/// worker.join().unwrap();
/// ```
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Semaphore {
    /// Creates a semaphore holding `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// Releases one permit and wakes one waiting thread.
    pub fn post(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *permits = permits.saturating_add(1);
        self.cv.notify_one();
    }

    /// Blocks until a permit is available, then consumes it.
    pub fn wait(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *permits == 0 {
            permits = match self.cv.wait(permits) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *permits -= 1;
    }

    /// Consumes a permit if one is immediately available.
    pub fn try_wait(&self) -> bool {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    /// Waits up to `timeout` for a permit.
    ///
    /// Used by shutdown paths and tests that must not hang; the pacing loop
    /// itself uses the unbounded [`Semaphore::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let start = std::time::Instant::now();

        while *permits == 0 {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return WaitOutcome::TimedOut;
            }

            let remaining = timeout - elapsed;
            match self.cv.wait_timeout(permits, remaining) {
                Ok((guard, timeout_result)) => {
                    permits = guard;
                    if timeout_result.timed_out() && *permits == 0 {
                        return WaitOutcome::TimedOut;
                    }
                }
                Err(poisoned) => {
                    let (guard, _) = poisoned.into_inner();
                    permits = guard;
                }
            }
        }

        *permits -= 1;
        WaitOutcome::Acquired
    }

    /// Returns the current permit count.
    ///
    /// Only meaningful as a diagnostic snapshot; another thread may change
    /// the count before the caller acts on it.
    pub fn permits(&self) -> usize {
        *self
            .permits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_holds_initial_permits() {
        let sem = Semaphore::new(2);
        assert_eq!(sem.permits(), 2);
    }

    #[test]
    fn test_post_increments() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        assert_eq!(sem.permits(), 2);
    }

    #[test]
    fn test_wait_consumes_permit() {
        let sem = Semaphore::new(1);
        sem.wait();
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn test_try_wait_without_permit() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_try_wait_with_permit() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_post_before_wait() {
        let sem = Semaphore::new(0);
        sem.post();
        assert_eq!(
            sem.wait_timeout(Duration::from_millis(100)),
            WaitOutcome::Acquired
        );
    }

    #[test]
    fn test_wait_then_post() {
        let sem = Arc::new(Semaphore::new(0));
        let sem_clone = Arc::clone(&sem);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sem_clone.post();
        });

        assert_eq!(
            sem.wait_timeout(Duration::from_secs(1)),
            WaitOutcome::Acquired
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_timeout_expires() {
        let sem = Semaphore::new(0);
        assert_eq!(
            sem.wait_timeout(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_permits_accumulate_across_posts() {
        let sem = Semaphore::new(0);
        for _ in 0..5 {
            sem.post();
        }
        for _ in 0..5 {
            assert!(sem.try_wait());
        }
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_concurrent_posts_wake_all_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let mut waiters = Vec::new();

        for _ in 0..4 {
            let sem = Arc::clone(&sem);
            waiters.push(thread::spawn(move || {
                sem.wait_timeout(Duration::from_secs(5)) == WaitOutcome::Acquired
            }));
        }

        for _ in 0..4 {
            sem.post();
        }

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn test_wakeup_races_with_post() {
        for _ in 0..100 {
            let sem = Arc::new(Semaphore::new(0));
            let sem_clone = Arc::clone(&sem);

            let poster = thread::spawn(move || {
                sem_clone.post();
            });

            let outcome = sem.wait_timeout(Duration::from_secs(1));
            poster.join().unwrap();

            assert_eq!(outcome, WaitOutcome::Acquired);
        }
    }
}
