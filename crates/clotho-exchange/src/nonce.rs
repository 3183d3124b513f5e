//! Millisecond nonces for signed requests.
//!
//! REST calls and the WebSocket auth frame share one API key, so both draw
//! from the same `NonceManager`. Values follow wall-clock time but never
//! repeat or go backwards, even when calls race or the clock steps back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of wall-clock time, swappable in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Issues strictly increasing nonces, thread-safe via a CAS loop.
pub struct NonceManager {
    last: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl NonceManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            last: AtomicU64::new(0),
            clock,
        }
    }

    #[must_use]
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Returns `max(last + 1, now_ms)`.
    pub fn next(&self) -> u64 {
        let now = self.clock.now_ms();
        loop {
            let current = self.last.load(Ordering::Acquire);
            let next_val = current.saturating_add(1).max(now);
            match self.last.compare_exchange_weak(
                current,
                next_val,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next_val,
                Err(_) => continue,
            }
        }
    }

    /// Last issued nonce (0 before the first call).
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("last", &self.last())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    struct MockClock {
        time_ms: AtomicU64,
    }

    impl MockClock {
        fn new(initial_ms: u64) -> Self {
            Self {
                time_ms: AtomicU64::new(initial_ms),
            }
        }

        fn set(&self, time_ms: u64) {
            self.time_ms.store(time_ms, Ordering::Release);
        }
    }

    impl Clock for MockClock {
        fn now_ms(&self) -> u64 {
            self.time_ms.load(Ordering::Acquire)
        }
    }

    const BASE_TIME: u64 = 1_700_000_000_000;

    #[test]
    fn test_tracks_wall_clock() {
        let clock = Arc::new(MockClock::new(BASE_TIME));
        let manager = NonceManager::new(clock.clone());

        assert_eq!(manager.next(), BASE_TIME);
        clock.set(BASE_TIME + 5_000);
        assert_eq!(manager.next(), BASE_TIME + 5_000);
    }

    #[test]
    fn test_strictly_increasing_when_clock_stalls() {
        let manager = NonceManager::new(Arc::new(MockClock::new(BASE_TIME)));

        let mut prev = 0u64;
        for _ in 0..1000 {
            let nonce = manager.next();
            assert!(nonce > prev, "nonce must be strictly increasing");
            prev = nonce;
        }
    }

    #[test]
    fn test_clock_going_backwards_does_not_regress() {
        let clock = Arc::new(MockClock::new(BASE_TIME));
        let manager = NonceManager::new(clock.clone());

        let first = manager.next();
        clock.set(BASE_TIME - 60_000);
        assert_eq!(manager.next(), first + 1);
    }

    #[test]
    fn test_concurrent_no_duplicates() {
        let manager = Arc::new(NonceManager::new(Arc::new(MockClock::new(BASE_TIME))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || (0..1000).map(|_| manager.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(seen.insert(nonce), "duplicate nonce {nonce}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
