//! Inbound activity tracking.
//!
//! The exchange streams trades continuously, so a long silence means the
//! session is dead even if the socket never reported a close.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Timestamp of the last inbound frame.
#[derive(Debug)]
pub struct ActivityMonitor {
    last_frame: RwLock<Instant>,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Called when a session opens.
    pub fn reset(&self) {
        *self.last_frame.write() = Instant::now();
    }

    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_frame.read().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_follows_clock() {
        let monitor = ActivityMonitor::new();

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(monitor.idle_for(), Duration::from_secs(121));

        monitor.record_frame();
        assert_eq!(monitor.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        monitor.reset();
        assert_eq!(monitor.idle_for(), Duration::ZERO);
    }
}
