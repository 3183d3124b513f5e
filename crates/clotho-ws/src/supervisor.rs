//! Connection supervisor.
//!
//! Watches the session for staleness, reconnects while it is closed, and
//! after `max_reconnect_attempts` consecutive failed reconnects hands over to
//! the fail-safe, which is retried until it reports success.

use std::sync::Arc;
use std::time::Duration;

use clotho_exchange::BoxFuture;
use clotho_telemetry::{Alerter, Metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::ConnectionState;

/// Session operations the supervisor needs.
pub trait Session: Send + Sync {
    fn state(&self) -> ConnectionState;
    /// Time since the last inbound frame.
    fn idle_for(&self) -> Duration;
    /// Mark closed now and stop the current session.
    fn force_close(&self);
    /// Start a new session in the background.
    fn reconnect(&self);
}

/// Terminal action once reconnecting is abandoned.
pub trait FailSafe: Send + Sync {
    /// Returns `true` once the action has been confirmed.
    fn engage(&self) -> BoxFuture<'_, bool>;
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Silence longer than this while opened forces a close.
    pub stale_timeout: Duration,
    /// Poll interval while healthy.
    pub check_interval: Duration,
    /// Wait after issuing a reconnect.
    pub reconnect_interval: Duration,
    /// Consecutive reconnects before the fail-safe engages.
    pub max_reconnect_attempts: u32,
    /// Delay between fail-safe attempts.
    pub failsafe_retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(120),
            check_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: 3,
            failsafe_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of one supervisor check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStep {
    Healthy,
    Reconnecting { attempt: u32 },
    Exhausted,
}

pub struct Supervisor {
    session: Arc<dyn Session>,
    failsafe: Arc<dyn FailSafe>,
    config: SupervisorConfig,
    alerter: Alerter,
    shutdown: CancellationToken,
    attempts: u32,
}

impl Supervisor {
    pub fn new(
        session: Arc<dyn Session>,
        failsafe: Arc<dyn FailSafe>,
        config: SupervisorConfig,
        alerter: Alerter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            failsafe,
            config,
            alerter,
            shutdown,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// One check: staleness, then reconnect bookkeeping.
    pub fn tick(&mut self) -> SupervisorStep {
        if self.session.state() == ConnectionState::Opened {
            let idle = self.session.idle_for();
            if idle > self.config.stale_timeout {
                warn!(idle_ms = idle.as_millis() as u64, "No frames within timeout, closing session");
                Metrics::ws_reconnect("stale");
                self.session.force_close();
            } else {
                self.attempts = 0;
                return SupervisorStep::Healthy;
            }
        }

        if self.attempts >= self.config.max_reconnect_attempts {
            return SupervisorStep::Exhausted;
        }
        self.attempts += 1;
        warn!(attempt = self.attempts, "WebSocket closed, reconnecting");
        Metrics::ws_reconnect("closed");
        self.alerter.send("WatchDOG: WebSocket reconnect!");
        self.session.reconnect();
        SupervisorStep::Reconnecting {
            attempt: self.attempts,
        }
    }

    /// Runs until shutdown or until the fail-safe has completed.
    pub async fn run(mut self) {
        info!("Connection supervisor started");
        // The session opened at startup gets one reconnect interval to come up.
        tokio::select! {
            () = tokio::time::sleep(self.config.reconnect_interval) => {}
            () = self.shutdown.cancelled() => return,
        }
        loop {
            let wait = match self.tick() {
                SupervisorStep::Healthy => self.config.check_interval,
                SupervisorStep::Reconnecting { .. } => self.config.reconnect_interval,
                SupervisorStep::Exhausted => {
                    error!(
                        attempts = self.attempts,
                        "Reconnect attempts exhausted, engaging fail-safe"
                    );
                    self.alerter.send("WatchDOG: Can not reconnect socket");
                    // Nothing reconnects after this point, so stop any handshake still in flight.
                    self.session.force_close();
                    self.run_failsafe().await;
                    return;
                }
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.shutdown.cancelled() => {
                    info!("Connection supervisor stopped");
                    return;
                }
            }
        }
    }

    /// Retries the fail-safe until it succeeds. Only shutdown interrupts it.
    pub async fn run_failsafe(&self) -> bool {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.failsafe.engage().await {
                info!(attempt, "Fail-safe completed");
                self.alerter.send("WatchDOG: all orders cancelled, supervisor stopped");
                return true;
            }
            warn!(attempt, "Fail-safe attempt failed, retrying");
            tokio::select! {
                () = tokio::time::sleep(self.config.failsafe_retry_delay) => {}
                () = self.shutdown.cancelled() => {
                    error!(attempt, "Shutdown interrupted the fail-safe; orders may remain open");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clotho_telemetry::RecordingNotifier;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Session double whose reconnects succeed only when told to.
    struct FakeSession {
        state: Mutex<ConnectionState>,
        idle: Mutex<Duration>,
        reconnect_succeeds: Mutex<bool>,
        force_closes: AtomicU32,
        reconnects: AtomicU32,
    }

    impl FakeSession {
        fn new(state: ConnectionState) -> Self {
            Self {
                state: Mutex::new(state),
                idle: Mutex::new(Duration::ZERO),
                reconnect_succeeds: Mutex::new(false),
                force_closes: AtomicU32::new(0),
                reconnects: AtomicU32::new(0),
            }
        }
    }

    impl Session for FakeSession {
        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        fn idle_for(&self) -> Duration {
            *self.idle.lock()
        }

        fn force_close(&self) {
            self.force_closes.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = ConnectionState::Closed;
        }

        fn reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if *self.reconnect_succeeds.lock() {
                *self.state.lock() = ConnectionState::Opened;
                *self.idle.lock() = Duration::ZERO;
            }
        }
    }

    /// Fails `failures` times, then succeeds.
    struct CountingFailSafe {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl CountingFailSafe {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl FailSafe for CountingFailSafe {
        fn engage(&self) -> BoxFuture<'_, bool> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                    .is_err()
            })
        }
    }

    fn supervisor(
        session: Arc<FakeSession>,
        failsafe: Arc<CountingFailSafe>,
        notifier: Arc<RecordingNotifier>,
    ) -> Supervisor {
        Supervisor::new(
            session,
            failsafe,
            SupervisorConfig::default(),
            Alerter::new(notifier, "chat"),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_fresh_session_is_healthy() {
        let session = Arc::new(FakeSession::new(ConnectionState::Opened));
        *session.idle.lock() = Duration::from_secs(30);
        let mut sup = supervisor(
            session.clone(),
            Arc::new(CountingFailSafe::new(0)),
            Arc::new(RecordingNotifier::new()),
        );

        assert_eq!(sup.tick(), SupervisorStep::Healthy);
        assert_eq!(session.reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_session_closed_and_reconnected_once() {
        let session = Arc::new(FakeSession::new(ConnectionState::Opened));
        *session.idle.lock() = Duration::from_secs(121);
        let notifier = Arc::new(RecordingNotifier::new());
        let mut sup = supervisor(
            session.clone(),
            Arc::new(CountingFailSafe::new(0)),
            notifier.clone(),
        );

        assert_eq!(sup.tick(), SupervisorStep::Reconnecting { attempt: 1 });
        assert_eq!(session.force_closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.reconnects.load(Ordering::SeqCst), 1);
        assert!(notifier.contains("WatchDOG: WebSocket reconnect!"));
    }

    #[test]
    fn test_successful_reconnect_resets_attempts() {
        let session = Arc::new(FakeSession::new(ConnectionState::Closed));
        let mut sup = supervisor(
            session.clone(),
            Arc::new(CountingFailSafe::new(0)),
            Arc::new(RecordingNotifier::new()),
        );

        assert_eq!(sup.tick(), SupervisorStep::Reconnecting { attempt: 1 });
        assert_eq!(sup.tick(), SupervisorStep::Reconnecting { attempt: 2 });
        *session.state.lock() = ConnectionState::Opened;
        assert_eq!(sup.tick(), SupervisorStep::Healthy);
        assert_eq!(sup.attempts(), 0);
    }

    #[test]
    fn test_exhausted_after_bound() {
        let session = Arc::new(FakeSession::new(ConnectionState::Closed));
        let mut sup = supervisor(
            session.clone(),
            Arc::new(CountingFailSafe::new(0)),
            Arc::new(RecordingNotifier::new()),
        );

        for attempt in 1..=3 {
            assert_eq!(sup.tick(), SupervisorStep::Reconnecting { attempt });
        }
        assert_eq!(sup.tick(), SupervisorStep::Exhausted);
        assert_eq!(session.reconnects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_engages_failsafe_until_success() {
        let session = Arc::new(FakeSession::new(ConnectionState::Closed));
        let failsafe = Arc::new(CountingFailSafe::new(4));
        let notifier = Arc::new(RecordingNotifier::new());
        let sup = supervisor(session.clone(), failsafe.clone(), notifier.clone());

        sup.run().await;

        assert_eq!(session.reconnects.load(Ordering::SeqCst), 3);
        assert_eq!(session.force_closes.load(Ordering::SeqCst), 1);
        assert_eq!(failsafe.calls.load(Ordering::SeqCst), 5);
        assert!(notifier.contains("WatchDOG: Can not reconnect socket"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_without_failsafe() {
        let session = Arc::new(FakeSession::new(ConnectionState::Closed));
        *session.reconnect_succeeds.lock() = true;
        let failsafe = Arc::new(CountingFailSafe::new(0));
        let shutdown = CancellationToken::new();
        let sup = Supervisor::new(
            session.clone(),
            failsafe.clone(),
            SupervisorConfig::default(),
            Alerter::new(Arc::new(RecordingNotifier::new()), "chat"),
            shutdown.clone(),
        );

        let handle = tokio::spawn(sup.run());
        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(session.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(failsafe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), ConnectionState::Opened);
    }
}
