//! Keepalive loops: liveness check and periodic ping.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timestamp of the last message received on a connection.
#[derive(Debug)]
pub struct Activity {
    last_message: Mutex<Instant>,
}

impl Activity {
    /// Start tracking from now.
    pub fn new() -> Self {
        Self {
            last_message: Mutex::new(Instant::now()),
        }
    }

    /// Record that a message just arrived.
    pub fn touch(&self) {
        *self.last_message.lock() = Instant::now();
    }

    /// Time since the last message.
    pub fn idle(&self) -> Duration {
        self.last_message.lock().elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// How a keepalive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveResult {
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The termination token fired, or the ping could not be queued.
    Stopped,
}

/// Check liveness every `check_every`; return once the connection has been
/// silent for longer than `timeout`.
pub async fn run_ping_check(
    activity: &Activity,
    check_every: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> KeepAliveResult {
    let mut ticker = time::interval_at(Instant::now() + check_every, check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepAliveResult::Stopped,
            _ = ticker.tick() => {
                if activity.idle() > timeout {
                    return KeepAliveResult::TimedOut;
                }
            }
        }
    }
}

/// Call `send_ping` every `interval` until cancelled or until it reports
/// the connection is gone.
pub async fn run_ping_send(
    interval: Duration,
    cancel: CancellationToken,
    send_ping: impl Fn() -> bool,
) -> KeepAliveResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepAliveResult::Stopped,
            _ = ticker.tick() => {
                if !send_ping() {
                    return KeepAliveResult::Stopped;
                }
            }
        }
    }
}
