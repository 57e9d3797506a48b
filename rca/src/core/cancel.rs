//! Cooperative cancellation shared between the session and external calls.
//!
//! The token is `tokio_util`'s; `cancel` and `is_cancelled` need no runtime,
//! so the blocking process and sandbox loops poll it directly.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Cancel `token` once `timeout` elapses, unless the returned guard is
/// dropped first.
pub fn cancel_after(token: &CancellationToken, timeout: Duration) -> Watchdog {
    let (stop, stopped) = mpsc::channel::<()>();
    let token = token.clone();
    thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(timeout) {
            token.cancel();
        }
    });
    Watchdog { _stop: stop }
}

/// Disarms the timer started by [`cancel_after`] on drop.
#[derive(Debug)]
pub struct Watchdog {
    _stop: Sender<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn child_tokens_follow_the_session_token() {
        let session = CancellationToken::new();
        let call = session.child_token();
        session.cancel();
        assert!(call.is_cancelled());
    }

    #[test]
    fn watchdog_fires_after_timeout() {
        let token = CancellationToken::new();
        let _guard = cancel_after(&token, Duration::from_millis(20));
        for _ in 0..200 {
            if token.is_cancelled() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("watchdog never fired");
    }

    #[test]
    fn dropped_watchdog_never_fires() {
        let token = CancellationToken::new();
        drop(cancel_after(&token, Duration::from_millis(50)));
        thread::sleep(Duration::from_millis(150));
        assert!(!token.is_cancelled());
    }
}
