use std::time::Duration;

use log::info;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How often a waiter re-checks cancellation while the service is not ready.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks whether the modem reports NR5G service.
///
/// The flag lives in a `watch` channel, so the value and the change notification are updated
/// together and a waiter subscribing right before a transition still sees it.
pub struct ReadinessGate {
    ready: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self { ready }
    }

    /// Updates the flag, returns true if it changed.
    ///
    /// Setting the current value again is a no-op and does not wake anyone.
    pub fn set_ready(&self, ready: bool) -> bool {
        let changed = self.ready.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        });
        if changed {
            if ready {
                info!("NR5G service is available, signaling sync pulse worker");
            } else {
                info!("NR5G service lost");
            }
        }
        changed
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Returns a receiver observing every transition of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Waits until the flag is set or `cancel` is cancelled.
    ///
    /// Returns true once ready, false on cancellation. Wakes up every `poll_interval` to log
    /// progress and re-check cancellation.
    pub async fn wait_until_ready(
        &self,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let mut rx = self.ready.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = tokio::time::timeout(poll_interval, rx.changed()) => match changed {
                    Ok(Ok(())) => {}
                    // Sender lives in `self`, it cannot be dropped while we borrow it
                    Ok(Err(_)) => return false,
                    Err(_) => info!("Still waiting for NR5G service..."),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ready_before_wait() {
        let gate = ReadinessGate::new();
        assert!(gate.set_ready(true));
        let start = Instant::now();
        assert!(gate.wait_until_ready(READINESS_POLL_INTERVAL, &CancellationToken::new()).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_set_ready_idempotent() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        assert!(!gate.set_ready(false));
        assert!(gate.set_ready(true));
        assert!(!gate.set_ready(true));
        assert!(gate.is_ready());
        assert!(gate.set_ready(false));
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakes_on_ready() {
        let gate = Arc::new(ReadinessGate::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let ready = gate.wait_until_ready(READINESS_POLL_INTERVAL, &cancel).await;
                (ready, Instant::now())
            })
        };

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let set_at = Instant::now();
        gate.set_ready(true);
        let (ready, woke_at) = waiter.await.unwrap();
        assert!(ready);
        assert_eq!(woke_at, set_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_not_ready() {
        let gate = Arc::new(ReadinessGate::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.wait_until_ready(READINESS_POLL_INTERVAL, &cancel).await
            })
        };

        // Several poll intervals pass without readiness
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!waiter.is_finished());

        let cancelled_at = Instant::now();
        cancel.cancel();
        assert!(!waiter.await.unwrap());
        assert!(cancelled_at.elapsed() <= READINESS_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_lost_before_wait() {
        let gate = ReadinessGate::new();
        gate.set_ready(true);
        gate.set_ready(false);
        let cancel = CancellationToken::new();
        let wait = gate.wait_until_ready(Duration::from_secs(1), &cancel);
        assert!(tokio::time::timeout(Duration::from_secs(3), wait).await.is_err());
    }
}
