//! The pairing rendezvous.
//!
//! Pairing puts a target sender into pairing-listen mode (an allow-pairing
//! command addressed to a chosen enumerator) and then waits to observe a
//! reciprocal allow-pairing frame *from* that sender, which signals a device
//! has bonded. This is a narrow rendezvous, not a general subscription: only
//! one wait is meaningful at a time, and concurrent attempts are a caller
//! error.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{codec::SchellenbergMessageReceived, device::DeviceId};

/// Holds the latest observed allow-pairing frame and wakes waiters.
///
/// The receive loop records; the pairing coordinator waits.
#[derive(Debug)]
pub struct PairingSignal {
    latest: Mutex<Option<SchellenbergMessageReceived>>,
    tx: watch::Sender<u64>,
}

impl Default for PairingSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingSignal {
    /// No signal observed yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            latest: Mutex::new(None),
            tx,
        }
    }

    /// Record an observed allow-pairing frame and wake any waiter.
    pub fn record(&self, message: SchellenbergMessageReceived) {
        debug!(sender = %message.sender, "Pairing signal observed");
        *self.latest.lock().expect("Pairing lock poisoned") = Some(message);
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Wait for an allow-pairing frame from the expected sender.
    ///
    /// Any stale signal is cleared first. Each wakeup is followed by a settle
    /// delay, since the physical transceiver keeps transmitting status for a
    /// moment after the logical signal arrives. A signal from a different
    /// sender is discarded and the wait resumes; running out of `bound`
    /// returns `None`, which is a normal outcome, not an error.
    pub async fn wait_for(
        &self,
        expected: DeviceId,
        bound: Duration,
        settle: Duration,
    ) -> Option<SchellenbergMessageReceived> {
        *self.latest.lock().expect("Pairing lock poisoned") = None;
        let mut rx = self.tx.subscribe();

        info!(%expected, "Waiting for pairing message");
        loop {
            match timeout(bound, rx.changed()).await {
                Err(_elapsed) => {
                    info!(%expected, "Timed out waiting for pairing message");
                    return None;
                }
                // The session owning the sender half is gone.
                Ok(Err(_closed)) => return None,
                Ok(Ok(())) => {}
            }

            // Let the transceiver finish sending before inspecting.
            tokio::time::sleep(settle).await;

            let latest = self
                .latest
                .lock()
                .expect("Pairing lock poisoned")
                .clone();

            match latest {
                Some(message) if message.sender == expected => {
                    info!(%expected, "Pairing message received");
                    return Some(message);
                }
                Some(message) => {
                    warn!(
                        got = %message.sender,
                        %expected,
                        "Pairing message from unexpected sender, ignoring"
                    );
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::Command;

    const BOUND: Duration = Duration::from_secs(10);
    const SETTLE: Duration = Duration::from_secs(1);

    fn pairing_message(sender: &str) -> SchellenbergMessageReceived {
        SchellenbergMessageReceived {
            sender: sender.parse().unwrap(),
            receiver: "A5".parse().unwrap(),
            command: Command::AllowPairing,
            counter: 1,
            local_counter: 1,
            signal_strength: 0xC0,
            original: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn matching_sender_resolves_the_wait() {
        let signal = Arc::new(PairingSignal::new());
        let expected: DeviceId = "ABCDEF".parse().unwrap();

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_for(expected, BOUND, SETTLE).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.record(pairing_message("ABCDEF"));

        let message = waiter.await.unwrap().expect("Should have paired");
        assert_eq!(message.sender, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_sender_is_ignored_until_timeout() {
        let signal = Arc::new(PairingSignal::new());
        let expected: DeviceId = "ABCDEF".parse().unwrap();

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_for(expected, BOUND, SETTLE).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.record(pairing_message("123456"));

        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_signal_is_cleared_before_waiting() {
        let signal = PairingSignal::new();
        signal.record(pairing_message("ABCDEF"));

        assert!(signal
            .wait_for("ABCDEF".parse().unwrap(), Duration::from_secs(2), SETTLE)
            .await
            .is_none());
    }
}
