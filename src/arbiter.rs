//! Mutual exclusion over the single physical radio transmitter.
//!
//! The microcontroller can only drive the radio for one logical command at a
//! time and announces busy/idle on the shared serial stream (`t1`/`t0`).
//! Without this arbiter, concurrent writers could corrupt an in-flight
//! transmission or steal each other's completion signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::futures::Notified;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::Error;

/// Holding this means exclusive access to the transmitter.
/// Dropping it releases the transmitter for the next writer.
#[derive(Debug)]
pub struct TransmitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Serializes access to the transmitter, synchronized with the
/// hardware-originated lock/unlock signals.
#[derive(Debug)]
pub struct TransmitArbiter {
    semaphore: Arc<Semaphore>,
    completion: Notify,

    /// Whether the single permit is currently forgotten on behalf of
    /// hardware (a `t1` observation), so that `t0` returns exactly one.
    hardware_holds: AtomicBool,
}

impl Default for TransmitArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransmitArbiter {
    /// A fresh arbiter in the idle state.
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            completion: Notify::new(),
            hardware_holds: AtomicBool::new(false),
        }
    }

    /// Acquire the transmitter for a software write, bounded by `bound`.
    ///
    /// If hardware never answers the attempt is abandoned and reported;
    /// retrying is the caller's policy, not this layer's.
    pub async fn acquire(&self, bound: Duration) -> Result<TransmitPermit, Error> {
        let permit = timeout(bound, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| Error::ArbiterAcquireTimeout)?
            // The semaphore is never closed.
            .map_err(|_| Error::ArbiterAcquireTimeout)?;

        trace!("Transmitter acquired for software write");
        Ok(TransmitPermit { _permit: permit })
    }

    /// Hardware has begun driving the transmitter (`t1`).
    ///
    /// Non-blocking: if software already holds the permit this write is our
    /// own and nothing changes; otherwise the permit is parked on behalf of
    /// hardware until [`Self::hardware_released`].
    pub fn hardware_engaged(&self) {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.hardware_holds.store(true, Ordering::SeqCst);
                debug!("Transmitter engaged by hardware");
            }
            Err(_) => {
                trace!("Transmitter already held, hardware engage is ours");
            }
        }
    }

    /// Hardware has released the transmitter (`t0`).
    ///
    /// Wakes any registered completion waiter and returns a hardware-parked
    /// permit, if one exists.
    pub fn hardware_released(&self) {
        if self.hardware_holds.swap(false, Ordering::SeqCst) {
            self.semaphore.add_permits(1);
            debug!("Transmitter released from hardware hold");
        }

        // Only waiters registered before this point are woken; a stale
        // release cannot satisfy a later wait.
        self.completion.notify_waiters();
    }

    /// A future resolving on the next hardware completion signal.
    ///
    /// Pin and `enable` it *before* putting a frame on the wire, otherwise a
    /// fast `t0` slips past unobserved.
    pub fn completion_signal(&self) -> Notified<'_> {
        self.completion.notified()
    }
}
