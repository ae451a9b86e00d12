//! Derives a coarse shutter state per (sender, enumerator) from observed
//! commands. Best-effort by nature: the radio protocol has no state readback,
//! so terminal states are inferred from travel time after a confirmed
//! transmission.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    command::Command,
    device::{DeviceId, Enumerator},
};

/// Coarse state of one shutter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Fully open (inferred after travel time).
    Open,
    /// Fully closed (inferred after travel time).
    Closed,
    /// Moving up.
    Opening,
    /// Moving down.
    Closing,
    /// Halted somewhere.
    Stopped,
    /// Never observed.
    Unknown,
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            DeviceState::Open => "open",
            DeviceState::Closed => "closed",
            DeviceState::Opening => "opening",
            DeviceState::Closing => "closing",
            DeviceState::Stopped => "stopped",
            DeviceState::Unknown => "unknown",
        };
        write!(f, "{token}")
    }
}

/// Identifies one shutter: which sender, which enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    /// The owning sender transceiver.
    pub sender: DeviceId,

    /// The receiver enumerator within that sender.
    pub enumerator: Enumerator,
}

impl Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sender, self.enumerator)
    }
}

/// A state transition worth telling downstream consumers about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Which shutter changed.
    pub key: DeviceKey,

    /// What it changed to.
    pub state: DeviceState,
}

fn transient_state(command: Command) -> Option<DeviceState> {
    match command {
        Command::Up | Command::ManualUp => Some(DeviceState::Opening),
        Command::Down | Command::ManualDown => Some(DeviceState::Closing),
        Command::Stop => Some(DeviceState::Stopped),
        _ => None,
    }
}

fn terminal_state(command: Command) -> Option<DeviceState> {
    match command {
        Command::Up | Command::ManualUp => Some(DeviceState::Open),
        Command::Down | Command::ManualDown => Some(DeviceState::Closed),
        _ => None,
    }
}

#[derive(Debug)]
struct Inner {
    states: Mutex<HashMap<DeviceKey, DeviceState>>,

    /// Scheduled terminal confirmations, keyed per shutter so a newer command
    /// supersedes (aborts) the previous one.
    pending: Mutex<HashMap<DeviceKey, JoinHandle<()>>>,

    tx: broadcast::Sender<StateChange>,
}

/// Tracks shutter states and broadcasts changes.
///
/// Changes are only emitted when they differ from the last known state,
/// which suppresses redundant notifications.
#[derive(Debug, Clone)]
pub struct StateTracker {
    inner: Arc<Inner>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    /// A tracker with all shutters unknown.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                tx,
            }),
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.tx.subscribe()
    }

    /// The last known state for a shutter.
    pub fn state(&self, key: DeviceKey) -> DeviceState {
        self.inner
            .states
            .lock()
            .expect("State lock poisoned")
            .get(&key)
            .copied()
            .unwrap_or(DeviceState::Unknown)
    }

    /// An observed command (received over the air) for a shutter.
    pub fn observe(&self, key: DeviceKey, command: Command) {
        let Some(state) = transient_state(command) else {
            return;
        };

        // Whatever was scheduled is now superseded.
        self.cancel_pending(key);
        self.apply(key, state);
    }

    /// A command of ours which finished transmitting. Applies the transient
    /// state now and schedules the optimistic terminal state after the
    /// shutter's travel time.
    pub fn observe_transmitted(&self, key: DeviceKey, command: Command, travel: Duration) {
        self.observe(key, command);

        let Some(terminal) = terminal_state(command) else {
            return;
        };

        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(travel).await;
            debug!(%key, %terminal, "Travel time elapsed, confirming terminal state");
            tracker.apply(key, terminal);
        });

        if let Some(previous) = self
            .inner
            .pending
            .lock()
            .expect("Pending lock poisoned")
            .insert(key, handle)
        {
            previous.abort();
        }
    }

    fn cancel_pending(&self, key: DeviceKey) {
        if let Some(handle) = self
            .inner
            .pending
            .lock()
            .expect("Pending lock poisoned")
            .remove(&key)
        {
            handle.abort();
        }
    }

    fn apply(&self, key: DeviceKey, state: DeviceState) {
        let mut states = self.inner.states.lock().expect("State lock poisoned");

        if states.get(&key) == Some(&state) {
            return;
        }
        states.insert(key, state);
        drop(states);

        debug!(%key, %state, "State changed");

        // An error just means nobody is listening right now.
        let _ = self.inner.tx.send(StateChange { key, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DeviceKey {
        DeviceKey {
            sender: "ABCDEF".parse().unwrap(),
            enumerator: "DE".parse().unwrap(),
        }
    }

    const TRAVEL: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn up_is_opening() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();

        tracker.observe(key(), Command::Up);

        assert_eq!(tracker.state(key()), DeviceState::Opening);
        assert_eq!(rx.recv().await.unwrap().state, DeviceState::Opening);
    }

    #[tokio::test]
    async fn sensor_reports_do_not_change_state() {
        let tracker = StateTracker::new();
        tracker.observe(key(), Command::WindowHandlePosition90);
        assert_eq!(tracker.state(key()), DeviceState::Unknown);
    }

    #[tokio::test]
    async fn duplicate_states_notify_once() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();

        tracker.observe(key(), Command::Up);
        tracker.observe(key(), Command::ManualUp);

        assert_eq!(rx.recv().await.unwrap().state, DeviceState::Opening);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_state_confirms_after_travel() {
        let tracker = StateTracker::new();

        tracker.observe_transmitted(key(), Command::Up, TRAVEL);
        assert_eq!(tracker.state(key()), DeviceState::Opening);

        tokio::time::sleep(TRAVEL + Duration::from_secs(1)).await;
        assert_eq!(tracker.state(key()), DeviceState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_supersedes_scheduled_confirmation() {
        let tracker = StateTracker::new();

        tracker.observe_transmitted(key(), Command::Down, TRAVEL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.observe(key(), Command::Stop);

        tokio::time::sleep(TRAVEL * 2).await;
        assert_eq!(tracker.state(key()), DeviceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_transmission_supersedes_older_confirmation() {
        let tracker = StateTracker::new();

        tracker.observe_transmitted(key(), Command::Down, TRAVEL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.observe_transmitted(key(), Command::Up, TRAVEL);

        tokio::time::sleep(TRAVEL * 2).await;
        assert_eq!(tracker.state(key()), DeviceState::Open);
    }
}
