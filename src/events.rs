use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    codec::SchellenbergMessageReceived,
    command::Command,
    device::Enumerator,
    state::StateChange,
};

/// Something observable that happened on the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    /// A frame was decoded from the wire.
    MessageReceived(SchellenbergMessageReceived),

    /// A command was put on the wire and confirmed by hardware.
    MessageSent {
        /// The addressed enumerator.
        enumerator: Enumerator,
        /// The transmitted command.
        command: Command,
    },

    /// A shutter's derived state changed.
    StateChanged(StateChange),

    /// The transmitter could not be acquired in time; the command was
    /// abandoned without transmission.
    SendAbandoned {
        /// The addressed enumerator.
        enumerator: Enumerator,
        /// The abandoned command.
        command: Command,
    },

    /// The frame went out but hardware never confirmed completion.
    TransmissionUnconfirmed {
        /// The addressed enumerator.
        enumerator: Enumerator,
        /// The unconfirmed command.
        command: Command,
    },

    /// Hardware reported a transmitter fault; the session is over.
    TransmitterFault,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::MessageReceived(message) => write!(f, "received: {message}"),
            Event::MessageSent {
                enumerator,
                command,
            } => write!(f, "sent: {command} to {enumerator}"),
            Event::StateChanged(change) => {
                write!(f, "state: {} is now {}", change.key, change.state)
            }
            Event::SendAbandoned {
                enumerator,
                command,
            } => write!(f, "abandoned: {command} to {enumerator}"),
            Event::TransmissionUnconfirmed {
                enumerator,
                command,
            } => write!(f, "unconfirmed: {command} to {enumerator}"),
            Event::TransmitterFault => write!(f, "transmitter fault"),
        }
    }
}

/// An event and when it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampedEvent {
    /// The event.
    pub inner: Event,

    /// When the event happened.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TimestampedEvent {
    /// Stamp an event with the current time.
    pub fn now(inner: Event) -> Self {
        Self {
            inner,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for TimestampedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// An event logger and broadcaster.
#[derive(Debug)]
pub struct Events {
    log: Mutex<VecDeque<TimestampedEvent>>,
    log_size: usize,

    tx: broadcast::Sender<TimestampedEvent>,
}

impl Events {
    /// Create a new events handler.
    /// It will keep a log of at most `log_size` events.
    /// It may be subscribed to to receive any events it sees.
    pub fn new(log_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            tx,
            log: Mutex::new(VecDeque::new()),
            log_size,
        }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Send an event. This will append it to the log and broadcast it to any
    /// subscribers.
    pub fn send_event(&self, event: Event) {
        let event = TimestampedEvent::now(event);
        info!(%event, "Sending and storing event");

        let mut log = self.log.lock().expect("Event log lock poisoned");
        log.push_front(event.clone());

        // Keep a log of at most this number of recent events.
        // Truncate removes from the back, so older events are split off first.
        log.truncate(self.log_size);
        drop(log);

        // An error just means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    /// The most recent events, newest first.
    pub fn recent(&self) -> Vec<TimestampedEvent> {
        self.log
            .lock()
            .expect("Event log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new(100)
    }
}
