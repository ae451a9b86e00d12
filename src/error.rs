use std::io;

use thiserror::Error;

use crate::device::{DeviceId, Enumerator};

/// Errors that may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A line which was not a control signal and not a well-formed data frame.
    /// Dropped by the receive loop, never fatal.
    #[error("Malformed frame: `{0}`")]
    MalformedFrame(String),

    /// A data frame carried a command code outside the closed enumeration.
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// A command token (e.g. from user input) did not name any command.
    #[error("Unrecognized command token: `{0}`")]
    UnknownToken(String),

    /// The transmitter could not be acquired within the bound.
    /// The command is abandoned; requeueing is the caller's policy.
    #[error("Timed out acquiring the transmitter")]
    ArbiterAcquireTimeout,

    /// The hardware reported a transmitter fault (`tE`).
    /// Fatal for the session; requires a full reconnect.
    #[error("Transmitter fault reported by hardware")]
    TransmitterFault,

    /// No sender with the given id exists in the registry.
    #[error("Unknown sender: {0}")]
    UnknownSender(DeviceId),

    /// No such device is paired to the given sender.
    #[error("Unknown device {enumerator} on sender {sender}")]
    UnknownDevice {
        /// The owning sender.
        sender: DeviceId,
        /// The receiver enumerator looked up.
        enumerator: Enumerator,
    },

    /// An operation required the self sender to be known first.
    #[error("The self sender is not configured")]
    SelfSenderNotConfigured,

    /// The session is no longer running; its queues accept nothing new.
    #[error("The session is closed")]
    SessionClosed,

    /// The session handshake with the microcontroller failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The configuration did not validate.
    #[error("Bad config: {0}")]
    BadConfig(String),

    /// Underlying IO problem.
    #[error("IO problem")]
    Io(#[from] io::Error),
}

impl Error {
    /// Attempt to unwrap the bad config variant.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(msg) = self {
            Ok(msg)
        } else {
            Err(self)
        }
    }
}
