#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The closed set of Schellenberg radio opcodes.
pub mod command;

/// Typed identities: device ids, enumerators, senders and receivers.
pub mod device;

/// Pure encode/decode between wire lines and structured frames.
pub mod codec;

/// The in-memory registry of senders and their paired devices.
pub mod registry;

/// Serializes access to the single physical radio transmitter.
pub mod arbiter;

/// The session: handshake, receive loop and send loop over one transport.
pub mod session;

/// The rendezvous used to bond a new device.
pub mod pairing;

/// Derives a coarse shutter state from observed commands.
pub mod state;

/// Timestamped bridge events, logged and broadcast.
pub mod events;

/// Serial port opening and line framing.
pub mod serial;

/// A mock microcontroller, useful to exercise the bridge without hardware.
pub mod mock;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// The command line interface.
pub mod cli;
