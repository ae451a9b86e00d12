//! A mock microcontroller, emulating the USB stick on the far end of an
//! in-memory duplex pipe. Useful to exercise the whole bridge without the
//! actual hardware: it answers the handshake, brackets accepted outbound
//! frames with `t1`/`t0`, and lets tests inject arbitrary inbound lines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::{
    command::Command,
    device::{DeviceId, Enumerator},
    serial::lines::LinesCodec,
};

/// How the mock reacts to outbound frames.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Whether accepted frames are bracketed with `t1`/`t0`.
    /// Disable to simulate hardware that goes silent mid-transmission.
    pub ack_writes: bool,

    /// How long the emulated radio "transmits" between `t1` and `t0`.
    pub transmit_time: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            ack_writes: true,
            transmit_time: Duration::from_millis(5),
        }
    }
}

/// Handle to a running mock transceiver.
#[derive(Debug)]
pub struct MockTransceiver {
    device_id: DeviceId,
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransceiver {
    /// Spawn a mock with default behavior.
    /// Returns the handle and the transport end to hand to a session.
    pub fn spawn(device_id: DeviceId) -> (Self, DuplexStream) {
        Self::spawn_with(device_id, MockBehavior::default())
    }

    /// Spawn a mock with the given behavior.
    pub fn spawn_with(device_id: DeviceId, behavior: MockBehavior) -> (Self, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(4096);

        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let written = Arc::new(Mutex::new(Vec::new()));
        let written_task = Arc::clone(&written);

        // The mock appends the delimiter itself, lines are injected bare.
        let mut framed = LinesCodec::new(b'\n', Some(b'\n')).framed(ours);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = inject_rx.recv() => match line {
                        Some(line) => {
                            trace!(line = %String::from_utf8_lossy(&line), "Mock emitting line");
                            if framed.send(line).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = framed.next() => {
                        let line = match incoming {
                            Some(Ok(line)) => line,
                            Some(Err(_)) | None => break,
                        };

                        debug!(line = %String::from_utf8_lossy(&line), "Mock got line");
                        match line.as_slice() {
                            b"hello" => {}
                            b"!?" => {
                                if framed.send(b"!mock transceiver".to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            b"sr" => {
                                let reply = format!("sr{device_id}").into_bytes();
                                if framed.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            frame if frame.starts_with(b"ss") => {
                                written_task
                                    .lock()
                                    .expect("Written lock poisoned")
                                    .push(frame.to_vec());

                                if behavior.ack_writes {
                                    if framed.send(b"t1".to_vec()).await.is_err() {
                                        break;
                                    }
                                    tokio::time::sleep(behavior.transmit_time).await;
                                    if framed.send(b"t0".to_vec()).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            debug!("Mock transceiver done");
        });

        (
            Self {
                device_id,
                inject_tx,
                written,
            },
            theirs,
        )
    }

    /// The id this mock answers the `sr` handshake with.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Emit a raw line to the host, delimiter appended.
    pub fn inject_line(&self, line: impl Into<Vec<u8>>) {
        // If the session is gone the line just disappears, as it would
        // on a disconnected wire.
        let _ = self.inject_tx.send(line.into());
    }

    /// Emit a well-formed data frame as if `sender` transmitted `command`
    /// addressed to `receiver`.
    pub fn inject_frame(&self, sender: DeviceId, receiver: Enumerator, command: Command) {
        let line = format!(
            "ss{receiver}{sender}{:02X}{:04X}{:02X}{:02X}",
            command.code(),
            0x00BBu16,
            0x20u8,
            0xC8u8,
        );
        self.inject_line(line.into_bytes());
    }

    /// Emit a transmitter fault (`tE`), tearing the session down.
    pub fn inject_fault(&self) {
        self.inject_line(b"tE".to_vec());
    }

    /// The data frames the host has put on the wire so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.written.lock().expect("Written lock poisoned").clone()
    }
}
