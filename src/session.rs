//! One session owns one transport, exclusively: a single receive loop and a
//! single send loop run for its lifetime, sharing the registry, the transmit
//! arbiter and the pairing signal. Sessions are constructed explicitly, so
//! several (e.g. one per test) can coexist in one process.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::codec::{Decoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    arbiter::TransmitArbiter,
    codec::{self, ControlSignal, OutgoingSchellenbergMessage, SchellenbergMessageReceived},
    command::Command,
    config::Timing,
    device::{Device, DeviceId, Enumerator},
    error::Error,
    events::{Event, Events, TimestampedEvent},
    pairing::PairingSignal,
    registry::Registry,
    serial::lines::LinesCodec,
    state::{DeviceKey, DeviceState, StateChange, StateTracker},
};

/// How the send loop resolved one outbound command.
/// Exactly one of these is reported per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Put on the wire and confirmed by hardware.
    Sent,

    /// Put on the wire, but hardware never confirmed within the bound.
    /// Best-effort success is assumed.
    SentUnconfirmed,

    /// Never transmitted; the transmitter could not be acquired in time.
    Abandoned,
}

struct Shared {
    registry: Registry,
    arbiter: TransmitArbiter,
    pairing: PairingSignal,
    tracker: StateTracker,
    events: Events,
    broadcast_tx: broadcast::Sender<SchellenbergMessageReceived>,
    cancel: CancellationToken,
    fatal: Mutex<Option<Error>>,
}

/// A running bridge session.
///
/// Dropping the session does not stop the loops; call [`Session::shutdown`]
/// for a prompt teardown, or let a transmitter fault / transport close end it.
pub struct Session {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<OutgoingSchellenbergMessage>,
    timing: Timing,
    self_id: DeviceId,
}

impl Session {
    /// Perform the handshake on the given transport and spawn the receive
    /// and send loops.
    ///
    /// The transport is owned exclusively from here on.
    pub async fn start<S>(transport: S, timing: Timing, registry: Registry) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut framed = LinesCodec::default().framed(transport);

        let self_id = handshake(&mut framed, timing.handshake()).await?;
        registry.mark_self(self_id).await;
        if registry
            .require_self_sender()
            .await?
            .name
            .is_none()
        {
            registry.rename_sender(self_id, "self").await?;
        }

        let (broadcast_tx, _) = broadcast::channel(1024);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            registry,
            arbiter: TransmitArbiter::new(),
            pairing: PairingSignal::new(),
            tracker: StateTracker::new(),
            events: Events::default(),
            broadcast_tx,
            cancel: CancellationToken::new(),
            fatal: Mutex::new(None),
        });

        let (sink, stream) = framed.split();

        tokio::spawn(
            receive_loop(stream, Arc::clone(&shared))
                .instrument(info_span!("receive", %self_id)),
        );
        tokio::spawn(
            send_loop(sink, outbound_rx, Arc::clone(&shared), timing.clone(), self_id)
                .instrument(info_span!("send", %self_id)),
        );
        // State changes surface both on their own channel and in the event
        // log. The delayed terminal confirmations originate inside the
        // tracker, so the log is fed from its broadcast rather than inline.
        tokio::spawn(
            forward_state_changes(Arc::clone(&shared))
                .instrument(info_span!("state-events", %self_id)),
        );

        Ok(Self {
            shared,
            outbound_tx,
            timing,
            self_id,
        })
    }

    /// The id of the attached transceiver, learned during the handshake.
    pub fn self_id(&self) -> DeviceId {
        self.self_id
    }

    /// The registry this session feeds.
    pub fn registry(&self) -> Registry {
        self.shared.registry.clone()
    }

    /// Subscribe to decoded inbound messages.
    ///
    /// Delivery is in arrival order; a subscriber that cannot keep up lags
    /// (loses oldest messages) rather than blocking the receive loop.
    pub fn subscribe(&self) -> broadcast::Receiver<SchellenbergMessageReceived> {
        self.shared.broadcast_tx.subscribe()
    }

    /// The inbound messages as a stream.
    ///
    /// Lagging shows up as an error item; the stream itself stays usable.
    pub fn messages(&self) -> BroadcastStream<SchellenbergMessageReceived> {
        BroadcastStream::new(self.subscribe())
    }

    /// Subscribe to timestamped bridge events (anomalies included).
    pub fn subscribe_events(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribe to derived shutter-state changes.
    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.shared.tracker.subscribe()
    }

    /// The last derived state for a shutter.
    pub fn device_state(&self, key: DeviceKey) -> DeviceState {
        self.shared.tracker.state(key)
    }

    /// Enqueue a command for transmission. Returns as soon as it is queued;
    /// attach a completion channel to the message to learn its outcome.
    pub fn send(&self, message: OutgoingSchellenbergMessage) -> Result<(), Error> {
        self.outbound_tx
            .send(message)
            .map_err(|_| Error::SessionClosed)
    }

    /// Enqueue a command and wait for the send loop to fully resolve it.
    pub async fn transmit(
        &self,
        enumerator: Enumerator,
        command: Command,
    ) -> Result<SendOutcome, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(OutgoingSchellenbergMessage {
            completion: Some(tx),
            ..OutgoingSchellenbergMessage::new(enumerator, command)
        })?;

        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Wait for an allow-pairing frame from the expected sender.
    ///
    /// Only one pairing wait is meaningful at a time; concurrent attempts
    /// are a caller error.
    pub async fn wait_for_pairing(
        &self,
        expected: DeviceId,
        bound: Option<Duration>,
    ) -> Option<SchellenbergMessageReceived> {
        self.shared
            .pairing
            .wait_for(
                expected,
                bound.unwrap_or_else(|| self.timing.pairing()),
                self.timing.settle(),
            )
            .await
    }

    /// Bond a new device: put the target sender into pairing-listen mode by
    /// transmitting allow-pairing to `enumerator`, wait for the reciprocal
    /// allow-pairing frame from `expected`, and on a match pair the device to
    /// the self sender. `Ok(None)` means nothing bonded within the bound,
    /// which is a normal outcome.
    pub async fn pair_device(
        &self,
        expected: DeviceId,
        enumerator: Enumerator,
        name: Option<&str>,
        bound: Option<Duration>,
    ) -> Result<Option<Device>, Error> {
        if self.transmit(enumerator, Command::AllowPairing).await? == SendOutcome::Abandoned {
            return Err(Error::ArbiterAcquireTimeout);
        }

        match self.wait_for_pairing(expected, bound).await {
            None => Ok(None),
            Some(_message) => {
                let device = self.shared.registry.pair_to_self(enumerator, name).await?;
                Ok(Some(device))
            }
        }
    }

    /// Request a prompt teardown of both loops.
    pub fn shutdown(&self) {
        info!("Session shutdown requested");
        self.shared.cancel.cancel();
    }

    /// Resolves once the session has ended, returning the fatal error if one
    /// tore it down (a transmitter fault), or `None` on a clean close.
    pub async fn closed(&self) -> Option<Error> {
        self.shared.cancel.cancelled().await;
        self.shared.fatal.lock().expect("Fatal lock poisoned").take()
    }
}

/// Strip the ascii whitespace the firmware pads lines with.
fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}

/// Read the next non-empty line within the bound.
async fn read_line<S>(
    framed: &mut Framed<S, LinesCodec>,
    bound: Duration,
) -> Result<Vec<u8>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = timeout(bound, framed.next())
            .await
            .map_err(|_| Error::Handshake("No reply from hardware".into()))?;

        match next {
            Some(Ok(line)) => {
                let line = trim(&line);
                if !line.is_empty() {
                    return Ok(line.to_vec());
                }
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Handshake("Transport closed".into())),
        }
    }
}

/// Exchange the session-start lines and learn the attached transceiver's id.
async fn handshake<S>(framed: &mut Framed<S, LinesCodec>, bound: Duration) -> Result<DeviceId, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(b"hello\n".to_vec()).await?;

    framed.send(b"!?\n".to_vec()).await?;
    let banner = read_line(framed, bound).await?;
    info!(banner = %String::from_utf8_lossy(&banner), "Connected to transceiver");

    framed.send(b"sr\n".to_vec()).await?;
    let reply = read_line(framed, bound).await?;
    if reply.len() <= 2 {
        return Err(Error::Handshake(format!(
            "Expected own id, got `{}`",
            String::from_utf8_lossy(&reply)
        )));
    }

    // The reply repeats the two-byte request prefix before the id.
    let own_id = std::str::from_utf8(&reply[2..])
        .map_err(|_| Error::Handshake("Own id was not ascii".into()))?;

    own_id
        .parse()
        .map_err(|_| Error::Handshake(format!("Own id `{own_id}` was not a hex device id")))
}

async fn forward_state_changes(shared: Arc<Shared>) {
    let mut changes = shared.tracker.subscribe();

    loop {
        let change = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(change) => change,
                // Skipped changes are gone; resume with the current ones.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        shared.events.send_event(Event::StateChanged(change));
    }

    debug!("State change forwarding done");
}

async fn receive_loop<S>(mut stream: SplitStream<Framed<S, LinesCodec>>, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            None => {
                info!("Transport closed, ending session");
                shared.cancel.cancel();
                break;
            }
            // Transport read errors are transient; keep reading.
            Some(Err(e)) => {
                warn!(?e, "Transport read error");
                continue;
            }
            Some(Ok(line)) => {
                let line = trim(&line);
                if line.is_empty() {
                    continue;
                }

                match ControlSignal::classify(line) {
                    Some(ControlSignal::TransmitterEngaged) => {
                        shared.arbiter.hardware_engaged();
                        continue;
                    }
                    Some(ControlSignal::TransmitterReleased) => {
                        shared.arbiter.hardware_released();
                        continue;
                    }
                    Some(ControlSignal::TransmitterFault) => {
                        error!("Transmitter fault, ending session");
                        shared.events.send_event(Event::TransmitterFault);
                        *shared.fatal.lock().expect("Fatal lock poisoned") =
                            Some(Error::TransmitterFault);
                        shared.cancel.cancel();
                        break;
                    }
                    None => {}
                }

                match codec::decode(line) {
                    Ok(message) => handle_message(&shared, message).await,
                    // Malformed frames are dropped, never fatal to the loop.
                    Err(e) => {
                        warn!(%e, line = %String::from_utf8_lossy(line), "Error parsing message")
                    }
                }
            }
        }
    }

    debug!("Receive loop done");
}

/// The sender must exist in the registry before the message counts as
/// processed, and the reported enumerator becomes a (possibly unnamed)
/// paired device of that sender.
async fn handle_message(shared: &Shared, message: SchellenbergMessageReceived) {
    debug!(%message, "Message from wire");

    shared.registry.upsert_sender(message.sender).await;
    if let Err(e) = shared
        .registry
        .attach_device(message.sender, Device::unnamed(message.receiver))
        .await
    {
        warn!(%e, "Could not attach device");
    }

    shared.tracker.observe(
        DeviceKey {
            sender: message.sender,
            enumerator: message.receiver,
        },
        message.command,
    );

    shared.events.send_event(Event::MessageReceived(message.clone()));

    if message.command == Command::AllowPairing {
        shared.pairing.record(message.clone());
    }

    // An error just means nobody is subscribed right now.
    let _ = shared.broadcast_tx.send(message);
}

async fn send_loop<S>(
    mut sink: SplitSink<Framed<S, LinesCodec>, Vec<u8>>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutgoingSchellenbergMessage>,
    shared: Arc<Shared>,
    timing: Timing,
    self_id: DeviceId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            // Teardown wins over queued work, so nothing is transmitted
            // after a fault.
            biased;

            _ = shared.cancel.cancelled() => break,
            message = outbound_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // One command is fully resolved before the next is dequeued.
        transmit_one(&mut sink, message, &shared, &timing, self_id).await;
    }

    debug!("Send loop done");
}

async fn transmit_one<S>(
    sink: &mut SplitSink<Framed<S, LinesCodec>, Vec<u8>>,
    message: OutgoingSchellenbergMessage,
    shared: &Shared,
    timing: &Timing,
    self_id: DeviceId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = codec::encode(&message);
    let OutgoingSchellenbergMessage {
        enumerator,
        command,
        completion,
        ..
    } = message;

    let resolve = |outcome: SendOutcome| {
        if let Some(completion) = completion {
            // The producer may have lost interest; that is fine.
            let _ = completion.send(outcome);
        }
    };

    let permit = match shared.arbiter.acquire(timing.acquire()).await {
        Ok(permit) => permit,
        Err(e) => {
            warn!(%e, %command, %enumerator, "Abandoning send");
            shared.events.send_event(Event::SendAbandoned {
                enumerator,
                command,
            });
            resolve(SendOutcome::Abandoned);
            return;
        }
    };

    // Register for the completion signal before the frame hits the wire,
    // otherwise a fast `t0` slips past unobserved.
    let completion_signal = shared.arbiter.completion_signal();
    tokio::pin!(completion_signal);
    completion_signal.as_mut().enable();

    debug!(%command, %enumerator, "Putting command on wire");
    if let Err(e) = sink.send(encoded).await {
        error!(?e, "Transport write error, abandoning send");
        shared.events.send_event(Event::SendAbandoned {
            enumerator,
            command,
        });
        resolve(SendOutcome::Abandoned);
        drop(permit);
        return;
    }

    let confirmed = timeout(timing.completion(), completion_signal)
        .await
        .is_ok();

    if confirmed {
        shared.events.send_event(Event::MessageSent {
            enumerator,
            command,
        });
    } else {
        // Soft anomaly: proceed assuming best-effort success, but report it.
        warn!(%command, %enumerator, "Hardware did not confirm transmission in time");
        shared.events.send_event(Event::TransmissionUnconfirmed {
            enumerator,
            command,
        });
    }

    // Post-send: derive state optimistically, terminal state after travel.
    shared.tracker.observe_transmitted(
        DeviceKey {
            sender: self_id,
            enumerator,
        },
        command,
        timing.travel(),
    );

    resolve(if confirmed {
        SendOutcome::Sent
    } else {
        SendOutcome::SentUnconfirmed
    });

    drop(permit);
}
