use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    command::{Command, Retries},
    device::{DeviceId, Enumerator},
    error::Error,
    session::SendOutcome,
};

/// The prefix shared by all data frames, inbound and outbound.
pub const FRAME_PREFIX: &[u8] = b"ss";

/// A data frame is always exactly this long:
/// `ss` + enumerator(2) + device id(6) + command(2) + counter(4)
/// + local counter(2) + signal strength(2).
pub const FRAME_LEN: usize = 20;

/// A reserved single-token control line, multiplexed on the same serial
/// stream as the data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// `t1`: hardware has begun driving the transmitter.
    TransmitterEngaged,

    /// `t0`: hardware has released the transmitter.
    TransmitterReleased,

    /// `tE`: transmitter fault, fatal for the session.
    TransmitterFault,
}

impl ControlSignal {
    /// Classify a line as a control signal, if it is one.
    pub fn classify(line: &[u8]) -> Option<Self> {
        match line {
            b"t1" => Some(Self::TransmitterEngaged),
            b"t0" => Some(Self::TransmitterReleased),
            b"tE" => Some(Self::TransmitterFault),
            _ => None,
        }
    }
}

/// An inbound decoded frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchellenbergMessageReceived {
    /// The id of the sender transceiver the frame came from.
    pub sender: DeviceId,

    /// The receiver enumerator the frame addresses.
    pub receiver: Enumerator,

    /// The command carried.
    pub command: Command,

    /// 16-bit rolling counter.
    pub counter: u16,

    /// 8-bit local counter.
    pub local_counter: u8,

    /// 8-bit link quality indicator.
    pub signal_strength: u8,

    /// The raw original line, kept for diagnostics.
    #[serde(skip)]
    pub original: Vec<u8>,
}

impl Display for SchellenbergMessageReceived {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}: {}, cnt={}, lcnt={}, lq={}",
            self.sender,
            self.receiver,
            self.command,
            self.counter,
            self.local_counter,
            self.signal_strength
        )
    }
}

fn hex_field<T>(line: &[u8], range: std::ops::Range<usize>) -> Result<T, Error>
where
    T: TryFrom<u32>,
{
    let text = std::str::from_utf8(&line[range])
        .map_err(|_| Error::MalformedFrame(String::from_utf8_lossy(line).into_owned()))?;

    let value = u32::from_str_radix(text, 16)
        .map_err(|_| Error::MalformedFrame(String::from_utf8_lossy(line).into_owned()))?;

    T::try_from(value)
        .map_err(|_| Error::MalformedFrame(String::from_utf8_lossy(line).into_owned()))
}

/// Decode one wire line into a structured frame.
///
/// Control signals are not data frames; route them via
/// [`ControlSignal::classify`] first.
pub fn decode(line: &[u8]) -> Result<SchellenbergMessageReceived, Error> {
    if line.len() != FRAME_LEN || !line.starts_with(FRAME_PREFIX) {
        return Err(Error::MalformedFrame(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }

    let receiver = Enumerator::new(hex_field::<u8>(line, 2..4)?);
    let sender = DeviceId::new(hex_field::<u32>(line, 4..10)?)
        .map_err(|_| Error::MalformedFrame(String::from_utf8_lossy(line).into_owned()))?;
    let command = Command::from_code(hex_field::<u8>(line, 10..12)?)?;
    let counter = hex_field::<u16>(line, 12..16)?;
    let local_counter = hex_field::<u8>(line, 16..18)?;
    let signal_strength = hex_field::<u8>(line, 18..20)?;

    Ok(SchellenbergMessageReceived {
        sender,
        receiver,
        command,
        counter,
        local_counter,
        signal_strength,
        original: line.to_vec(),
    })
}

/// A command to transmit. Constructed by a producer, consumed exactly once
/// by the send loop.
///
/// Wire layout:
///
/// | part   | meaning                                      |
/// |--------|----------------------------------------------|
/// | `ss`   | frame prefix                                 |
/// | `A5`   | receiver enumerator                          |
/// | `9`    | extra radio bursts the hardware sends (0-F)  |
/// | `01`   | command code                                 |
/// | `0000` | required padding                             |
#[derive(Debug)]
pub struct OutgoingSchellenbergMessage {
    /// The receiver enumerator the command addresses.
    pub enumerator: Enumerator,

    /// The command to transmit.
    pub command: Command,

    /// Hardware-level burst repetition.
    pub num_retries: Retries,

    /// If set, resolved with the outcome once the send loop has fully
    /// processed this command.
    pub completion: Option<oneshot::Sender<SendOutcome>>,
}

impl OutgoingSchellenbergMessage {
    /// A command with the default retry count and no completion channel.
    pub fn new(enumerator: Enumerator, command: Command) -> Self {
        Self {
            enumerator,
            command,
            num_retries: Retries::default(),
            completion: None,
        }
    }
}

impl Display for OutgoingSchellenbergMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{} {} num_retries={}",
            self.enumerator,
            self.command,
            self.num_retries.count()
        )
    }
}

/// Render an outbound command as one newline-terminated ASCII line.
///
/// Value ranges are enforced by the field types, so encoding cannot fail.
pub fn encode(message: &OutgoingSchellenbergMessage) -> Vec<u8> {
    format!(
        "ss{}{:X}{:02X}0000\n",
        message.enumerator,
        message.num_retries.count(),
        message.command.code()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_known_frame() {
        let message = decode(b"ssDEABCDEF0100bb20CB").unwrap();

        assert_eq!(message.sender.to_string(), "ABCDEF");
        assert_eq!(message.receiver.to_string(), "DE");
        assert_eq!(message.command, Command::Up);
        assert_eq!(message.counter, 0x00BB);
        assert_eq!(message.local_counter, 0x20);
        assert_eq!(message.signal_strength, 0xCB);
        assert_eq!(message.original, b"ssDEABCDEF0100bb20CB");
    }

    #[test]
    fn wrong_length_is_malformed() {
        assert!(matches!(
            decode(b"ssDEABCDEF0100bb20C"),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            decode(b"ssDEABCDEF0100bb20CB0"),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(decode(b""), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn wrong_prefix_is_malformed() {
        assert!(matches!(
            decode(b"xxDEABCDEF0100bb20CB"),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn non_hex_field_is_malformed() {
        assert!(matches!(
            decode(b"ssZZABCDEF0100bb20CB"),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn unknown_command_is_distinguished() {
        // 0xFF is not in the closed enumeration.
        assert!(matches!(
            decode(b"ssDEABCDEFFF00bb20CB"),
            Err(Error::UnknownCommand(0xFF))
        ));
    }

    #[test]
    fn encodes_stop_with_nine_retries() {
        let message = OutgoingSchellenbergMessage {
            enumerator: "A5".parse().unwrap(),
            command: Command::Stop,
            num_retries: Retries::new(9).unwrap(),
            completion: None,
        };

        assert_eq!(encode(&message), b"ssA590000000\n");
    }

    #[test]
    fn echoed_encoding_round_trips() {
        let message = OutgoingSchellenbergMessage::new("1F".parse().unwrap(), Command::Down);
        let encoded = encode(&message);

        // Splice the outbound enumerator and command into a frame as the
        // hardware would echo it, with synthetic counters.
        let echoed = format!(
            "ss{}123456{:02X}000000FF",
            message.enumerator,
            message.command.code()
        );
        let decoded = decode(echoed.as_bytes()).unwrap();

        assert_eq!(decoded.receiver, message.enumerator);
        assert_eq!(decoded.command, message.command);
        assert!(encoded.ends_with(b"\n"));
    }

    #[test]
    fn control_lines_are_classified() {
        assert_eq!(
            ControlSignal::classify(b"t1"),
            Some(ControlSignal::TransmitterEngaged)
        );
        assert_eq!(
            ControlSignal::classify(b"t0"),
            Some(ControlSignal::TransmitterReleased)
        );
        assert_eq!(
            ControlSignal::classify(b"tE"),
            Some(ControlSignal::TransmitterFault)
        );
        assert_eq!(ControlSignal::classify(b"ssDEABCDEF0100bb20CB"), None);
    }
}
