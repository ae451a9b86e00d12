use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A Schellenberg radio opcode.
///
/// This is a closed enumeration; codes outside it are rejected at decode time.
/// The window-handle variants are sensor status reports, observed with device
/// enumerator `0x14` on the remotes seen in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Stop movement.
    Stop,
    /// Drive up until the upper endpoint.
    Up,
    /// Drive down until the lower endpoint.
    Down,
    /// Window handle at 0°.
    ///
    /// Renamed explicitly: the blanket rename would not separate the digits.
    #[serde(rename = "WINDOW_HANDLE_POSITION_0")]
    WindowHandlePosition0,
    /// Window handle at 90°.
    #[serde(rename = "WINDOW_HANDLE_POSITION_90")]
    WindowHandlePosition90,
    /// Window handle at 180°.
    #[serde(rename = "WINDOW_HANDLE_POSITION_180")]
    WindowHandlePosition180,
    /// Make the selected device listen for a new remote's id.
    AllowPairing,
    /// Drive up as long as the button is held.
    ManualUp,
    /// Drive down as long as the button is held.
    ManualDown,
    /// Pair with my device id / change your direction.
    PairChangeDirection,
    /// Set the upper endpoint.
    SetUpperEndpoint,
    /// Set the lower endpoint.
    SetLowerEndpoint,
}

impl Command {
    /// The wire code of this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Stop => 0x00,
            Command::Up => 0x01,
            Command::Down => 0x02,
            Command::WindowHandlePosition0 => 0x1A,
            Command::WindowHandlePosition90 => 0x1B,
            Command::WindowHandlePosition180 => 0x3B,
            Command::AllowPairing => 0x40,
            Command::ManualUp => 0x41,
            Command::ManualDown => 0x42,
            Command::PairChangeDirection => 0x60,
            Command::SetUpperEndpoint => 0x61,
            Command::SetLowerEndpoint => 0x62,
        }
    }

    /// Look a command up by its wire code.
    pub fn from_code(code: u8) -> Result<Self, Error> {
        let command = match code {
            0x00 => Command::Stop,
            0x01 => Command::Up,
            0x02 => Command::Down,
            0x1A => Command::WindowHandlePosition0,
            0x1B => Command::WindowHandlePosition90,
            0x3B => Command::WindowHandlePosition180,
            0x40 => Command::AllowPairing,
            0x41 => Command::ManualUp,
            0x42 => Command::ManualDown,
            0x60 => Command::PairChangeDirection,
            0x61 => Command::SetUpperEndpoint,
            0x62 => Command::SetLowerEndpoint,
            _ => return Err(Error::UnknownCommand(code)),
        };

        Ok(command)
    }

    /// Total mapping from the small closed set of user-facing tokens
    /// (as used by external collaborators) to a command.
    pub fn from_token(token: &str) -> Result<Self, Error> {
        let command = match token {
            "STOP" => Command::Stop,
            "UP" => Command::Up,
            "DOWN" => Command::Down,
            "WINDOW_HANDLE_POSITION_0" => Command::WindowHandlePosition0,
            "WINDOW_HANDLE_POSITION_90" => Command::WindowHandlePosition90,
            "WINDOW_HANDLE_POSITION_180" => Command::WindowHandlePosition180,
            "ALLOW_PAIRING" => Command::AllowPairing,
            "MANUAL_UP" => Command::ManualUp,
            "MANUAL_DOWN" => Command::ManualDown,
            "PAIR_CHANGE_DIRECTION" => Command::PairChangeDirection,
            "SET_UPPER_ENDPOINT" => Command::SetUpperEndpoint,
            "SET_LOWER_ENDPOINT" => Command::SetLowerEndpoint,
            other => return Err(Error::UnknownToken(other.to_string())),
        };

        Ok(command)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} (0x{:02X})", self.code())
    }
}

/// How many extra times the hardware repeats the radio burst for one
/// outbound command. A single hex digit on the wire, so at most 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Retries(u8);

impl Retries {
    /// Create a retry count. Values above 15 cannot be encoded.
    pub fn new(count: u8) -> Result<Self, Error> {
        if count > 0xF {
            return Err(Error::BadConfig(format!(
                "Retry count {count} does not fit a single hex digit"
            )));
        }
        Ok(Self(count))
    }

    /// The raw count.
    pub fn count(&self) -> u8 {
        self.0
    }
}

/// The remotes repeat each burst nine times; follow suit.
impl Default for Retries {
    fn default() -> Self {
        Self(9)
    }
}

impl TryFrom<u8> for Retries {
    type Error = Error;

    fn try_from(count: u8) -> Result<Self, Self::Error> {
        Self::new(count)
    }
}

impl From<Retries> for u8 {
    fn from(retries: Retries) -> Self {
        retries.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [
            0x00, 0x01, 0x02, 0x1A, 0x1B, 0x3B, 0x40, 0x41, 0x42, 0x60, 0x61, 0x62,
        ] {
            let command = Command::from_code(code).unwrap();
            assert_eq!(command.code(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(matches!(
            Command::from_code(0x03),
            Err(Error::UnknownCommand(0x03))
        ));
    }

    #[test]
    fn token_mapping_is_total_over_known_tokens() {
        assert_eq!(Command::from_token("UP").unwrap(), Command::Up);
        assert_eq!(
            Command::from_token("ALLOW_PAIRING").unwrap(),
            Command::AllowPairing
        );
        assert!(matches!(
            Command::from_token("open sesame"),
            Err(Error::UnknownToken(_))
        ));
    }

    #[test]
    fn serialized_form_matches_the_token_set() {
        for command in [
            Command::Stop,
            Command::WindowHandlePosition0,
            Command::WindowHandlePosition90,
            Command::WindowHandlePosition180,
            Command::AllowPairing,
        ] {
            let json = serde_json::to_string(&command).unwrap();
            let token = json.trim_matches('"');
            assert_eq!(Command::from_token(token).unwrap(), command);
        }

        assert_eq!(
            serde_json::to_string(&Command::WindowHandlePosition0).unwrap(),
            r#""WINDOW_HANDLE_POSITION_0""#
        );
    }

    #[test]
    fn retries_are_bounded() {
        assert_eq!(Retries::default().count(), 9);
        assert_eq!(Retries::new(0xF).unwrap().count(), 15);
        assert!(Retries::new(16).is_err());
    }
}
