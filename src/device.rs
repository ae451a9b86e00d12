use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The 24-bit identity of a sender transceiver, globally unique.
///
/// Canonical form is six uppercase hex digits, which is also how it is
/// rendered on the wire and in persisted state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a device id. Only 24 bits are available.
    pub fn new(id: u32) -> Result<Self, Error> {
        if id > 0xFF_FFFF {
            return Err(Error::BadConfig(format!(
                "Device id 0x{id:X} exceeds 24 bits"
            )));
        }
        Ok(Self(id))
    }

    /// The raw 24-bit value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = u32::from_str_radix(s, 16)
            .map_err(|_| Error::BadConfig(format!("`{s}` is not a hex device id")))?;
        Self::new(id)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// The 8-bit identity of a receiver device, unique within one sender.
///
/// Rendered as two uppercase hex digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Enumerator(u8);

impl Enumerator {
    /// Create an enumerator.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw 8-bit value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Display for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl FromStr for Enumerator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = u8::from_str_radix(s, 16)
            .map_err(|_| Error::BadConfig(format!("`{s}` is not a hex enumerator")))?;
        Ok(Self(value))
    }
}

impl TryFrom<String> for Enumerator {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Enumerator> for String {
    fn from(enumerator: Enumerator) -> Self {
        enumerator.to_string()
    }
}

/// A receiver device paired to some sender.
///
/// Identity is the enumerator alone; the name is decoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// The receiver's enumerator within its owning sender.
    pub enumerator: Enumerator,

    /// An optional display name.
    pub name: Option<String>,
}

impl Device {
    /// A device with no name yet.
    pub fn unnamed(enumerator: Enumerator) -> Self {
        Self {
            enumerator,
            name: None,
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.enumerator),
            None => write!(f, "{}", self.enumerator),
        }
    }
}

/// A sender transceiver: either the one attached to this host ("self") or a
/// remote heard over the air.
///
/// Identity is the device id alone. Paired devices are keyed by enumerator,
/// which makes the per-sender uniqueness invariant structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderDevice {
    /// The sender's 24-bit id.
    pub device_id: DeviceId,

    /// An optional display name.
    pub name: Option<String>,

    /// The receiver devices paired to this sender.
    pub devices: BTreeMap<Enumerator, Device>,
}

impl SenderDevice {
    /// A fresh sender with nothing paired.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            name: None,
            devices: BTreeMap::new(),
        }
    }

    /// Look up a paired device.
    pub fn device(&self, enumerator: Enumerator) -> Option<&Device> {
        self.devices.get(&enumerator)
    }
}

impl Display for SenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.device_id),
            None => write!(f, "{}", self.device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_24_bits() {
        assert!(DeviceId::new(0xFF_FFFF).is_ok());
        assert!(DeviceId::new(0x100_0000).is_err());
    }

    #[test]
    fn canonical_hex_forms() {
        let id: DeviceId = "ABCDEF".parse().unwrap();
        assert_eq!(id.to_string(), "ABCDEF");

        let id: DeviceId = "2a".parse().unwrap();
        assert_eq!(id.to_string(), "00002A");

        let e: Enumerator = "de".parse().unwrap();
        assert_eq!(e.to_string(), "DE");
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!("not-hex".parse::<DeviceId>().is_err());
        assert!("1234567".parse::<DeviceId>().is_err());
    }
}
