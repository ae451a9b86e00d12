use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::Error, serial::DEFAULT_BAUD};

/// Where and how to reach the microcontroller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Likely `/dev/ttyACMx` on unix, `COMx` on Windows.
    pub path: String,

    /// Baud rate of the USB stick.
    pub baud: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".into(),
            baud: DEFAULT_BAUD,
        }
    }
}

/// All protocol timings, in milliseconds.
///
/// Every blocking wait that depends on the hardware is bounded by one of
/// these; nothing in the bridge hangs indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Bound on acquiring the transmitter before a write.
    pub acquire_ms: u64,

    /// Bound on the hardware completion signal after a write.
    pub completion_ms: u64,

    /// Bound on the pairing rendezvous.
    pub pairing_ms: u64,

    /// Settle delay after a pairing wakeup, before inspecting the signal.
    pub settle_ms: u64,

    /// How long a shutter takes to travel end to end. Drives the optimistic
    /// open/closed confirmation.
    pub travel_ms: u64,

    /// Bound on each handshake reply at session start.
    pub handshake_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            acquire_ms: 10_000,
            completion_ms: 10_000,
            pairing_ms: 10_000,
            settle_ms: 1_000,
            travel_ms: 20_000,
            handshake_ms: 10_000,
        }
    }
}

impl Timing {
    /// Bound on acquiring the transmitter.
    pub fn acquire(&self) -> Duration {
        Duration::from_millis(self.acquire_ms)
    }

    /// Bound on the hardware completion signal.
    pub fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }

    /// Bound on the pairing rendezvous.
    pub fn pairing(&self) -> Duration {
        Duration::from_millis(self.pairing_ms)
    }

    /// Settle delay within the pairing rendezvous.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// End-to-end shutter travel time.
    pub fn travel(&self) -> Duration {
        Duration::from_millis(self.travel_ms)
    }

    /// Bound on each handshake reply.
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }
}

/// The configuration used for running the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// The serial port to attach to.
    pub serial: SerialSettings,

    /// Protocol timings.
    pub timing: Timing,

    /// Where to persist the device registry between sessions, if anywhere.
    pub settings_file: Option<PathBuf>,
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    /// Panics if the input is not valid .ron.
    pub fn deserialize(input: &str) -> Self {
        Self::ron().from_str::<Config>(input).unwrap()
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            serial: SerialSettings {
                path: "/dev/ttyACM0".into(),
                baud: DEFAULT_BAUD,
            },
            timing: Timing::default(),
            settings_file: Some("/data/settings.json".into()),
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap()
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Self {
        let s = std::fs::read_to_string(p).unwrap();

        Self::deserialize(&s)
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.serial.baud == 0 {
            return Err(Error::BadConfig("Baud rate cannot be zero".into()));
        }

        for (name, value) in [
            ("acquire_ms", self.timing.acquire_ms),
            ("completion_ms", self.timing.completion_ms),
            ("pairing_ms", self.timing.pairing_ms),
            ("handshake_ms", self.timing.handshake_ms),
        ] {
            if value == 0 {
                return Err(Error::BadConfig(format!(
                    "Timing `{name}` cannot be zero; hardware waits must be bounded, not skipped"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty());
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    serial: (
        path: "/dev/ttyACM1",
        baud: 9600,
    ),
    timing: (
        acquire_ms: 10000,
        completion_ms: 10000,
        pairing_ms: 10000,
        settle_ms: 1000,
        travel_ms: 20000,
        handshake_ms: 10000,
    ),
    settings_file: "/data/settings.json",
)
"#;
        let config = Config::deserialize(input);
        assert_eq!(config.serial.path, "/dev/ttyACM1");
        assert_eq!(config.timing.settle(), Duration::from_secs(1));
    }

    #[test]
    fn bad_config_zero_bound() {
        let mut c = Config::example();
        c.timing.acquire_ms = 0;

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();
        assert!(err.contains("acquire_ms"));
    }

    #[test]
    fn example_validates() {
        Config::example().validate().unwrap();
    }
}
