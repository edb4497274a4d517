//! Canonical Bluetooth MAC address handling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A Bluetooth MAC address in canonical colon-separated uppercase hex form
/// (`AA:BB:CC:DD:EE:FF`).
///
/// Both controllers (radios) and remote devices are identified by one of
/// these. Parsing normalizes case so addresses compare reliably regardless
/// of how the control channel spelled them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(String);

impl Mac {
    /// Parse and normalize a MAC address string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let candidate = s.trim().to_uppercase();
        let octets: Vec<&str> = candidate.split(':').collect();
        if octets.len() != 6
            || octets
                .iter()
                .any(|o| o.len() != 2 || !o.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(ConfigError::InvalidMac(s.to_string()));
        }
        Ok(Self(candidate))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The PulseAudio sink name BlueZ gives a connected A2DP speaker:
    /// `bluez_sink.<MAC_with_underscores>.a2dp_sink`.
    pub fn sink_name(&self) -> String {
        format!("bluez_sink.{}.a2dp_sink", self.0.replace(':', "_"))
    }

    /// Recover the address from a sink name produced by [`Mac::sink_name`].
    pub fn from_sink_name(sink: &str) -> Option<Self> {
        let inner = sink.strip_prefix("bluez_sink.")?.strip_suffix(".a2dp_sink")?;
        Self::parse(&inner.replace('_', ":")).ok()
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Mac {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Mac {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Mac> for String {
    fn from(mac: Mac) -> Self {
        mac.0
    }
}
