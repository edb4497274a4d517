//! Controller (radio) identity and the reserved-controller rule.

use std::env;
use std::fmt;

use multiroom_core::Mac;

use crate::error::{BluetoothError, Result};

/// Environment variable naming the radio dedicated to the BLE control
/// channel. Accepts an adapter name (`hci0`) or a controller MAC.
pub const RESERVED_ENV: &str = "RESERVED_HCI";

/// What a radio is allowed to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerRole {
    /// Dedicated to the phone-facing BLE channel; never used for speakers.
    ReservedBle,
    /// Free to carry one A2DP speaker.
    Audio,
}

/// One Bluetooth host radio.
#[derive(Debug, Clone)]
pub struct Controller {
    pub mac: Mac,
    /// Kernel adapter name (`hci0`, `hci1`, ...).
    pub adapter: String,
    /// Friendly name as reported by the daemon.
    pub alias: String,
    pub role: ControllerRole,
}

impl Controller {
    pub fn is_reserved(&self) -> bool {
        self.role == ControllerRole::ReservedBle
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.adapter, self.mac)
    }
}

/// Identity of the reserved controller, as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservedId {
    /// Matched against the kernel adapter name.
    Adapter(String),
    /// Matched against the controller MAC.
    Address(Mac),
}

impl ReservedId {
    /// Parse either form: a MAC is recognized by shape, anything else is
    /// treated as an adapter name.
    pub fn parse(s: &str) -> Self {
        match Mac::parse(s) {
            Ok(mac) => Self::Address(mac),
            Err(_) => Self::Adapter(s.trim().to_string()),
        }
    }

    /// Read the reserved controller from [`RESERVED_ENV`].
    pub fn from_env() -> Result<Self> {
        match env::var(RESERVED_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(Self::parse(&value)),
            _ => Err(BluetoothError::Transport(format!(
                "{RESERVED_ENV} not set: cannot tell the BLE radio apart from the speaker radios"
            ))),
        }
    }

    /// Does this identity match the given radio?
    pub fn matches(&self, adapter_name: &str, mac: &Mac) -> bool {
        match self {
            Self::Adapter(name) => name == adapter_name,
            Self::Address(addr) => addr == mac,
        }
    }
}
