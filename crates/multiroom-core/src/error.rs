//! Configuration validation errors.

use thiserror::Error;

/// Errors produced while validating a configuration submitted by the
/// control channel.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration names no speakers at all.
    #[error("configuration contains no speakers")]
    NoSpeakers,

    /// A MAC address was not in canonical colon-separated hex form.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// A volume outside 0..=100 was supplied.
    #[error("invalid volume {volume} for {mac}: must be 0..=100")]
    InvalidVolume { mac: String, volume: u32 },
}
