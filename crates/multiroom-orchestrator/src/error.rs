//! Orchestrator-level errors and CLI exit-code mapping.

use multiroom_audio::AudioError;
use multiroom_bluetooth::BluetoothError;
use multiroom_core::ConfigError;
use thiserror::Error;

/// Failures that abort an apply or disconnect run outright.
///
/// Per-target trouble never surfaces here: the executor walks every target
/// and folds failures into the report. Only global preconditions (bad
/// configuration, an empty radio pool, a daemon that cannot even be
/// inventoried) abort the run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pool is empty after excluding the reserved BLE radio.
    #[error("no usable Bluetooth controllers")]
    NoControllers,

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] BluetoothError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
}

impl Error {
    /// Exit code for the CLI wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::NoControllers => 3,
            Self::Audio(AudioError::Unavailable) => 4,
            _ => 1,
        }
    }
}

/// Convenience Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
