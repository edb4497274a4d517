//! Error types for Bluetooth operations.

use thiserror::Error;

/// Bluetooth operation failures.
///
/// `Timeout` from a convergence wait is not fatal by itself; callers decide
/// whether a slow device fails the whole run or just one target.
#[derive(Error, Debug)]
pub enum BluetoothError {
    /// Controller or device unknown to the daemon.
    #[error("not found: {0}")]
    NotFound(String),

    /// The daemon is already performing a conflicting operation.
    #[error("busy: {0}")]
    Busy(String),

    /// D-Bus or daemon-level failure.
    #[error("bluetooth transport error: {0}")]
    Transport(String),

    /// A convergence wait expired before the property flipped.
    #[error("operation timed out")]
    Timeout,
}

impl From<bluer::Error> for BluetoothError {
    fn from(e: bluer::Error) -> Self {
        match e.kind {
            bluer::ErrorKind::DoesNotExist => Self::NotFound(e.message),
            bluer::ErrorKind::InProgress => Self::Busy(e.message),
            _ => Self::Transport(e.to_string()),
        }
    }
}

/// Convenience Result type for Bluetooth operations.
pub type Result<T> = std::result::Result<T, BluetoothError>;
