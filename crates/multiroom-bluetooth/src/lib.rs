//! # multiroom-bluetooth
//!
//! BlueZ control adapter for the multiroom audio hub.
//!
//! A hub host carries several Bluetooth radios: one reserved for the BLE
//! control channel to the phone, the rest free to carry one A2DP speaker
//! each. This crate wraps BlueZ (via `bluer`, the official D-Bus client)
//! behind the [`BluetoothControl`] capability trait:
//!
//! - enumerate controllers and the devices known to each one,
//! - pair / trust / connect / disconnect / remove a device on a chosen
//!   controller,
//! - toggle discovery per controller,
//! - converge on state changes by polling device properties
//!   ([`BluetoothControl::wait_for_flag`]) rather than trusting command
//!   return codes. BlueZ replies are edge-triggered and unreliable; only
//!   the device properties reflect ground truth.
//!
//! [`Snapshot`] builds the immutable inventory (which device is paired or
//! connected on which radio) the planner consumes.
//!
//! This crate is Linux-only.

#![cfg(target_os = "linux")]

pub mod control;
pub mod controller;
pub mod error;
pub mod session;
pub mod snapshot;

pub use control::{BluetoothControl, DeviceEntry, DeviceFilter, DeviceFlag, DeviceInfo};
pub use controller::{Controller, ControllerRole, ReservedId, RESERVED_ENV};
pub use error::{BluetoothError, Result};
pub use session::BluezControl;
pub use snapshot::{Attachment, Snapshot};
