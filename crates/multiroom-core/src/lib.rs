//! # multiroom-core
//!
//! Shared data model for the multiroom audio hub: canonical MAC addresses,
//! the configuration a control channel submits (which speakers should play,
//! with what volume and latency), and the structured report returned after
//! an apply or disconnect run.
//!
//! This crate is pure data; no daemon I/O lives here.

pub mod config;
pub mod error;
pub mod mac;
pub mod report;

pub use config::{Configuration, ConfigurationInput, SpeakerSettings, Target, TargetRole};
pub use error::ConfigError;
pub use mac::Mac;
pub use report::{Action, ApplyReport, EntryReport, EntryStatus, VirtualSinkReport};
