//! # multiroom-orchestrator
//!
//! The connection orchestrator: given a desired set of speakers and a pool
//! of Bluetooth radios, plan and execute the pair/trust/connect/disconnect
//! sequence so that every targeted speaker ends up connected on exactly one
//! radio, then mirror the connection state into the audio topology (one
//! virtual sink, one loopback per live speaker).
//!
//! The flow per apply call:
//!
//! 1. [`Snapshot`](multiroom_bluetooth::Snapshot): inventory every radio.
//! 2. [`planner::plan`]: a pure decision, per target an action and a radio.
//! 3. [`Executor`]: drive the daemons: break stale attachments, run
//!    per-target actions, reconcile audio routing.
//!
//! [`Orchestrator`] is the single entry point the BLE control layer calls;
//! its two operations are serialized by a mutex, never interleaved.

pub mod error;
pub mod executor;
pub mod gameplan;
pub mod orchestrator;
pub mod planner;

pub use error::{Error, Result};
pub use executor::Executor;
pub use gameplan::{Gameplan, PlanEntry};
pub use orchestrator::Orchestrator;
