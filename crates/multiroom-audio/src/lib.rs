//! # multiroom-audio
//!
//! Audio routing for the multiroom hub.
//!
//! All speakers play the same program: applications write into one
//! `virtual_out` null sink, and every connected Bluetooth speaker gets a
//! loopback module forwarding `virtual_out.monitor` into its own
//! `bluez_sink.<mac>.a2dp_sink`. This crate provides:
//!
//! - [`AudioControl`]: the capability trait over the audio server's module
//!   management (load/unload, sink and module listings, suspend control),
//! - [`PactlAudio`]: the production implementation driving `pactl`,
//! - [`AudioTopology`]: ownership of the modules the hub loaded, and the
//!   reconcile/teardown/latency/volume operations over them.
//!
//! Only modules this crate loaded are ever unloaded by id; the audio server
//! is shared with other producers.

pub mod control;
pub mod error;
pub mod pactl;
pub mod topology;

pub use control::{AudioControl, ModuleInfo, SinkInfo};
pub use error::{AudioError, Result};
pub use pactl::PactlAudio;
pub use topology::{AudioTopology, DEFAULT_LATENCY_MS, VIRTUAL_SINK};
