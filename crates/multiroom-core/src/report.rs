//! Structured results returned to the control channel.
//!
//! After an apply or disconnect run the orchestrator answers with an
//! [`ApplyReport`]: one [`EntryReport`] per requested speaker, the state of
//! the virtual sink, and the loopback modules currently owned. The JSON
//! shape is part of the contract with the phone application.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::mac::Mac;

/// The planner's decision for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// Already connected on a usable radio; leave it alone.
    NoAction,
    /// Paired on a free radio; connect without re-pairing.
    ConnectExistingPair,
    /// No usable relationship exists; pair from scratch then connect.
    PairAndConnect,
    /// Every radio is taken; this target cannot be placed.
    NoFreeController,
}

/// Final status of one target after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    /// Bluetooth-connected with audio wired.
    Connected,
    /// Nothing to do for this target (source-role devices take no wiring).
    Skipped,
    /// A pair/trust/connect step failed or timed out.
    Failed,
    /// Bluetooth-connected but the audio path could not be established.
    AudioDegraded,
    /// The planner found no free radio for this target.
    NoController,
}

/// Per-target outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryReport {
    pub name: String,
    pub action: Action,
    /// Chosen radio, or `""` when the planner found none.
    pub recommended_controller: String,
    /// Radios the device had to be detached from first.
    pub disconnect: Vec<String>,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// State of the `virtual_out` null sink.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSinkReport {
    pub present: bool,
    pub module_id: Option<u32>,
}

/// The full result of an apply or disconnect run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub entries: BTreeMap<Mac, EntryReport>,
    pub virtual_sink: VirtualSinkReport,
    /// Loopback modules owned by the orchestrator, keyed by sink name.
    pub loopbacks: BTreeMap<String, u32>,
    /// Set when the audio server was unreachable during the run. Not part
    /// of the wire contract; drives the CLI exit code.
    #[serde(skip)]
    pub audio_unavailable: bool,
}

impl ApplyReport {
    /// Exit code for the CLI wrapper: `0` on success, `4` when the audio
    /// server was unavailable.
    pub fn exit_code(&self) -> i32 {
        if self.audio_unavailable {
            4
        } else {
            0
        }
    }

    /// Whether every entry reached a live state.
    pub fn all_connected(&self) -> bool {
        self.entries
            .values()
            .all(|e| matches!(e.status, EntryStatus::Connected | EntryStatus::Skipped))
    }
}
