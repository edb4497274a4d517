//! Speaker configurations submitted by the control channel.
//!
//! The phone's control channel sends a JSON document naming the speakers
//! that should be playing, keyed by MAC, with optional per-speaker settings:
//!
//! ```json
//! {
//!   "configId": "cfg-42",
//!   "configName": "Living room",
//!   "speakers": { "98:52:3D:A3:C4:1B": "Kitchen speaker" },
//!   "settings": { "98:52:3D:A3:C4:1B": { "volume": 60, "latencyMs": 150 } }
//! }
//! ```
//!
//! [`ConfigurationInput`] mirrors that wire shape; [`Configuration`] is the
//! validated form the orchestrator consumes. JSON objects carry no order, so
//! targets are ordered by ascending MAC to keep planning deterministic.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mac::Mac;

/// Default loopback latency applied when a speaker carries no setting.
pub const DEFAULT_LATENCY_MS: u64 = 100;

/// Whether a target consumes audio (a speaker) or produces it.
///
/// Source-role devices are never wrapped in a loopback; they exist in a
/// configuration so the planner still reserves a radio for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    #[default]
    Sink,
    Source,
}

/// Per-speaker settings as sent on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerSettings {
    pub volume: Option<u32>,
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub role: Option<TargetRole>,
}

/// The raw wire shape of a configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationInput {
    #[serde(default)]
    pub config_id: String,
    #[serde(default)]
    pub config_name: String,
    pub speakers: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: BTreeMap<String, SpeakerSettings>,
}

/// One desired speaker.
#[derive(Debug, Clone)]
pub struct Target {
    pub mac: Mac,
    pub name: String,
    pub volume: Option<u32>,
    pub latency_ms: u64,
    pub role: TargetRole,
}

/// A validated, deterministically ordered set of targets.
///
/// `config_id` and `config_name` are opaque and used for logging only.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub config_id: String,
    pub config_name: String,
    pub targets: Vec<Target>,
}

impl Configuration {
    /// Validate a wire-shape input into a [`Configuration`].
    pub fn from_input(input: ConfigurationInput) -> Result<Self, ConfigError> {
        if input.speakers.is_empty() {
            return Err(ConfigError::NoSpeakers);
        }

        let mut targets = Vec::with_capacity(input.speakers.len());
        for (mac_str, name) in &input.speakers {
            let mac = Mac::parse(mac_str)?;
            let settings = input.settings.get(mac_str).cloned().unwrap_or_default();
            if let Some(volume) = settings.volume {
                if volume > 100 {
                    return Err(ConfigError::InvalidVolume {
                        mac: mac.to_string(),
                        volume,
                    });
                }
            }
            targets.push(Target {
                mac,
                name: name.clone(),
                volume: settings.volume,
                latency_ms: settings.latency_ms.unwrap_or(DEFAULT_LATENCY_MS),
                role: settings.role.unwrap_or_default(),
            });
        }
        // BTreeMap iteration already yields ascending MAC strings; the sort
        // keeps the ordering contract even if the source map changes.
        targets.sort_by(|a, b| a.mac.cmp(&b.mac));

        Ok(Self {
            config_id: input.config_id,
            config_name: input.config_name,
            targets,
        })
    }

    /// Look up a target by device address.
    pub fn target(&self, mac: &Mac) -> Option<&Target> {
        self.targets.iter().find(|t| &t.mac == mac)
    }
}
