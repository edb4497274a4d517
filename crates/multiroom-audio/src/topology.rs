//! Ownership of the hub's audio routing topology.
//!
//! The topology is one `virtual_out` null sink plus one loopback per live
//! speaker, each tracked by the module id the server handed back. The
//! struct outlives a single apply call: reconciling twice with no state
//! change is a no-op, and a teardown removes exactly the modules the hub
//! loaded.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use multiroom_core::Mac;
use tracing::{debug, info, warn};

use crate::control::{AudioControl, ModuleInfo};
use crate::error::{AudioError, Result};

pub use multiroom_core::config::DEFAULT_LATENCY_MS;

/// Name of the combined output every application writes into.
pub const VIRTUAL_SINK: &str = "virtual_out";

/// How long to wait for a speaker's BlueZ sink to appear after connect.
const SINK_WAIT: Duration = Duration::from_secs(20);

/// Cadence of sink-appearance polling.
const SINK_POLL: Duration = Duration::from_secs(1);

/// One owned loopback.
#[derive(Debug, Clone)]
struct Loopback {
    sink: String,
    module: u32,
    latency_ms: u64,
}

/// The modules the hub currently owns.
#[derive(Debug, Default)]
pub struct AudioTopology {
    virtual_sink: Option<u32>,
    loopbacks: HashMap<Mac, Loopback>,
}

/// Extract a `key=value` argument from a module argument string.
fn arg_value<'a>(args: &'a str, key: &str) -> Option<&'a str> {
    args.split_whitespace()
        .find_map(|token| token.strip_prefix(key)?.strip_prefix('='))
}

/// Is this module a loopback feeding the given sink?
fn is_loopback_into(module: &ModuleInfo, sink: &str) -> bool {
    module.name == "module-loopback" && arg_value(&module.args, "sink") == Some(sink)
}

impl AudioTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module id of the virtual sink, if the hub owns one.
    pub fn virtual_sink(&self) -> Option<u32> {
        self.virtual_sink
    }

    /// Owned loopbacks keyed by sink name, for reporting.
    pub fn loopbacks(&self) -> BTreeMap<String, u32> {
        self.loopbacks
            .values()
            .map(|l| (l.sink.clone(), l.module))
            .collect()
    }

    /// The loopback module currently wired for a speaker, if any.
    pub fn loopback_for(&self, mac: &Mac) -> Option<u32> {
        self.loopbacks.get(mac).map(|l| l.module)
    }

    /// Make sure the virtual sink exists, loading it if needed.
    ///
    /// Idempotent: an already-loaded `virtual_out` (ours or left over from a
    /// previous run) is adopted instead of duplicated.
    pub async fn ensure_virtual_sink(&mut self, audio: &dyn AudioControl) -> Result<u32> {
        if let Some(id) = self.virtual_sink {
            return Ok(id);
        }
        let sink_name_arg = format!("sink_name={VIRTUAL_SINK}");
        for module in audio.list_modules().await? {
            if module.name == "module-null-sink" && module.args.contains(&sink_name_arg) {
                info!("adopting existing virtual sink, module {}", module.id);
                self.virtual_sink = Some(module.id);
                return Ok(module.id);
            }
        }
        let id = audio.load_null_sink(VIRTUAL_SINK).await?;
        info!("loaded virtual sink, module {id}");
        self.virtual_sink = Some(id);
        Ok(id)
    }

    /// Wire one speaker: wait for its BlueZ sink to appear, clear any stale
    /// loopback into it, then load a fresh one.
    pub async fn wire_speaker(
        &mut self,
        audio: &dyn AudioControl,
        mac: &Mac,
        latency_ms: u64,
    ) -> Result<u32> {
        let sink = mac.sink_name();
        self.wait_for_sink(audio, &sink).await?;

        // Re-applying an unchanged configuration keeps the existing module.
        if let Some(existing) = self.loopbacks.get(mac) {
            if existing.latency_ms == latency_ms {
                let still_loaded = audio
                    .list_modules()
                    .await?
                    .iter()
                    .any(|m| m.id == existing.module);
                if still_loaded {
                    debug!("loopback {} for {mac} already wired", existing.module);
                    return Ok(existing.module);
                }
            }
        }

        // A loopback into this sink from a previous run would double-route.
        let stale = audio
            .unload_all_matching(&|m: &ModuleInfo| is_loopback_into(m, &sink))
            .await?;
        if stale > 0 {
            debug!("cleared {stale} stale loopback(s) into {sink}");
        }
        self.loopbacks.remove(mac);

        let source = format!("{VIRTUAL_SINK}.monitor");
        let module = audio.load_loopback(&source, &sink, latency_ms).await?;
        info!("loopback {module} wired: {source} -> {sink} ({latency_ms} ms)");
        self.loopbacks.insert(
            mac.clone(),
            Loopback {
                sink,
                module,
                latency_ms,
            },
        );
        Ok(module)
    }

    /// Remove a speaker's loopback, owned or left over.
    pub async fn unwire_speaker(&mut self, audio: &dyn AudioControl, mac: &Mac) -> Result<()> {
        let sink = mac.sink_name();
        if let Some(loopback) = self.loopbacks.remove(mac) {
            info!("unloading loopback {} for {mac}", loopback.module);
            if let Err(e) = audio.unload_module(loopback.module).await {
                warn!("could not unload loopback {}: {e}", loopback.module);
            }
        }
        audio
            .unload_all_matching(&|m: &ModuleInfo| is_loopback_into(m, &sink))
            .await?;
        Ok(())
    }

    /// Change a speaker's loopback latency by reloading its module.
    ///
    /// Briefly drops audio for that speaker while the module cycles.
    pub async fn set_latency(
        &mut self,
        audio: &dyn AudioControl,
        mac: &Mac,
        latency_ms: u64,
    ) -> Result<u32> {
        if let Some(loopback) = self.loopbacks.get(mac) {
            if loopback.latency_ms == latency_ms {
                return Ok(loopback.module);
            }
        }
        self.unwire_speaker(audio, mac).await?;
        self.wire_speaker(audio, mac, latency_ms).await
    }

    /// Set a speaker's sink volume.
    pub async fn set_volume(&self, audio: &dyn AudioControl, mac: &Mac, percent: u32) -> Result<()> {
        audio.set_sink_volume(&mac.sink_name(), percent).await
    }

    /// Kick every sink out of suspend and drop idle-suspend modules, which
    /// would otherwise re-suspend quiet speakers mid-session.
    pub async fn unsuspend_all(&self, audio: &dyn AudioControl) -> Result<()> {
        for sink in audio.list_sinks().await? {
            if let Err(e) = audio.unsuspend_sink(&sink.name).await {
                warn!("could not unsuspend {}: {e}", sink.name);
            }
        }
        audio
            .unload_all_matching(&|m: &ModuleInfo| m.name == "module-suspend-on-idle")
            .await?;
        Ok(())
    }

    /// Rebuild ownership from the server's module list.
    ///
    /// Recovers loopbacks and the virtual sink loaded by a previous process
    /// so a restart can manage (and eventually tear down) what it left
    /// behind.
    pub async fn adopt_existing(&mut self, audio: &dyn AudioControl) -> Result<()> {
        let sink_name_arg = format!("sink_name={VIRTUAL_SINK}");
        let monitor = format!("{VIRTUAL_SINK}.monitor");
        for module in audio.list_modules().await? {
            if module.name == "module-null-sink" && module.args.contains(&sink_name_arg) {
                self.virtual_sink = Some(module.id);
            } else if module.name == "module-loopback"
                && arg_value(&module.args, "source") == Some(monitor.as_str())
            {
                let Some(sink) = arg_value(&module.args, "sink") else {
                    continue;
                };
                let Some(mac) = Mac::from_sink_name(sink) else {
                    continue;
                };
                let latency_ms = arg_value(&module.args, "latency_msec")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_LATENCY_MS);
                self.loopbacks.insert(
                    mac,
                    Loopback {
                        sink: sink.to_string(),
                        module: module.id,
                        latency_ms,
                    },
                );
            }
        }
        info!(
            "adopted topology: virtual sink {:?}, {} loopback(s)",
            self.virtual_sink,
            self.loopbacks.len()
        );
        Ok(())
    }

    /// Unload everything the hub owns: all loopbacks, then the virtual sink.
    pub async fn teardown(&mut self, audio: &dyn AudioControl) -> Result<()> {
        let macs: Vec<Mac> = self.loopbacks.keys().cloned().collect();
        for mac in macs {
            self.unwire_speaker(audio, &mac).await?;
        }
        if let Some(id) = self.virtual_sink.take() {
            info!("unloading virtual sink, module {id}");
            if let Err(e) = audio.unload_module(id).await {
                warn!("could not unload virtual sink {id}: {e}");
            }
        }
        Ok(())
    }

    async fn wait_for_sink(&self, audio: &dyn AudioControl, sink: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + SINK_WAIT;
        loop {
            if audio.list_sinks().await?.iter().any(|s| s.name == sink) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AudioError::SinkMissing {
                    sink: sink.to_string(),
                });
            }
            debug!("waiting for sink {sink} to appear");
            tokio::time::sleep(SINK_POLL).await;
        }
    }
}
