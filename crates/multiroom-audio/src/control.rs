//! The audio server capability trait.
//!
//! Mirrors the module-management contract of a PulseAudio-class server:
//! load/unload modules by short name, enumerate sinks and modules, poke
//! suspend state and volume. Readiness is *command plus poll*, like the
//! Bluetooth side: [`AudioControl::ensure_running`] polls
//! [`AudioControl::ping`] until the server answers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{AudioError, Result};

/// Cadence of readiness polling.
pub const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Default budget for [`AudioControl::ensure_running`].
pub const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// One sink as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    pub id: u32,
    pub name: String,
    /// Server-reported state (`RUNNING`, `IDLE`, `SUSPENDED`).
    pub state: String,
}

/// One loaded module as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: u32,
    pub name: String,
    /// The raw argument string the module was loaded with.
    pub args: String,
}

/// Capability interface over the audio server.
#[async_trait]
pub trait AudioControl: Send + Sync {
    /// `true` iff the server answers at all.
    async fn ping(&self) -> bool;

    /// Load a null sink with the given name; returns the module id.
    async fn load_null_sink(&self, name: &str) -> Result<u32>;

    /// Load a loopback from a monitor source into a sink. Implementations
    /// retry internally; an error means every attempt produced a
    /// non-numeric result.
    async fn load_loopback(&self, source: &str, sink: &str, latency_ms: u64) -> Result<u32>;

    async fn unload_module(&self, id: u32) -> Result<()>;

    async fn list_sinks(&self) -> Result<Vec<SinkInfo>>;

    async fn list_modules(&self) -> Result<Vec<ModuleInfo>>;

    /// Kick a sink out of suspend.
    async fn unsuspend_sink(&self, name: &str) -> Result<()>;

    /// Set a sink's volume as a percentage (0..=100).
    async fn set_sink_volume(&self, name: &str, percent: u32) -> Result<()>;

    /// Poll [`AudioControl::ping`] every [`PING_INTERVAL`] until the server
    /// answers or `timeout` expires.
    async fn ensure_running(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.ping().await {
                debug!("audio server is responsive");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AudioError::Unavailable);
            }
            debug!("audio server not ready, polling again");
            tokio::time::sleep(PING_INTERVAL).await;
        }
    }

    /// Unload every module the predicate matches; returns how many went.
    async fn unload_all_matching(
        &self,
        pred: &(dyn for<'a> Fn(&'a ModuleInfo) -> bool + Send + Sync),
    ) -> Result<usize> {
        let mut unloaded = 0;
        for module in self.list_modules().await? {
            if pred(&module) {
                info!("unloading module {} ({})", module.id, module.name);
                self.unload_module(module.id).await?;
                unloaded += 1;
            }
        }
        Ok(unloaded)
    }
}
