//! The orchestrator facade: the single entry point the BLE layer calls.
//!
//! Holds the long-lived audio topology and serializes every operation
//! behind one mutex; a second apply arriving mid-run queues on the lock
//! and never interleaves, which is what the stateful Bluetooth daemon
//! requires.

use std::sync::Arc;
use std::time::Duration;

use multiroom_audio::{AudioControl, AudioTopology};
use multiroom_bluetooth::{BluetoothControl, Snapshot};
use multiroom_core::{
    Action, ApplyReport, ConfigError, Configuration, EntryReport, EntryStatus, Mac,
    VirtualSinkReport,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::planner;

/// Facade over the snapshot, plan, execute pipeline.
pub struct Orchestrator {
    bt: Arc<dyn BluetoothControl>,
    audio: Arc<dyn AudioControl>,
    topology: Mutex<AudioTopology>,
}

impl Orchestrator {
    pub fn new(bt: Arc<dyn BluetoothControl>, audio: Arc<dyn AudioControl>) -> Self {
        Self {
            bt,
            audio,
            topology: Mutex::new(AudioTopology::new()),
        }
    }

    /// Recover module ownership from a previous process, so a restarted hub
    /// can manage and tear down what it left behind.
    pub async fn adopt_existing_topology(&self) -> Result<()> {
        let mut topology = self.topology.lock().await;
        topology.adopt_existing(&*self.audio).await?;
        Ok(())
    }

    /// Bring the desired configuration live.
    pub async fn apply_configuration(&self, config: &Configuration) -> Result<ApplyReport> {
        self.apply_with_deadline(config, None).await
    }

    /// Like [`Orchestrator::apply_configuration`], aborting cleanly at the
    /// next polling point once `budget` has elapsed.
    pub async fn apply_with_deadline(
        &self,
        config: &Configuration,
        budget: Option<Duration>,
    ) -> Result<ApplyReport> {
        let mut topology = self.topology.lock().await;

        if config.targets.is_empty() {
            return Err(ConfigError::NoSpeakers.into());
        }
        info!(
            "applying configuration {:?} ({:?}): {} target(s)",
            config.config_id,
            config.config_name,
            config.targets.len()
        );

        let snapshot = Snapshot::take(&*self.bt).await?;
        if snapshot.audio_pool().is_empty() {
            return Err(Error::NoControllers);
        }

        let plan = planner::plan(&config.targets, &snapshot);
        let outcome = Executor::new(&*self.bt, &*self.audio, &mut topology)
            .with_deadline(budget)
            .run(&plan, config)
            .await;

        let report = ApplyReport {
            entries: outcome.entries,
            virtual_sink: VirtualSinkReport {
                present: topology.virtual_sink().is_some(),
                module_id: topology.virtual_sink(),
            },
            loopbacks: topology.loopbacks(),
            audio_unavailable: outcome.audio_unavailable,
        };
        info!(
            "configuration {:?} applied: {} entr(ies), audio unavailable: {}",
            config.config_id,
            report.entries.len(),
            report.audio_unavailable
        );
        Ok(report)
    }

    /// Take the configuration down: detach every member from every radio in
    /// the pool and unload the audio modules that routed them.
    pub async fn disconnect_configuration(&self, config: &Configuration) -> Result<ApplyReport> {
        let mut topology = self.topology.lock().await;

        info!(
            "disconnecting configuration {:?} ({:?})",
            config.config_id, config.config_name
        );
        let snapshot = Snapshot::take(&*self.bt).await?;

        for target in &config.targets {
            for ctrl in snapshot.connected_on(&target.mac) {
                info!("disconnecting {} from {ctrl}", target.mac);
                if let Err(e) = self.bt.disconnect(&ctrl, &target.mac).await {
                    warn!("disconnect of {} from {ctrl} failed: {e}", target.mac);
                }
            }
            if let Err(e) = topology.unwire_speaker(&*self.audio, &target.mac).await {
                warn!("could not unwire {}: {e}", target.mac);
            }
        }

        topology.teardown(&*self.audio).await?;

        let mut report = ApplyReport::default();
        for target in &config.targets {
            report.entries.insert(
                target.mac.clone(),
                EntryReport {
                    name: target.name.clone(),
                    action: Action::NoAction,
                    recommended_controller: String::new(),
                    disconnect: snapshot
                        .connected_on(&target.mac)
                        .iter()
                        .map(|m| m.to_string())
                        .collect(),
                    status: EntryStatus::Skipped,
                    reason: Some("disconnected".to_string()),
                },
            );
        }
        Ok(report)
    }

    /// Set one speaker's volume (a direct sink poke, no module reload).
    pub async fn set_speaker_volume(&self, mac: &Mac, percent: u32) -> Result<()> {
        let topology = self.topology.lock().await;
        topology.set_volume(&*self.audio, mac, percent).await?;
        Ok(())
    }

    /// Change one speaker's loopback latency. Reloads the module, briefly
    /// dropping audio for that speaker.
    pub async fn set_speaker_latency(&self, mac: &Mac, latency_ms: u64) -> Result<()> {
        let mut topology = self.topology.lock().await;
        topology.set_latency(&*self.audio, mac, latency_ms).await?;
        Ok(())
    }
}
