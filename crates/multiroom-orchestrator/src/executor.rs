//! The executor: drive a gameplan through the daemons.
//!
//! Three fixed phases, strictly ordered:
//!
//! - **Phase A** breaks every stale attachment. All disconnects complete
//!   before any connect begins.
//! - **Phase B** runs per-target actions, linearized in gameplan order. Each
//!   long step converges by polling device properties, never by trusting a
//!   command's return code.
//! - **Phase C** reconciles the audio topology, strictly after the
//!   Bluetooth work: a loopback must not be attempted before the speaker's
//!   sink exists.
//!
//! One target's failure never blocks another: every target is walked and
//! trouble folds into its report entry. A caller deadline aborts cleanly at
//! the next polling point; whatever completed is reported as-is.

use std::collections::BTreeMap;
use std::time::Duration;

use multiroom_audio::control::READY_TIMEOUT;
use multiroom_audio::{AudioControl, AudioTopology};
use multiroom_bluetooth::control::WAIT_TIMEOUT;
use multiroom_bluetooth::{BluetoothControl, BluetoothError, DeviceFilter, DeviceFlag};
use multiroom_core::{
    config::DEFAULT_LATENCY_MS, Action, Configuration, EntryReport, EntryStatus, Mac, TargetRole,
};
use tracing::{debug, info, warn};

use crate::gameplan::{Gameplan, PlanEntry};

/// How long discovery gets to surface a device after `scan on`.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(10);

/// How long a broken attachment gets to read back as disconnected.
const DISCONNECT_SETTLE: Duration = Duration::from_secs(5);

/// Cadence of the executor's own convergence polls.
const POLL: Duration = Duration::from_secs(1);

/// Per-target execution states, for tracing the pairing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    Pairing,
    Paired,
    Trusting,
    Trusted,
    Connecting,
    Connected,
}

/// Per-target result accumulated across the phases.
struct TargetRun {
    status: EntryStatus,
    reason: Option<String>,
    /// Ground truth after Phase B: the device answered as connected.
    bt_connected: bool,
}

/// What the executor hands back to the facade.
pub struct ExecutionOutcome {
    pub entries: BTreeMap<Mac, EntryReport>,
    pub audio_unavailable: bool,
}

/// Applies one [`Gameplan`] through the Bluetooth and audio backends.
pub struct Executor<'a> {
    bt: &'a dyn BluetoothControl,
    audio: &'a dyn AudioControl,
    topology: &'a mut AudioTopology,
    deadline: Option<tokio::time::Instant>,
}

impl<'a> Executor<'a> {
    pub fn new(
        bt: &'a dyn BluetoothControl,
        audio: &'a dyn AudioControl,
        topology: &'a mut AudioTopology,
    ) -> Self {
        Self {
            bt,
            audio,
            topology,
            deadline: None,
        }
    }

    /// Abort cleanly at the next polling point once this much time passed.
    pub fn with_deadline(mut self, budget: Option<Duration>) -> Self {
        self.deadline = budget.map(|d| tokio::time::Instant::now() + d);
        self
    }

    fn expired(&self) -> bool {
        self.deadline
            .map(|d| tokio::time::Instant::now() >= d)
            .unwrap_or(false)
    }

    /// Run all three phases and report per-target outcomes.
    pub async fn run(&mut self, plan: &Gameplan, config: &Configuration) -> ExecutionOutcome {
        self.break_stale_attachments(plan).await;

        let mut runs: BTreeMap<Mac, TargetRun> = BTreeMap::new();
        for entry in &plan.entries {
            let role = config
                .target(&entry.mac)
                .map(|t| t.role)
                .unwrap_or_default();
            let run = if self.expired() {
                warn!("deadline reached, not starting {}", entry.mac);
                TargetRun {
                    status: EntryStatus::Failed,
                    reason: Some("aborted by deadline".to_string()),
                    bt_connected: false,
                }
            } else {
                self.run_target(entry, role).await
            };
            runs.insert(entry.mac.clone(), run);
        }

        let audio_unavailable = self.reconcile_audio(plan, config, &mut runs).await;

        let entries = plan
            .entries
            .iter()
            .map(|entry| {
                let run = &runs[&entry.mac];
                (
                    entry.mac.clone(),
                    EntryReport {
                        name: entry.name.clone(),
                        action: entry.action,
                        recommended_controller: entry
                            .recommended
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_default(),
                        disconnect: entry.disconnect.iter().map(|m| m.to_string()).collect(),
                        status: run.status,
                        reason: run.reason.clone(),
                    },
                )
            })
            .collect();

        ExecutionOutcome {
            entries,
            audio_unavailable,
        }
    }

    // --- Phase A ---

    async fn break_stale_attachments(&self, plan: &Gameplan) {
        for entry in &plan.entries {
            for ctrl in &entry.disconnect {
                if self.expired() {
                    warn!("deadline reached during disconnect phase");
                    return;
                }
                info!("breaking stale attachment: {} on {ctrl}", entry.mac);
                match self.bt.disconnect(ctrl, &entry.mac).await {
                    Ok(()) => self.settle_disconnect(ctrl, &entry.mac).await,
                    // Non-fatal: a failed break leaves a duplicate route at
                    // worst, and the daemon may clear it on connect.
                    Err(e) => warn!("disconnect of {} from {ctrl} failed: {e}", entry.mac),
                }
            }
        }
    }

    /// Poll until the daemon stops reporting the device as connected.
    async fn settle_disconnect(&self, ctrl: &Mac, mac: &Mac) {
        let deadline = tokio::time::Instant::now() + DISCONNECT_SETTLE;
        loop {
            match self.bt.device_info(ctrl, mac).await {
                Ok(info) if !info.connected => return,
                Err(_) => return,
                Ok(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("{mac} still reads as connected on {ctrl} after disconnect");
                return;
            }
            tokio::time::sleep(POLL).await;
        }
    }

    // --- Phase B ---

    async fn run_target(&self, entry: &PlanEntry, role: TargetRole) -> TargetRun {
        let outcome = match (entry.action, &entry.recommended) {
            (Action::NoFreeController, _) | (_, None) => {
                warn!("{} ({}): no free controller", entry.name, entry.mac);
                return TargetRun {
                    status: EntryStatus::NoController,
                    reason: Some("no free controller".to_string()),
                    bt_connected: false,
                };
            }
            (Action::NoAction, Some(ctrl)) => {
                info!("{} ({}): already connected on {ctrl}", entry.name, entry.mac);
                if self.verify_connected(ctrl, &entry.mac).await {
                    Ok(Some("already connected".to_string()))
                } else {
                    Err("no longer connected".to_string())
                }
            }
            (Action::ConnectExistingPair, Some(ctrl)) => {
                info!("{} ({}): connecting existing pair via {ctrl}", entry.name, entry.mac);
                self.connect_existing(ctrl, &entry.mac).await.map(|_| None)
            }
            (Action::PairAndConnect, Some(ctrl)) => {
                info!("{} ({}): pairing fresh via {ctrl}", entry.name, entry.mac);
                self.with_scan(ctrl, self.pair_and_connect(ctrl, &entry.mac))
                    .await
                    .map(|_| None)
            }
        };

        match outcome {
            Ok(reason) => match role {
                TargetRole::Sink => TargetRun {
                    status: EntryStatus::Connected,
                    reason,
                    bt_connected: true,
                },
                TargetRole::Source => TargetRun {
                    status: EntryStatus::Skipped,
                    reason: Some("source device, no audio wiring".to_string()),
                    bt_connected: true,
                },
            },
            Err(reason) => {
                warn!("{} ({}): {reason}", entry.name, entry.mac);
                TargetRun {
                    status: EntryStatus::Failed,
                    reason: Some(reason),
                    bt_connected: false,
                }
            }
        }
    }

    /// Run the whole pairing pipeline with discovery enabled on `ctrl`,
    /// turning it off only at the end. Scan toggling trouble is logged,
    /// never fatal.
    async fn with_scan<F>(&self, ctrl: &Mac, work: F) -> Result<(), String>
    where
        F: std::future::Future<Output = Result<(), String>>,
    {
        if let Err(e) = self.bt.set_scan(ctrl, true).await {
            warn!("could not start discovery on {ctrl}: {e}");
        }
        let result = work.await;
        if let Err(e) = self.bt.set_scan(ctrl, false).await {
            warn!("could not stop discovery on {ctrl}: {e}");
        }
        result
    }

    async fn connect_existing(&self, ctrl: &Mac, mac: &Mac) -> Result<(), String> {
        // Narrow scan window: a rebooted speaker gets a moment to reappear,
        // then discovery goes off again before the connect itself.
        if let Err(e) = self.bt.set_scan(ctrl, true).await {
            warn!("could not start discovery on {ctrl}: {e}");
        }
        let _ = self.wait_until_known(ctrl, mac, DISCOVERY_WINDOW).await;
        if let Err(e) = self.bt.set_scan(ctrl, false).await {
            warn!("could not stop discovery on {ctrl}: {e}");
        }

        self.bt
            .connect(ctrl, mac)
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        self.await_flag(ctrl, mac, DeviceFlag::Connected, "connect").await?;

        if self.verify_connected(ctrl, mac).await {
            Ok(())
        } else {
            Err("device did not appear as connected".to_string())
        }
    }

    async fn pair_and_connect(&self, ctrl: &Mac, mac: &Mac) -> Result<(), String> {
        let mut state = TargetState::Pairing;
        debug!("{mac}: {state:?}");

        if self.wait_until_known(ctrl, mac, DISCOVERY_WINDOW).await.is_err() {
            return Err("device not found during discovery".to_string());
        }

        self.bt
            .pair(ctrl, mac)
            .await
            .map_err(|e| format!("pairing failed: {e}"))?;
        let paired_now = self
            .bt
            .device_info(ctrl, mac)
            .await
            .map(|i| i.paired)
            .unwrap_or(false);
        if !paired_now {
            self.await_flag(ctrl, mac, DeviceFlag::Paired, "pairing").await?;
        }
        state = TargetState::Paired;
        debug!("{mac}: {state:?}");

        state = TargetState::Trusting;
        debug!("{mac}: {state:?}");
        self.bt
            .trust(ctrl, mac)
            .await
            .map_err(|e| format!("trust failed: {e}"))?;
        self.await_flag(ctrl, mac, DeviceFlag::Trusted, "trust").await?;
        state = TargetState::Trusted;
        debug!("{mac}: {state:?}");

        state = TargetState::Connecting;
        debug!("{mac}: {state:?}");
        self.bt
            .connect(ctrl, mac)
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        self.await_flag(ctrl, mac, DeviceFlag::Connected, "connect").await?;

        if !self.verify_connected(ctrl, mac).await {
            return Err("device did not appear as connected".to_string());
        }
        state = TargetState::Connected;
        debug!("{mac}: {state:?}");
        Ok(())
    }

    /// Wait for one device flag, translating a timeout into the per-target
    /// failure reason (`"<step> timeout"`).
    async fn await_flag(
        &self,
        ctrl: &Mac,
        mac: &Mac,
        flag: DeviceFlag,
        step: &str,
    ) -> Result<(), String> {
        match self.bt.wait_for_flag(ctrl, mac, flag, WAIT_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(BluetoothError::Timeout) => Err(format!("{step} timeout")),
            Err(e) => Err(format!("{step} failed: {e}")),
        }
    }

    /// Poll until the daemon knows the device at all.
    async fn wait_until_known(&self, ctrl: &Mac, mac: &Mac, window: Duration) -> Result<(), ()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match self.bt.device_info(ctrl, mac).await {
                Ok(_) => return Ok(()),
                Err(BluetoothError::NotFound(_)) => {}
                Err(e) => {
                    debug!("device_info for {mac} on {ctrl}: {e}");
                }
            }
            if tokio::time::Instant::now() >= deadline || self.expired() {
                return Err(());
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Verification goes through the connected-device listing, the same
    /// ground truth the snapshot uses.
    async fn verify_connected(&self, ctrl: &Mac, mac: &Mac) -> bool {
        match self.bt.list_devices(ctrl, DeviceFilter::Connected).await {
            Ok(devices) => devices.iter().any(|d| &d.mac == mac),
            Err(e) => {
                warn!("could not verify {mac} on {ctrl}: {e}");
                false
            }
        }
    }

    // --- Phase C ---

    /// Mirror the connection state into the audio topology. Returns whether
    /// the audio server was unreachable.
    async fn reconcile_audio(
        &mut self,
        plan: &Gameplan,
        config: &Configuration,
        runs: &mut BTreeMap<Mac, TargetRun>,
    ) -> bool {
        if self.expired() {
            warn!("deadline reached, skipping audio reconcile");
            degrade_live(runs, "aborted by deadline");
            return false;
        }

        if self.audio.ensure_running(READY_TIMEOUT).await.is_err() {
            warn!("audio server unavailable, skipping topology reconcile");
            degrade_live(runs, "audio server unavailable");
            return true;
        }

        if let Err(e) = self.topology.ensure_virtual_sink(self.audio).await {
            warn!("virtual sink unavailable: {e}");
            degrade_live(runs, &format!("virtual sink load failed: {e}"));
            return false;
        }

        for entry in &plan.entries {
            let Some(run) = runs.get_mut(&entry.mac) else {
                continue;
            };
            if !run.bt_connected || run.status != EntryStatus::Connected {
                continue;
            }
            if self.expired() {
                warn!("deadline reached during audio reconcile");
                run.status = EntryStatus::AudioDegraded;
                run.reason = Some("aborted by deadline".to_string());
                continue;
            }
            let target = config.target(&entry.mac);
            let latency = target.map(|t| t.latency_ms).unwrap_or(DEFAULT_LATENCY_MS);
            match self.topology.wire_speaker(self.audio, &entry.mac, latency).await {
                Ok(_) => {
                    if let Some(volume) = target.and_then(|t| t.volume) {
                        if let Err(e) =
                            self.topology.set_volume(self.audio, &entry.mac, volume).await
                        {
                            warn!("could not set volume for {}: {e}", entry.mac);
                        }
                    }
                }
                Err(e) => {
                    warn!("audio wiring for {} failed: {e}", entry.mac);
                    run.status = EntryStatus::AudioDegraded;
                    run.reason = Some(format!("audio wiring failed: {e}"));
                }
            }
        }

        if let Err(e) = self.topology.unsuspend_all(self.audio).await {
            warn!("unsuspend pass failed: {e}");
        }
        false
    }
}

/// Demote every Bluetooth-connected sink target to audio-degraded.
fn degrade_live(runs: &mut BTreeMap<Mac, TargetRun>, reason: &str) {
    for run in runs.values_mut() {
        if run.bt_connected && run.status == EntryStatus::Connected {
            run.status = EntryStatus::AudioDegraded;
            run.reason = Some(reason.to_string());
        }
    }
}
