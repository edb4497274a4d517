//! End-to-end orchestration scenarios against in-memory daemons.
//!
//! One shared `World` plays both the Bluetooth daemon and the audio server,
//! so side effects line up the way they do on a real hub: a device that
//! connects makes its BlueZ sink appear, a disconnect takes it away. Tests
//! run with paused tokio time, so the 30-second convergence waits cost
//! nothing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use multiroom_audio::control::{AudioControl, ModuleInfo, SinkInfo};
use multiroom_audio::error::{AudioError, Result as AudioResult};
use multiroom_bluetooth::{
    BluetoothControl, BluetoothError, Controller, ControllerRole, DeviceEntry, DeviceFilter,
    Result as BtResult,
};
use multiroom_core::{Action, Configuration, ConfigurationInput, EntryStatus, Mac};
use multiroom_orchestrator::{Error, Orchestrator};

const R0: &str = "00:00:00:00:00:10"; // reserved BLE radio
const R1: &str = "00:00:00:00:00:11";
const R2: &str = "00:00:00:00:00:12";
const A: &str = "AA:00:00:00:00:01";
const B: &str = "AA:00:00:00:00:02";
const C: &str = "AA:00:00:00:00:03";

fn mac(s: &str) -> Mac {
    Mac::parse(s).unwrap()
}

#[derive(Debug, Clone, Default)]
struct DevState {
    paired: bool,
    trusted: bool,
    connected: bool,
}

/// Shared state behind both fake daemons.
#[derive(Default)]
struct World {
    radios: Vec<(Mac, String, ControllerRole)>,
    devices: HashMap<(Mac, Mac), DevState>,
    /// Devices discovery can surface on any radio.
    discoverable: HashSet<Mac>,
    scanning: HashSet<Mac>,
    /// Devices whose Pair() is accepted but whose flag never flips.
    pairing_stuck: HashSet<Mac>,
    audio_up: bool,
    sinks: Vec<String>,
    modules: Vec<ModuleInfo>,
    next_module: u32,
    /// Journal of state-changing Bluetooth verbs, for ordering assertions.
    bt_ops: Vec<String>,
}

impl World {
    fn new() -> Arc<Mutex<Self>> {
        let mut world = Self {
            audio_up: true,
            ..Self::default()
        };
        world.radios = vec![
            (mac(R0), "hci0".to_string(), ControllerRole::ReservedBle),
            (mac(R1), "hci1".to_string(), ControllerRole::Audio),
            (mac(R2), "hci2".to_string(), ControllerRole::Audio),
        ];
        Arc::new(Mutex::new(world))
    }

    fn device(&mut self, ctrl: &str, dev: &str, paired: bool, connected: bool) {
        self.devices.insert(
            (mac(ctrl), mac(dev)),
            DevState {
                paired,
                trusted: paired,
                connected,
            },
        );
        if connected {
            self.add_sink(&mac(dev).sink_name());
        }
    }

    fn add_sink(&mut self, name: &str) {
        if !self.sinks.iter().any(|s| s == name) {
            self.sinks.push(name.to_string());
        }
    }

    fn remove_sink_if_detached(&mut self, dev: &Mac) {
        let still_connected = self
            .devices
            .iter()
            .any(|((_, d), state)| d == dev && state.connected);
        if !still_connected {
            let sink = dev.sink_name();
            self.sinks.retain(|s| s != &sink);
        }
    }

    fn connected_radios(&self, dev: &str) -> Vec<Mac> {
        let dev = mac(dev);
        self.devices
            .iter()
            .filter(|((_, d), state)| d == &dev && state.connected)
            .map(|((ctrl, _), _)| ctrl.clone())
            .collect()
    }

    fn ops_matching(&self, verb: &str) -> Vec<String> {
        self.bt_ops
            .iter()
            .filter(|op| op.starts_with(verb))
            .cloned()
            .collect()
    }
}

struct FakeBluetooth(Arc<Mutex<World>>);

#[async_trait]
impl BluetoothControl for FakeBluetooth {
    async fn list_controllers(&self) -> BtResult<Vec<Controller>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .radios
            .iter()
            .map(|(mac, adapter, role)| Controller {
                mac: mac.clone(),
                adapter: adapter.clone(),
                alias: adapter.clone(),
                role: *role,
            })
            .collect())
    }

    async fn list_devices(
        &self,
        controller: &Mac,
        filter: DeviceFilter,
    ) -> BtResult<Vec<DeviceEntry>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .devices
            .iter()
            .filter(|((ctrl, _), state)| {
                ctrl == controller
                    && match filter {
                        DeviceFilter::All => true,
                        DeviceFilter::Paired => state.paired,
                        DeviceFilter::Connected => state.connected,
                    }
            })
            .map(|((_, dev), _)| DeviceEntry {
                mac: dev.clone(),
                name: None,
            })
            .collect())
    }

    async fn device_info(
        &self,
        controller: &Mac,
        mac_addr: &Mac,
    ) -> BtResult<multiroom_bluetooth::DeviceInfo> {
        let mut world = self.0.lock().unwrap();
        let key = (controller.clone(), mac_addr.clone());
        if !world.devices.contains_key(&key) {
            // Discovery surfaces the device as an unpaired entry.
            if world.discoverable.contains(mac_addr) && world.scanning.contains(controller) {
                world.devices.insert(key.clone(), DevState::default());
            } else {
                return Err(BluetoothError::NotFound(format!("device {mac_addr}")));
            }
        }
        let state = &world.devices[&key];
        Ok(multiroom_bluetooth::DeviceInfo {
            mac: mac_addr.clone(),
            name: None,
            paired: state.paired,
            trusted: state.trusted,
            connected: state.connected,
        })
    }

    async fn set_scan(&self, controller: &Mac, on: bool) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        if on {
            world.scanning.insert(controller.clone());
        } else {
            world.scanning.remove(controller);
        }
        Ok(())
    }

    async fn pair(&self, controller: &Mac, mac_addr: &Mac) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        world.bt_ops.push(format!("pair {controller} {mac_addr}"));
        if world.pairing_stuck.contains(mac_addr) {
            // Command accepted; the Paired property just never flips.
            return Ok(());
        }
        world
            .devices
            .entry((controller.clone(), mac_addr.clone()))
            .or_default()
            .paired = true;
        Ok(())
    }

    async fn trust(&self, controller: &Mac, mac_addr: &Mac) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        world.bt_ops.push(format!("trust {controller} {mac_addr}"));
        match world.devices.get_mut(&(controller.clone(), mac_addr.clone())) {
            Some(state) => {
                state.trusted = true;
                Ok(())
            }
            None => Err(BluetoothError::NotFound(format!("device {mac_addr}"))),
        }
    }

    async fn connect(&self, controller: &Mac, mac_addr: &Mac) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        world.bt_ops.push(format!("connect {controller} {mac_addr}"));
        match world.devices.get_mut(&(controller.clone(), mac_addr.clone())) {
            Some(state) => {
                state.connected = true;
                let sink = mac_addr.sink_name();
                world.add_sink(&sink);
                Ok(())
            }
            None => Err(BluetoothError::NotFound(format!("device {mac_addr}"))),
        }
    }

    async fn disconnect(&self, controller: &Mac, mac_addr: &Mac) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        world.bt_ops.push(format!("disconnect {controller} {mac_addr}"));
        if let Some(state) = world.devices.get_mut(&(controller.clone(), mac_addr.clone())) {
            state.connected = false;
        }
        world.remove_sink_if_detached(mac_addr);
        Ok(())
    }

    async fn remove(&self, controller: &Mac, mac_addr: &Mac) -> BtResult<()> {
        let mut world = self.0.lock().unwrap();
        world.bt_ops.push(format!("remove {controller} {mac_addr}"));
        world.devices.remove(&(controller.clone(), mac_addr.clone()));
        world.remove_sink_if_detached(mac_addr);
        Ok(())
    }
}

struct FakeAudio(Arc<Mutex<World>>);

#[async_trait]
impl AudioControl for FakeAudio {
    async fn ping(&self) -> bool {
        self.0.lock().unwrap().audio_up
    }

    async fn load_null_sink(&self, name: &str) -> AudioResult<u32> {
        let mut world = self.0.lock().unwrap();
        if !world.audio_up {
            return Err(AudioError::Unavailable);
        }
        world.next_module += 1;
        let id = world.next_module;
        world.modules.push(ModuleInfo {
            id,
            name: "module-null-sink".to_string(),
            args: format!("sink_name={name}"),
        });
        world.add_sink(name);
        Ok(id)
    }

    async fn load_loopback(&self, source: &str, sink: &str, latency_ms: u64) -> AudioResult<u32> {
        let mut world = self.0.lock().unwrap();
        if !world.audio_up {
            return Err(AudioError::Unavailable);
        }
        world.next_module += 1;
        let id = world.next_module;
        world.modules.push(ModuleInfo {
            id,
            name: "module-loopback".to_string(),
            args: format!("source={source} sink={sink} latency_msec={latency_ms}"),
        });
        Ok(id)
    }

    async fn unload_module(&self, id: u32) -> AudioResult<()> {
        self.0.lock().unwrap().modules.retain(|m| m.id != id);
        Ok(())
    }

    async fn list_sinks(&self) -> AudioResult<Vec<SinkInfo>> {
        let world = self.0.lock().unwrap();
        Ok(world
            .sinks
            .iter()
            .enumerate()
            .map(|(i, name)| SinkInfo {
                id: i as u32,
                name: name.clone(),
                state: "IDLE".to_string(),
            })
            .collect())
    }

    async fn list_modules(&self) -> AudioResult<Vec<ModuleInfo>> {
        Ok(self.0.lock().unwrap().modules.clone())
    }

    async fn unsuspend_sink(&self, _name: &str) -> AudioResult<()> {
        Ok(())
    }

    async fn set_sink_volume(&self, _name: &str, _percent: u32) -> AudioResult<()> {
        Ok(())
    }
}

fn orchestrator(world: &Arc<Mutex<World>>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(FakeBluetooth(world.clone())),
        Arc::new(FakeAudio(world.clone())),
    )
}

fn configuration(speakers: &[(&str, &str)]) -> Configuration {
    configuration_with_settings(speakers, "{}")
}

fn configuration_with_settings(speakers: &[(&str, &str)], settings: &str) -> Configuration {
    let speakers: std::collections::BTreeMap<String, String> = speakers
        .iter()
        .map(|(mac, name)| (mac.to_string(), name.to_string()))
        .collect();
    let input: ConfigurationInput = serde_json::from_value(serde_json::json!({
        "configId": "test-config",
        "configName": "Test",
        "speakers": speakers,
        "settings": serde_json::from_str::<serde_json::Value>(settings).unwrap(),
    }))
    .unwrap();
    Configuration::from_input(input).unwrap()
}

/// The set of sinks the orchestrator's loopbacks feed, from the report.
fn loopback_sinks(report: &multiroom_core::ApplyReport) -> BTreeSet<String> {
    report.loopbacks.keys().cloned().collect()
}

#[tokio::test(start_paused = true)]
async fn two_fresh_speakers_land_on_two_radios() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.discoverable.insert(mac(B));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen"), (B, "Porch")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.action, Action::PairAndConnect);
    assert_eq!(a.recommended_controller, R1);
    assert_eq!(a.status, EntryStatus::Connected);

    let b = &report.entries[&mac(B)];
    assert_eq!(b.action, Action::PairAndConnect);
    assert_eq!(b.recommended_controller, R2);
    assert_eq!(b.status, EntryStatus::Connected);

    assert!(report.virtual_sink.present);
    let expected: BTreeSet<String> =
        [mac(A).sink_name(), mac(B).sink_name()].into_iter().collect();
    assert_eq!(loopback_sinks(&report), expected);
    assert_eq!(report.exit_code(), 0);

    // Pairing went through trust on both radios.
    let w = world.lock().unwrap();
    assert_eq!(w.ops_matching("pair").len(), 2);
    assert_eq!(w.ops_matching("trust").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn connected_speaker_is_not_touched() {
    let world = World::new();
    world.lock().unwrap().device(R2, A, true, true);
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.action, Action::NoAction);
    assert_eq!(a.recommended_controller, R2);
    assert!(a.disconnect.is_empty());
    assert_eq!(a.status, EntryStatus::Connected);

    // No Bluetooth side effects, but the missing loopback was created.
    let w = world.lock().unwrap();
    assert!(w.bt_ops.is_empty(), "unexpected ops: {:?}", w.bt_ops);
    drop(w);
    assert_eq!(
        loopback_sinks(&report),
        [mac(A).sink_name()].into_iter().collect()
    );
}

#[tokio::test(start_paused = true)]
async fn stale_double_connection_is_broken_first() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.device(R1, A, true, true);
        w.device(R2, A, true, true);
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.action, Action::NoAction);
    assert_eq!(a.recommended_controller, R1);
    assert_eq!(a.disconnect, vec![R2.to_string()]);
    assert_eq!(a.status, EntryStatus::Connected);

    let w = world.lock().unwrap();
    assert_eq!(w.ops_matching("disconnect"), vec![format!("disconnect {R2} {A}")]);
    assert_eq!(w.connected_radios(A), vec![mac(R1)]);
}

#[tokio::test(start_paused = true)]
async fn paired_speaker_reconnects_without_repairing() {
    let world = World::new();
    world.lock().unwrap().device(R1, A, true, false);
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.action, Action::ConnectExistingPair);
    assert_eq!(a.status, EntryStatus::Connected);

    let w = world.lock().unwrap();
    assert!(w.ops_matching("pair").is_empty());
    assert_eq!(w.ops_matching("connect"), vec![format!("connect {R1} {A}")]);
}

#[tokio::test(start_paused = true)]
async fn third_speaker_finds_no_radio() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        for dev in [A, B, C] {
            w.discoverable.insert(mac(dev));
        }
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "One"), (B, "Two"), (C, "Three")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let statuses: Vec<EntryStatus> = report.entries.values().map(|e| e.status).collect();
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == EntryStatus::Connected)
            .count(),
        2
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == EntryStatus::NoController)
            .count(),
        1
    );

    let starved = report
        .entries
        .values()
        .find(|e| e.status == EntryStatus::NoController)
        .unwrap();
    assert_eq!(starved.action, Action::NoFreeController);
    assert_eq!(starved.recommended_controller, "");
    // The two placed speakers still got their audio.
    assert_eq!(report.loopbacks.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn pairing_timeout_fails_only_that_target() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.discoverable.insert(mac(B));
        w.pairing_stuck.insert(mac(A));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Stuck"), (B, "Fine")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.status, EntryStatus::Failed);
    assert!(
        a.reason.as_deref().unwrap().contains("pairing timeout"),
        "reason was {:?}",
        a.reason
    );

    // The other target proceeded and got wired.
    let b = &report.entries[&mac(B)];
    assert_eq!(b.status, EntryStatus::Connected);
    assert_eq!(
        loopback_sinks(&report),
        [mac(B).sink_name()].into_iter().collect()
    );
}

#[tokio::test(start_paused = true)]
async fn audio_daemon_down_degrades_connected_targets() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.audio_up = false;
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.status, EntryStatus::AudioDegraded);
    assert!(report.audio_unavailable);
    assert!(report.loopbacks.is_empty());
    assert!(!report.virtual_sink.present);
    assert_eq!(report.exit_code(), 4);

    // Bluetooth still converged.
    assert_eq!(world.lock().unwrap().connected_radios(A), vec![mac(R1)]);
}

#[tokio::test(start_paused = true)]
async fn second_apply_is_a_noop() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.discoverable.insert(mac(B));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen"), (B, "Porch")]);

    let first = hub.apply_configuration(&config).await.unwrap();
    let ops_after_first = world.lock().unwrap().bt_ops.len();

    let second = hub.apply_configuration(&config).await.unwrap();

    // No new Bluetooth verbs, same audio modules, every entry NoAction.
    assert_eq!(world.lock().unwrap().bt_ops.len(), ops_after_first);
    assert_eq!(first.loopbacks, second.loopbacks);
    assert_eq!(first.virtual_sink.module_id, second.virtual_sink.module_id);
    for entry in second.entries.values() {
        assert_eq!(entry.action, Action::NoAction);
        assert_eq!(entry.status, EntryStatus::Connected);
    }
}

#[tokio::test(start_paused = true)]
async fn apply_then_disconnect_round_trips() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.discoverable.insert(mac(B));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen"), (B, "Porch")]);

    hub.apply_configuration(&config).await.unwrap();
    let report = hub.disconnect_configuration(&config).await.unwrap();

    assert!(report.loopbacks.is_empty());
    assert!(!report.virtual_sink.present);

    let w = world.lock().unwrap();
    assert!(w.connected_radios(A).is_empty());
    assert!(w.connected_radios(B).is_empty());
    // Every module the orchestrator loaded is gone again.
    assert!(w.modules.is_empty(), "leftover modules: {:?}", w.modules);
}

#[tokio::test(start_paused = true)]
async fn topology_mirrors_connected_sink_targets() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        w.discoverable.insert(mac(A));
        w.discoverable.insert(mac(B));
        w.pairing_stuck.insert(mac(B));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Good"), (B, "Bad")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let connected_sinks: BTreeSet<String> = report
        .entries
        .iter()
        .filter(|(_, e)| e.status == EntryStatus::Connected)
        .map(|(mac, _)| mac.sink_name())
        .collect();
    assert_eq!(loopback_sinks(&report), connected_sinks);
}

#[tokio::test(start_paused = true)]
async fn source_role_device_is_skipped_for_audio() {
    let world = World::new();
    world.lock().unwrap().discoverable.insert(mac(A));
    let hub = orchestrator(&world);
    let config = configuration_with_settings(
        &[(A, "Phone")],
        &format!(r#"{{ "{A}": {{ "role": "source" }} }}"#),
    );

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.status, EntryStatus::Skipped);
    assert!(report.loopbacks.is_empty());
    // The radio was still claimed and the device connected.
    assert_eq!(world.lock().unwrap().connected_radios(A), vec![mac(R1)]);
}

#[tokio::test(start_paused = true)]
async fn latency_setting_reaches_the_loopback() {
    let world = World::new();
    world.lock().unwrap().discoverable.insert(mac(A));
    let hub = orchestrator(&world);
    let config = configuration_with_settings(
        &[(A, "Kitchen")],
        &format!(r#"{{ "{A}": {{ "latencyMs": 250, "volume": 40 }} }}"#),
    );

    hub.apply_configuration(&config).await.unwrap();

    let w = world.lock().unwrap();
    let loopback = w
        .modules
        .iter()
        .find(|m| m.name == "module-loopback")
        .unwrap();
    assert!(loopback.args.contains("latency_msec=250"));
    assert!(loopback.args.contains(&mac(A).sink_name()));
}

#[tokio::test(start_paused = true)]
async fn zero_deadline_aborts_before_any_work() {
    let world = World::new();
    world.lock().unwrap().discoverable.insert(mac(A));
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub
        .apply_with_deadline(&config, Some(Duration::from_secs(0)))
        .await
        .unwrap();

    let a = &report.entries[&mac(A)];
    assert_eq!(a.status, EntryStatus::Failed);
    assert!(a.reason.as_deref().unwrap().contains("deadline"));
    assert!(world.lock().unwrap().ops_matching("pair").is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_pool_aborts_with_no_controllers() {
    let world = World::new();
    world.lock().unwrap().radios.truncate(1); // reserved radio only
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let err = hub.apply_configuration(&config).await.unwrap_err();
    assert!(matches!(err, Error::NoControllers));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn reserved_radio_is_never_assigned() {
    let world = World::new();
    {
        let mut w = world.lock().unwrap();
        // The device is even connected on the reserved radio; the planner
        // must ignore that attachment entirely.
        w.device(R0, A, true, true);
        w.discoverable.insert(mac(A));
    }
    let hub = orchestrator(&world);
    let config = configuration(&[(A, "Kitchen")]);

    let report = hub.apply_configuration(&config).await.unwrap();

    let a = &report.entries[&mac(A)];
    assert_ne!(a.recommended_controller, R0);
    assert_eq!(a.action, Action::PairAndConnect);
    assert!(!a.disconnect.contains(&R0.to_string()));
}
