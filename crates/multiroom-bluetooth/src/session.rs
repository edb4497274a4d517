//! BlueZ-backed implementation of [`BluetoothControl`].
//!
//! One `bluer` session serves every radio in the pool; each verb resolves
//! its controller by address at call time, so there is no interactive
//! session state to keep consistent.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, Device, Session};
use futures::Stream;
use multiroom_core::Mac;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::control::{BluetoothControl, DeviceEntry, DeviceFilter, DeviceInfo};
use crate::controller::{Controller, ControllerRole, ReservedId};
use crate::error::{BluetoothError, Result};

/// Budget for the daemon's Pair() call itself; property convergence on top
/// of this is the caller's wait_for_flag.
const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for the daemon's Connect() call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

type DiscoveryStream = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

/// Production Bluetooth backend over the BlueZ D-Bus API.
pub struct BluezControl {
    session: Session,
    reserved: ReservedId,
    /// Live discovery sessions, one per scanning controller. Dropping the
    /// stream ends discovery on that radio.
    scans: Mutex<HashMap<Mac, DiscoveryStream>>,
}

impl BluezControl {
    /// Connect to the daemon with an explicit reserved-controller identity.
    pub async fn new(reserved: ReservedId) -> Result<Self> {
        let session = Session::new().await?;
        info!("connected to BlueZ, reserved controller: {reserved:?}");
        Ok(Self {
            session,
            reserved,
            scans: Mutex::new(HashMap::new()),
        })
    }

    /// Connect to the daemon, reading the reserved controller from the
    /// environment.
    pub async fn from_env() -> Result<Self> {
        Self::new(ReservedId::from_env()?).await
    }

    /// Resolve a controller MAC to its adapter handle.
    async fn adapter_by_mac(&self, controller: &Mac) -> Result<Adapter> {
        for name in self.session.adapter_names().await? {
            let adapter = match self.session.adapter(&name) {
                Ok(a) => a,
                Err(e) => {
                    debug!("adapter {name} vanished during lookup: {e}");
                    continue;
                }
            };
            match adapter.address().await {
                Ok(addr) if addr.to_string().eq_ignore_ascii_case(controller.as_str()) => {
                    return Ok(adapter)
                }
                Ok(_) => {}
                Err(e) => debug!("cannot read address of {name}: {e}"),
            }
        }
        Err(BluetoothError::NotFound(format!("controller {controller}")))
    }

    /// Resolve a (controller, device) pair to a device handle.
    async fn device_handle(&self, controller: &Mac, mac: &Mac) -> Result<Device> {
        let adapter = self.adapter_by_mac(controller).await?;
        let addr: bluer::Address = mac
            .as_str()
            .parse()
            .map_err(|_| BluetoothError::NotFound(format!("device {mac}")))?;
        Ok(adapter.device(addr)?)
    }
}

#[async_trait]
impl BluetoothControl for BluezControl {
    async fn list_controllers(&self) -> Result<Vec<Controller>> {
        let mut names = self.session.adapter_names().await?;
        // Fixed enumeration order: planning tie-breaks depend on it.
        names.sort();

        let mut controllers = Vec::with_capacity(names.len());
        for name in names {
            let adapter = match self.session.adapter(&name) {
                Ok(a) => a,
                Err(e) => {
                    warn!("skipping adapter {name}: {e}");
                    continue;
                }
            };
            let address = match adapter.address().await {
                Ok(a) => a,
                Err(e) => {
                    warn!("skipping adapter {name}, cannot read address: {e}");
                    continue;
                }
            };
            let mac = Mac::parse(&address.to_string())
                .map_err(|_| BluetoothError::Transport(format!("bad adapter address {address}")))?;

            if !adapter.is_powered().await.unwrap_or(false) {
                info!("powering on adapter {name}");
                if let Err(e) = adapter.set_powered(true).await {
                    warn!("could not power on {name}: {e}");
                }
            }

            let role = if self.reserved.matches(&name, &mac) {
                ControllerRole::ReservedBle
            } else {
                ControllerRole::Audio
            };
            let alias = adapter.alias().await.unwrap_or_else(|_| name.clone());
            controllers.push(Controller {
                mac,
                adapter: name,
                alias,
                role,
            });
        }

        if !controllers.iter().any(Controller::is_reserved) {
            warn!("reserved controller {:?} not present in adapter pool", self.reserved);
        }
        Ok(controllers)
    }

    async fn list_devices(
        &self,
        controller: &Mac,
        filter: DeviceFilter,
    ) -> Result<Vec<DeviceEntry>> {
        let adapter = self.adapter_by_mac(controller).await?;
        let mut entries = Vec::new();
        for addr in adapter.device_addresses().await? {
            let device = match adapter.device(addr) {
                Ok(d) => d,
                Err(e) => {
                    debug!("device {addr} vanished during listing: {e}");
                    continue;
                }
            };
            let keep = match filter {
                DeviceFilter::All => true,
                DeviceFilter::Paired => device.is_paired().await.unwrap_or(false),
                DeviceFilter::Connected => device.is_connected().await.unwrap_or(false),
            };
            if !keep {
                continue;
            }
            let mac = match Mac::parse(&addr.to_string()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = device.name().await.ok().flatten();
            entries.push(DeviceEntry { mac, name });
        }
        Ok(entries)
    }

    async fn device_info(&self, controller: &Mac, mac: &Mac) -> Result<DeviceInfo> {
        let device = self.device_handle(controller, mac).await?;
        Ok(DeviceInfo {
            mac: mac.clone(),
            name: device.name().await.ok().flatten(),
            paired: device.is_paired().await?,
            trusted: device.is_trusted().await?,
            connected: device.is_connected().await?,
        })
    }

    async fn set_scan(&self, controller: &Mac, on: bool) -> Result<()> {
        if !on {
            if self.scans.lock().await.remove(controller).is_some() {
                debug!("discovery stopped on {controller}");
            }
            return Ok(());
        }

        if self.scans.lock().await.contains_key(controller) {
            return Ok(());
        }
        let adapter = self.adapter_by_mac(controller).await?;
        let stream = adapter.discover_devices().await?;
        debug!("discovery started on {controller}");
        self.scans
            .lock()
            .await
            .insert(controller.clone(), Box::pin(stream));
        Ok(())
    }

    async fn pair(&self, controller: &Mac, mac: &Mac) -> Result<()> {
        let device = self.device_handle(controller, mac).await?;
        if device.is_paired().await.unwrap_or(false) {
            info!("{mac} already paired on {controller}");
            return Ok(());
        }
        info!("pairing {mac} on {controller}");
        match timeout(PAIRING_TIMEOUT, device.pair()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if matches!(e.kind, bluer::ErrorKind::AlreadyExists) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BluetoothError::Timeout),
        }
    }

    async fn trust(&self, controller: &Mac, mac: &Mac) -> Result<()> {
        let device = self.device_handle(controller, mac).await?;
        device.set_trusted(true).await?;
        debug!("{mac} trusted on {controller}");
        Ok(())
    }

    async fn connect(&self, controller: &Mac, mac: &Mac) -> Result<()> {
        let device = self.device_handle(controller, mac).await?;
        if device.is_connected().await.unwrap_or(false) {
            info!("{mac} already connected on {controller}");
            return Ok(());
        }
        info!("connecting {mac} on {controller}");
        match timeout(CONNECT_TIMEOUT, device.connect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if matches!(e.kind, bluer::ErrorKind::AlreadyConnected) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BluetoothError::Timeout),
        }
    }

    async fn disconnect(&self, controller: &Mac, mac: &Mac) -> Result<()> {
        let device = self.device_handle(controller, mac).await?;
        if !device.is_connected().await.unwrap_or(false) {
            debug!("{mac} not connected on {controller}, nothing to disconnect");
            return Ok(());
        }
        info!("disconnecting {mac} from {controller}");
        device.disconnect().await?;
        Ok(())
    }

    async fn remove(&self, controller: &Mac, mac: &Mac) -> Result<()> {
        let adapter = self.adapter_by_mac(controller).await?;
        let addr: bluer::Address = mac
            .as_str()
            .parse()
            .map_err(|_| BluetoothError::NotFound(format!("device {mac}")))?;
        info!("removing {mac} from {controller}");
        adapter.remove_device(addr).await?;
        Ok(())
    }
}
