//! The Bluetooth capability trait the orchestrator drives.
//!
//! Long operations are modelled as *command plus poll for convergence*:
//! issue the verb, then watch device properties until the expected flag
//! flips. The default [`BluetoothControl::wait_for_flag`] implements the
//! polling half for any backend.

use std::time::Duration;

use async_trait::async_trait;
use multiroom_core::Mac;
use tracing::debug;

use crate::controller::Controller;
use crate::error::{BluetoothError, Result};

/// Cadence of convergence polling.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default budget for one convergence wait.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Which devices a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    All,
    Paired,
    Connected,
}

/// A device property a convergence wait can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlag {
    Paired,
    Trusted,
    Connected,
}

/// A device as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub mac: Mac,
    pub name: Option<String>,
}

/// Ground-truth device state as the daemon reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub mac: Mac,
    pub name: Option<String>,
    pub paired: bool,
    pub trusted: bool,
    pub connected: bool,
}

impl DeviceInfo {
    /// Read one flag by name.
    pub fn flag(&self, flag: DeviceFlag) -> bool {
        match flag {
            DeviceFlag::Paired => self.paired,
            DeviceFlag::Trusted => self.trusted,
            DeviceFlag::Connected => self.connected,
        }
    }
}

/// Capability interface over the Bluetooth daemon.
///
/// Every verb addresses a controller explicitly; there is no session-global
/// "selected" radio, so two callers can never trip over each other's
/// selection state.
#[async_trait]
pub trait BluetoothControl: Send + Sync {
    /// Enumerate radios in a fixed order (ties in planning break on it).
    async fn list_controllers(&self) -> Result<Vec<Controller>>;

    /// Devices known to one controller, optionally restricted to paired or
    /// connected ones.
    async fn list_devices(&self, controller: &Mac, filter: DeviceFilter)
        -> Result<Vec<DeviceEntry>>;

    /// Ground-truth properties of one device on one controller.
    async fn device_info(&self, controller: &Mac, mac: &Mac) -> Result<DeviceInfo>;

    /// Toggle discovery on a controller.
    async fn set_scan(&self, controller: &Mac, on: bool) -> Result<()>;

    async fn pair(&self, controller: &Mac, mac: &Mac) -> Result<()>;

    async fn trust(&self, controller: &Mac, mac: &Mac) -> Result<()>;

    async fn connect(&self, controller: &Mac, mac: &Mac) -> Result<()>;

    async fn disconnect(&self, controller: &Mac, mac: &Mac) -> Result<()>;

    /// Unpair and forget a device.
    async fn remove(&self, controller: &Mac, mac: &Mac) -> Result<()>;

    /// Poll [`BluetoothControl::device_info`] every [`POLL_INTERVAL`] until
    /// `flag` is true or `timeout` expires.
    ///
    /// A device the daemon does not know yet reads as "flag not set"; the
    /// wait keeps polling, since discovery may still surface it.
    async fn wait_for_flag(
        &self,
        controller: &Mac,
        mac: &Mac,
        flag: DeviceFlag,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.device_info(controller, mac).await {
                Ok(info) if info.flag(flag) => return Ok(()),
                Ok(_) => debug!("waiting for {flag:?} on {mac} via {controller}"),
                Err(BluetoothError::NotFound(_)) => {
                    debug!("device {mac} not yet known to {controller}");
                }
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BluetoothError::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
