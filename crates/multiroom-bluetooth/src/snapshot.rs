//! Inventory snapshots: which device is paired or connected on which radio.
//!
//! A snapshot is taken once per apply call by querying every controller's
//! paired and connected device lists, and is immutable afterwards. The
//! planner works exclusively from this value: no incremental updates, no
//! re-reads mid-plan.

use std::collections::HashMap;

use multiroom_core::Mac;
use tracing::debug;

use crate::control::{BluetoothControl, DeviceFilter};
use crate::controller::Controller;
use crate::error::Result;

/// Pairing/connection flags of one (controller, device) relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub paired: bool,
    pub connected: bool,
    pub name: Option<String>,
}

/// Immutable world view at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// All radios, in enumeration order.
    pub controllers: Vec<Controller>,
    /// Keyed by (controller mac, device mac).
    pub attachments: HashMap<(Mac, Mac), Attachment>,
}

impl Snapshot {
    /// Query the daemon for the current inventory.
    pub async fn take(bt: &dyn BluetoothControl) -> Result<Self> {
        let controllers = bt.list_controllers().await?;
        let mut attachments: HashMap<(Mac, Mac), Attachment> = HashMap::new();

        for controller in &controllers {
            for entry in bt.list_devices(&controller.mac, DeviceFilter::Paired).await? {
                let slot = attachments
                    .entry((controller.mac.clone(), entry.mac))
                    .or_default();
                slot.paired = true;
                if slot.name.is_none() {
                    slot.name = entry.name;
                }
            }
            for entry in bt
                .list_devices(&controller.mac, DeviceFilter::Connected)
                .await?
            {
                let slot = attachments
                    .entry((controller.mac.clone(), entry.mac))
                    .or_default();
                slot.connected = true;
                if slot.name.is_none() {
                    slot.name = entry.name;
                }
            }
        }

        debug!(
            "snapshot: {} controllers, {} attachments",
            controllers.len(),
            attachments.len()
        );
        Ok(Self {
            controllers,
            attachments,
        })
    }

    /// Non-reserved controller MACs, in enumeration order. This is the pool
    /// the planner may assign speakers to.
    pub fn audio_pool(&self) -> Vec<Mac> {
        self.controllers
            .iter()
            .filter(|c| !c.is_reserved())
            .map(|c| c.mac.clone())
            .collect()
    }

    /// Pool controllers where `device` is currently connected, in
    /// enumeration order.
    pub fn connected_on(&self, device: &Mac) -> Vec<Mac> {
        self.pool_where(device, |a| a.connected)
    }

    /// Pool controllers where `device` is currently paired, in enumeration
    /// order.
    pub fn paired_on(&self, device: &Mac) -> Vec<Mac> {
        self.pool_where(device, |a| a.paired)
    }

    fn pool_where(&self, device: &Mac, pred: impl Fn(&Attachment) -> bool) -> Vec<Mac> {
        self.controllers
            .iter()
            .filter(|c| !c.is_reserved())
            .filter(|c| {
                self.attachments
                    .get(&(c.mac.clone(), device.clone()))
                    .map(&pred)
                    .unwrap_or(false)
            })
            .map(|c| c.mac.clone())
            .collect()
    }
}
