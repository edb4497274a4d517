//! The planner's output: one decision record per target.

use multiroom_core::{Action, Mac};

/// Decision for one target speaker.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub mac: Mac,
    pub name: String,
    /// Pool controllers where the device is currently paired.
    pub paired_on: Vec<Mac>,
    /// Pool controllers where the device is currently connected.
    pub connected_on: Vec<Mac>,
    /// Controllers the device must be detached from before anything else.
    pub disconnect: Vec<Mac>,
    pub action: Action,
    /// Chosen controller; `None` iff `action` is
    /// [`Action::NoFreeController`].
    pub recommended: Option<Mac>,
}

/// Ordered decisions for one configuration, in target iteration order.
#[derive(Debug, Clone, Default)]
pub struct Gameplan {
    pub entries: Vec<PlanEntry>,
}

impl Gameplan {
    pub fn get(&self, mac: &Mac) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.mac == mac)
    }

    /// `true` when executing the plan would touch nothing: every entry is
    /// already where it should be.
    pub fn is_noop(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.action == Action::NoAction && e.disconnect.is_empty())
    }
}
