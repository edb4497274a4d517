//! The planner: pure assignment of targets to radios.
//!
//! Greedy, one target at a time, in target iteration order. Each target
//! prefers a radio it is already connected on, then one it is already
//! paired on, then any free radio. That minimizes re-pair churn, which
//! dominates apply latency. Radios are claimed as they are chosen, so two
//! targets can never race for the same one. Global optimization across all
//! targets is deliberately out of scope; the greedy order is stable and
//! predictable, which matters more here.

use std::collections::HashSet;

use multiroom_bluetooth::Snapshot;
use multiroom_core::{Action, Mac, Target};
use tracing::debug;

use crate::gameplan::{Gameplan, PlanEntry};

/// Build a [`Gameplan`] from the desired targets and the current inventory.
///
/// Guarantees, for any input:
/// - no two entries share a recommended controller,
/// - the reserved BLE controller is never recommended (it is absent from
///   the snapshot's pool views),
/// - an entry's recommended controller never appears in its own disconnect
///   list.
pub fn plan(targets: &[Target], snapshot: &Snapshot) -> Gameplan {
    let pool = snapshot.audio_pool();
    let mut assigned: HashSet<Mac> = HashSet::new();
    let mut entries = Vec::with_capacity(targets.len());

    for target in targets {
        let connected_on = snapshot.connected_on(&target.mac);
        let paired_on = snapshot.paired_on(&target.mac);

        let free_connected = connected_on.iter().find(|c| !assigned.contains(*c));
        let free_paired = paired_on.iter().find(|c| !assigned.contains(*c));
        let free_any = pool.iter().find(|c| !assigned.contains(*c));

        let (action, recommended) = if let Some(ctrl) = free_connected {
            (Action::NoAction, Some(ctrl.clone()))
        } else if let Some(ctrl) = free_paired {
            (Action::ConnectExistingPair, Some(ctrl.clone()))
        } else if let Some(ctrl) = free_any {
            (Action::PairAndConnect, Some(ctrl.clone()))
        } else {
            (Action::NoFreeController, None)
        };

        if let Some(ctrl) = &recommended {
            assigned.insert(ctrl.clone());
        }

        // Break every stale attachment except the one we are keeping.
        let disconnect: Vec<Mac> = connected_on
            .iter()
            .filter(|c| Some(*c) != recommended.as_ref())
            .cloned()
            .collect();

        debug!(
            "plan {} ({}): {:?} via {:?}, disconnect {:?}",
            target.name, target.mac, action, recommended, disconnect
        );

        entries.push(PlanEntry {
            mac: target.mac.clone(),
            name: target.name.clone(),
            paired_on,
            connected_on,
            disconnect,
            action,
            recommended,
        });
    }

    Gameplan { entries }
}
