//! Deploy-config merge for add-worker operations.
//!
//! When a worker is added to an existing deployment, the incoming device
//! list is merged into the stored snapshot instead of replacing it.
//! Devices are matched by normalized name within the same node: matches
//! sum `replica`, non-matches are appended. The merge is a pure function
//! of its inputs and does not depend on device ordering.

use crate::types::{DeviceSpec, NodeSpec};

/// Normalize a node or device name for matching.
fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Merge an incoming node/device list into an existing one.
///
/// Nodes are matched by normalized name; within a matched node, devices
/// are matched by normalized name and their replica counts summed.
/// Everything else (new nodes, new devices) is appended unchanged.
pub fn merge_deploy_config(existing: &[NodeSpec], incoming: &[NodeSpec]) -> Vec<NodeSpec> {
    let mut merged: Vec<NodeSpec> = existing.to_vec();

    for node in incoming {
        match merged
            .iter_mut()
            .find(|n| normalize(&n.name) == normalize(&node.name))
        {
            Some(target) => merge_devices(&mut target.devices, &node.devices),
            None => merged.push(node.clone()),
        }
    }

    merged
}

fn merge_devices(existing: &mut Vec<DeviceSpec>, incoming: &[DeviceSpec]) {
    for device in incoming {
        match existing
            .iter_mut()
            .find(|d| normalize(&d.name) == normalize(&device.name))
        {
            Some(target) => target.replica += device.replica,
            None => existing.push(device.clone()),
        }
    }
}
