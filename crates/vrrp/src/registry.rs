//! Registry of running VRRP instances, keyed by VRF.

use crate::types::Instance;
use dashmap::DashMap;

/// Maps a VRF name to the instances currently running for it.
///
/// Each VRF slot is owned by whichever reconciliation is running for that
/// VRF; reconciliations of the same VRF must be serialized by the caller.
/// Accessors return owned snapshots so no shard lock is held across an
/// `.await`.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    slots: DashMap<String, Vec<Instance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the instances registered for `vrf`
    pub fn get(&self, vrf: &str) -> Vec<Instance> {
        self.slots
            .get(vrf)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Replace the instances registered for `vrf`
    pub fn replace(&self, vrf: &str, instances: Vec<Instance>) {
        self.slots.insert(vrf.to_string(), instances);
    }

    /// Drain the slot for `vrf`, leaving it empty
    pub fn take(&self, vrf: &str) -> Vec<Instance> {
        self.slots
            .get_mut(vrf)
            .map(|mut entry| std::mem::take(entry.value_mut()))
            .unwrap_or_default()
    }

    /// Drain every slot
    pub fn drain_all(&self) -> Vec<(String, Vec<Instance>)> {
        let vrfs = self.vrfs();
        vrfs.into_iter()
            .filter_map(|vrf| self.slots.remove(&vrf))
            .collect()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// VRFs that currently have a slot, sorted
    pub fn vrfs(&self) -> Vec<String> {
        let mut vrfs: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        vrfs.sort();
        vrfs
    }

    /// Total number of registered instances across all VRFs
    pub fn len(&self) -> usize {
        self.slots.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
