//! Mirrors cluster-observed VRRP configuration into the local CLI.
//!
//! Configuration observed in the coordination store is replayed as
//! `set`/`delete` lines against the local configuration and committed, which
//! re-enters the [`Reconciler`](crate::Reconciler) through the commit path.

use crate::process::DaemonLauncher;
use crate::registry::InstanceRegistry;
use crate::store::StateStore;
use crate::types::{Instance, VirtualRouterDefinition, vrf_name};
use async_trait::async_trait;
use common::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local configuration CLI
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Apply one `set`/`delete` line to the candidate configuration
    async fn exec_line(&self, line: &str) -> Result<()>;

    /// Commit the candidate configuration
    async fn commit(&self) -> Result<()>;
}

fn delete_line(vrf_id: u32, vrid: u8) -> String {
    format!("delete vrf name vrf{} vrrp {}", vrf_id, vrid)
}

/// CLI lines that replace `existing` with `desired` for one VRF
pub fn sync_commands(
    vrf_id: u32,
    existing: &[Instance],
    desired: &[VirtualRouterDefinition],
) -> Vec<String> {
    let mut lines: Vec<String> = existing
        .iter()
        .map(|instance| delete_line(vrf_id, instance.vrid))
        .collect();

    for def in desired {
        let prefix = format!("set vrf name vrf{} vrrp {}", vrf_id, def.vrid);
        lines.push(prefix.clone());

        if !def.interface.is_empty() {
            lines.push(format!("{} interface {}", prefix, def.interface));
        }
        if def.advertisement_interval != 0 {
            lines.push(format!(
                "{} advertisement-interval {}",
                prefix, def.advertisement_interval
            ));
        }
        if def.preempt {
            lines.push(format!("{} preempt", prefix));
        }
        if def.priority != 0 {
            lines.push(format!("{} priority {}", prefix, def.priority));
        }
        lines.push(format!("{} state {}", prefix, def.state.as_str()));
        if let Some(vip) = def.virtual_address {
            lines.push(format!("{} virtual-address {}", prefix, vip));
        }
        for peer in &def.unicast_peer {
            lines.push(format!("{} unicast-peer {}", prefix, peer.address));
        }
    }
    lines
}

/// Applies cluster-driven VRRP changes through the local CLI
#[derive(Clone)]
pub struct ClusterSync {
    registry: Arc<InstanceRegistry>,
    launcher: DaemonLauncher,
    store: StateStore,
    cli: Arc<dyn CommandExecutor>,
}

impl ClusterSync {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        launcher: DaemonLauncher,
        store: StateStore,
        cli: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            registry,
            launcher,
            store,
            cli,
        }
    }

    /// Replace the local VRRP configuration of `vrf<vrf_id>` with `desired`
    pub async fn sync_from_cluster(&self, vrf_id: u32, desired: &[VirtualRouterDefinition]) {
        let existing = self.registry.get(&vrf_name(vrf_id));
        let lines = sync_commands(vrf_id, &existing, desired);

        debug!(vrf_id, lines = lines.len(), "Syncing VRRP configuration from cluster");
        for line in &lines {
            self.exec(line).await;
        }
        self.commit().await;
    }

    /// Remove every virtual router of `vrf<vrf_id>`.
    ///
    /// Instances are handled one at a time; a failure on one is logged and
    /// the others are still cleaned up.
    pub async fn delete_vrf(&self, vrf_id: u32) {
        let vrf = vrf_name(vrf_id);
        let instances = self.registry.get(&vrf);
        info!(vrf = %vrf, count = instances.len(), "Deleting VRRP configuration");

        for instance in instances {
            if let Some(handle) = &instance.process {
                self.launcher.stop(handle).await;
            }
            self.exec(&delete_line(vrf_id, instance.vrid)).await;
            self.commit().await;
            if let Err(e) = self.store.delete_interface_state(&instance.interface).await {
                warn!(interface = %instance.interface, error = %e, "Failed to delete VRRP state");
            }
        }
    }

    async fn exec(&self, line: &str) {
        if let Err(e) = self.cli.exec_line(line).await {
            warn!(line = %line, error = %e, "CLI command failed");
        }
    }

    async fn commit(&self) {
        if let Err(e) = self.cli.commit().await {
            warn!(error = %e, "Commit failed");
        }
    }
}
