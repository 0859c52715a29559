//! Reconciliation of desired virtual routers against running daemons.
//!
//! Every reconciliation of a VRF tears down all of its instances, retracts
//! their published state and then starts one daemon per desired definition.
//! Instances are never updated in place.

use crate::address::{InterfaceAddresses, router_name};
use crate::process::DaemonLauncher;
use crate::registry::InstanceRegistry;
use crate::render::ConfigRenderer;
use crate::store::StateStore;
use crate::types::{Instance, InstanceOutcome, VirtualRouterDefinition, decode_document};
use common::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives daemons and published state from desired-state documents
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<InstanceRegistry>,
    renderer: ConfigRenderer,
    launcher: DaemonLauncher,
    store: StateStore,
    addresses: Arc<dyn InterfaceAddresses>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        renderer: ConfigRenderer,
        launcher: DaemonLauncher,
        store: StateStore,
        addresses: Arc<dyn InterfaceAddresses>,
    ) -> Self {
        Self {
            registry,
            renderer,
            launcher,
            store,
            addresses,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn launcher(&self) -> &DaemonLauncher {
        &self.launcher
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Apply a committed VRRP document for the VRF named by `path[2]`.
    ///
    /// The document is decoded before anything is torn down, so a malformed
    /// document leaves the running instances untouched.
    pub async fn apply_commit(&self, path: &[String], json: &str) -> Result<Vec<InstanceOutcome>> {
        let desired = decode_document(json)?;

        let Some(vrf) = path.get(2) else {
            warn!(path = ?path, "VRRP commit path too short, ignoring");
            return Ok(Vec::new());
        };

        debug!(vrf = %vrf, count = desired.len(), "Applying VRRP commit");
        Ok(self.reconcile(vrf, &desired).await)
    }

    /// Replace every instance of `vrf` with instances for `desired`.
    ///
    /// Callers must not reconcile the same VRF concurrently.
    pub async fn reconcile(&self, vrf: &str, desired: &[VirtualRouterDefinition]) -> Vec<InstanceOutcome> {
        self.teardown(vrf).await;

        if desired.is_empty() {
            info!(vrf = %vrf, "VRRP disabled");
            return Vec::new();
        }

        let mut instances = Vec::with_capacity(desired.len());
        let mut outcomes = Vec::with_capacity(desired.len());
        for def in desired {
            let (instance, outcome) = self.create(vrf, def).await;
            instances.push(instance);
            outcomes.push(outcome);
        }
        self.registry.replace(vrf, instances);

        let started = outcomes.iter().filter(|o| o.is_started()).count();
        info!(vrf = %vrf, started, failed = outcomes.len() - started, "VRRP reconciled");
        outcomes
    }

    /// Stop every instance in every VRF and drop all published state
    pub async fn stop_all(&self) {
        for (vrf, instances) in self.registry.drain_all() {
            for instance in instances {
                if let Some(handle) = &instance.process {
                    self.launcher.stop(handle).await;
                }
            }
            debug!(vrf = %vrf, "Stopped VRRP instances");
        }

        if let Err(e) = self.store.clear_all().await {
            warn!(error = %e, "Failed to clear published VRRP state");
        }
    }

    async fn teardown(&self, vrf: &str) {
        for instance in self.registry.take(vrf) {
            debug!(vrf = %vrf, interface = %instance.interface, vrid = instance.vrid, "Clearing VRRP instance");
            if let Some(handle) = &instance.process {
                self.launcher.stop(handle).await;
            }
            if let Err(e) = self.store.delete_interface_state(&instance.interface).await {
                warn!(interface = %instance.interface, error = %e, "Failed to delete VRRP state");
            }
        }
    }

    async fn create(&self, vrf: &str, def: &VirtualRouterDefinition) -> (Instance, InstanceOutcome) {
        let network = self.addresses.network(&def.interface);
        let name = router_name(def.vrid, &def.interface, network.as_deref());

        let started = match self.renderer.prepare(def, vrf, &name).await {
            Ok(artifact) => self.launcher.start(&artifact).await,
            Err(e) => Err(e),
        };

        let (process, outcome) = match started {
            Ok(handle) => (
                Some(handle),
                InstanceOutcome::Started {
                    vrid: def.vrid,
                    interface: def.interface.clone(),
                },
            ),
            Err(e) => {
                warn!(vrf = %vrf, instance = %name, error = %e, "Failed to start VRRP instance");
                (
                    None,
                    InstanceOutcome::Failed {
                        vrid: def.vrid,
                        interface: def.interface.clone(),
                        reason: e.to_string(),
                    },
                )
            }
        };

        let instance = Instance {
            interface: def.interface.clone(),
            vrid: def.vrid,
            process,
        };
        (instance, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::StaticAddresses;
    use crate::process::{MockSupervisor, ProcessHandle};
    use crate::render::RenderPaths;
    use crate::store::{MemoryConnector, StateDocument, StatePaths};
    use crate::types::{PublishedState, Role};
    use common::Error;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn definition(vrid: u8, interface: &str) -> VirtualRouterDefinition {
        VirtualRouterDefinition {
            vrid,
            interface: interface.to_string(),
            priority: 100,
            state: Role::Master,
            virtual_address: Some("10.0.0.254".parse().unwrap()),
            ..Default::default()
        }
    }

    fn spawning(supervisor: &mut MockSupervisor) {
        let next = AtomicU64::new(1);
        supervisor
            .expect_spawn()
            .returning(move |spec| Ok(ProcessHandle::new(next.fetch_add(1, Ordering::SeqCst), spec.name)));
        supervisor.expect_register().returning(|_| Ok(()));
    }

    fn reconciler(supervisor: MockSupervisor, root: &Path, connector: &MemoryConnector) -> Reconciler {
        let paths = RenderPaths {
            config_dir: root.to_path_buf(),
            run_dir: root.to_path_buf(),
            script_dir: root.to_path_buf(),
            track_script: root.join("track.sh"),
        };
        let addresses = StaticAddresses::new(HashMap::from([(
            "eth0".to_string(),
            "10.0.0.1/24".to_string(),
        )]));

        Reconciler::new(
            Arc::new(InstanceRegistry::new()),
            ConfigRenderer::new(paths),
            DaemonLauncher::new(Arc::new(supervisor), "keepalived", Duration::from_secs(10)),
            StateStore::new(Arc::new(connector.clone()), StatePaths::default()),
            Arc::new(addresses),
        )
    }

    fn publish(connector: &MemoryConnector, interfaces: &[&str]) {
        let doc: StateDocument = interfaces
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    PublishedState {
                        state: "master".to_string(),
                        changed_at: 1,
                    },
                )
            })
            .collect();
        connector.insert(&StatePaths::default().state_path, serde_json::to_vec(&doc).unwrap());
    }

    fn published(connector: &MemoryConnector) -> Option<Vec<String>> {
        connector.value(&StatePaths::default().state_path).map(|raw| {
            let doc: StateDocument = serde_json::from_slice(&raw).unwrap();
            doc.into_keys().collect()
        })
    }

    fn commit_path(vrf: &str) -> Vec<String> {
        ["vrf", "name", vrf, "vrrp"].iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_starts_every_definition() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        spawning(&mut supervisor);
        let reconciler = reconciler(supervisor, dir.path(), &MemoryConnector::new());

        let outcomes = reconciler
            .reconcile("vrf1", &[definition(1, "eth0"), definition(2, "eth1")])
            .await;

        assert!(outcomes.iter().all(InstanceOutcome::is_started));
        let instances = reconciler.registry().get("vrf1");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].interface, "eth0");
        assert_eq!(instances[1].vrid, 2);
        assert!(instances.iter().all(|i| i.process.is_some()));

        let config = std::fs::read_to_string(dir.path().join("keepalived-eth0.conf")).unwrap();
        assert!(config.contains("vrrp_instance vrrp1-eth0-10.0.0.0/24 {"));
    }

    #[tokio::test]
    async fn test_empty_reconcile_tears_down_and_retracts_state() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::new();
        let mut supervisor = MockSupervisor::new();
        spawning(&mut supervisor);
        supervisor.expect_unregister().times(2).returning(|_| ());
        let reconciler = reconciler(supervisor, dir.path(), &connector);

        reconciler
            .reconcile("vrf1", &[definition(1, "eth0"), definition(2, "eth1")])
            .await;
        publish(&connector, &["eth0", "eth1", "eth9"]);

        let outcomes = reconciler.reconcile("vrf1", &[]).await;

        assert!(outcomes.is_empty());
        assert!(reconciler.registry().get("vrf1").is_empty());
        assert_eq!(published(&connector), Some(vec!["eth9".to_string()]));
        assert_eq!(connector.locks_granted(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded_without_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        supervisor.expect_spawn().returning(|spec| {
            if spec.name == "keepalived-eth0" {
                Err(Error::process("no such binary"))
            } else {
                Ok(ProcessHandle::new(9, spec.name))
            }
        });
        supervisor.expect_register().returning(|_| Ok(()));
        // Only the live instance is stopped on teardown.
        supervisor
            .expect_unregister()
            .withf(|handle| handle.id() == 9)
            .times(1)
            .returning(|_| ());
        let reconciler = reconciler(supervisor, dir.path(), &MemoryConnector::new());

        let outcomes = reconciler
            .reconcile("vrf1", &[definition(1, "eth0"), definition(2, "eth1")])
            .await;

        assert!(matches!(&outcomes[0], InstanceOutcome::Failed { vrid: 1, .. }));
        assert!(outcomes[1].is_started());
        let instances = reconciler.registry().get("vrf1");
        assert_eq!(instances.len(), 2);
        assert!(instances[0].process.is_none());

        reconciler.reconcile("vrf1", &[]).await;
        assert!(reconciler.registry().get("vrf1").is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_skips_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        supervisor.expect_spawn().times(0);
        let reconciler = reconciler(supervisor, &dir.path().join("missing"), &MemoryConnector::new());

        let outcomes = reconciler.reconcile("vrf1", &[definition(1, "eth0")]).await;

        assert!(matches!(&outcomes[0], InstanceOutcome::Failed { reason, .. } if reason.starts_with("Render error")));
        assert_eq!(reconciler.registry().get("vrf1").len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_twice_renders_identical_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        spawning(&mut supervisor);
        supervisor.expect_unregister().times(1).returning(|_| ());
        let reconciler = reconciler(supervisor, dir.path(), &MemoryConnector::new());
        let config_path = dir.path().join("keepalived-eth0.conf");

        reconciler.reconcile("vrf1", &[definition(1, "eth0")]).await;
        let first = std::fs::read_to_string(&config_path).unwrap();
        reconciler.reconcile("vrf1", &[definition(1, "eth0")]).await;
        let second = std::fs::read_to_string(&config_path).unwrap();

        assert_eq!(first, second);
        assert_eq!(reconciler.registry().get("vrf1").len(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_leaves_instances_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        spawning(&mut supervisor);
        supervisor.expect_unregister().times(0);
        let reconciler = reconciler(supervisor, dir.path(), &MemoryConnector::new());

        reconciler
            .apply_commit(&commit_path("vrf1"), r#"[{"vrid": 1, "interface": "eth0"}]"#)
            .await
            .unwrap();

        let err = reconciler
            .apply_commit(&commit_path("vrf1"), r#"[{"vrid": "one"}]"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(reconciler.registry().get("vrf1").len(), 1);
    }

    #[tokio::test]
    async fn test_short_commit_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = MockSupervisor::new();
        supervisor.expect_spawn().times(0);
        let reconciler = reconciler(supervisor, dir.path(), &MemoryConnector::new());

        let path = vec!["vrf".to_string(), "name".to_string()];
        let outcomes = reconciler
            .apply_commit(&path, r#"[{"vrid": 1, "interface": "eth0"}]"#)
            .await
            .unwrap();

        assert!(outcomes.is_empty());
        assert!(reconciler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::new();
        let mut supervisor = MockSupervisor::new();
        spawning(&mut supervisor);
        supervisor.expect_unregister().times(2).returning(|_| ());
        let reconciler = reconciler(supervisor, dir.path(), &connector);

        reconciler.reconcile("vrf1", &[definition(1, "eth0")]).await;
        reconciler.reconcile("vrf2", &[definition(1, "eth1")]).await;
        publish(&connector, &["eth0", "eth1"]);

        reconciler.stop_all().await;

        assert!(reconciler.registry().vrfs().is_empty());
        assert_eq!(published(&connector), None);
    }
}
