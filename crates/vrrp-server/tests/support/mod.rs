//! Shared fixtures for server integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vrrp::{MemoryConnector, ProcessHandle, ProcessSpec, RenderPaths, StatePaths, Supervisor};
use vrrp_server::{ControlHandler, ServerConfig, StoreBackend, VrrpServer};

/// Supervisor that records specs instead of launching processes
#[derive(Default)]
pub struct FakeSupervisor {
    next: AtomicU64,
    running: Mutex<HashSet<u64>>,
    spawned: Mutex<Vec<ProcessSpec>>,
}

impl FakeSupervisor {
    pub fn running(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    pub fn spawned(&self) -> Vec<ProcessSpec> {
        self.spawned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn spawn(&self, spec: ProcessSpec) -> common::Result<ProcessHandle> {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ProcessHandle::new(id, spec.name.clone());
        self.spawned.lock().unwrap().push(spec);
        Ok(handle)
    }

    async fn register(&self, handle: &ProcessHandle) -> common::Result<()> {
        self.running.lock().unwrap().insert(handle.id());
        Ok(())
    }

    async fn unregister(&self, handle: &ProcessHandle) {
        self.running.lock().unwrap().remove(&handle.id());
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub store: MemoryConnector,
    pub supervisor: Arc<FakeSupervisor>,
    pub handler: Arc<ControlHandler>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            store_backend: StoreBackend::Memory,
            state_paths: StatePaths::default(),
            render_paths: RenderPaths {
                config_dir: dir.path().to_path_buf(),
                run_dir: dir.path().to_path_buf(),
                script_dir: dir.path().to_path_buf(),
                track_script: dir.path().join("track.sh"),
            },
            netns_exec: false,
            start_delay: Duration::from_millis(10),
            control_socket: dir.path().join("control.sock").display().to_string(),
            interfaces: HashMap::from([("eth0".to_string(), "10.0.0.0/24".to_string())]),
            ..ServerConfig::default()
        };

        let store = MemoryConnector::new();
        let supervisor = Arc::new(FakeSupervisor::default());
        let handler = Arc::new(VrrpServer::handler(
            &config,
            Arc::new(store.clone()),
            supervisor.clone(),
        ));

        Self {
            dir,
            config,
            store,
            supervisor,
            handler,
        }
    }

    pub fn config_file(&self, interface: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(format!("keepalived-{}.conf", interface)))
            .unwrap()
    }

    pub fn publish(&self, doc: serde_json::Value) {
        self.store.insert(
            &self.config.state_paths.state_path,
            serde_json::to_vec(&doc).unwrap(),
        );
    }

    pub fn published(&self) -> Option<serde_json::Value> {
        self.store
            .value(&self.config.state_paths.state_path)
            .map(|raw| serde_json::from_slice(&raw).unwrap())
    }
}
