//! Main VRRP server implementation.

use crate::candidate::CandidateConfig;
use crate::control::{ControlHandler, ControlServer};
use crate::types::{ServerConfig, StoreBackend};
use std::sync::Arc;
use tracing::{info, warn};
use vrrp::{
    ClusterSync, ConfigRenderer, DaemonLauncher, EtcdConnector, InstanceRegistry,
    MemoryConnector, ProcessSupervisor, Reconciler, StateStore, StaticAddresses, StoreConnector,
    Supervisor,
};

/// VRRP server
pub struct VrrpServer {
    config: ServerConfig,
}

impl VrrpServer {
    /// Create a new VRRP server
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Wire the components on top of `connector` and `supervisor`
    pub fn handler(
        config: &ServerConfig,
        connector: Arc<dyn StoreConnector>,
        supervisor: Arc<dyn Supervisor>,
    ) -> ControlHandler {
        let registry = Arc::new(InstanceRegistry::new());
        let launcher = DaemonLauncher::new(
            supervisor,
            config.daemon_binary.clone(),
            config.start_delay,
        );
        let store = StateStore::new(connector, config.state_paths.clone());
        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            ConfigRenderer::new(config.render_paths.clone()),
            launcher.clone(),
            store.clone(),
            Arc::new(StaticAddresses::new(config.interfaces.clone())),
        );

        let candidate = Arc::new(CandidateConfig::new(reconciler.clone()));
        let cluster = ClusterSync::new(registry, launcher, store, candidate.clone());

        ControlHandler::new(reconciler, candidate, cluster)
    }

    /// Run the server until interrupted
    pub async fn run(self) -> anyhow::Result<()> {
        info!(backend = ?self.config.store_backend, "Starting VRRP server");

        let connector: Arc<dyn StoreConnector> = match self.config.store_backend {
            StoreBackend::Etcd => Arc::new(EtcdConnector::new(self.config.etcd.clone())),
            StoreBackend::Memory => Arc::new(MemoryConnector::new()),
        };
        let supervisor: Arc<dyn Supervisor> = Arc::new(ProcessSupervisor::new(self.config.netns_exec));

        let handler = Arc::new(Self::handler(&self.config, connector, supervisor));
        let control = ControlServer::new(self.config.control_socket.clone(), Arc::clone(&handler));

        let control_handle = tokio::spawn(async move {
            if let Err(e) = control.run().await {
                warn!(error = %e, "Control listener error");
            }
        });

        info!("Server running");

        tokio::select! {
            _ = control_handle => {
                info!("Control listener completed");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown requested");
            }
        }

        handler.shutdown().await;

        if let Err(e) = std::fs::remove_file(&self.config.control_socket) {
            warn!(error = %e, "Failed to remove control socket");
        }

        info!("VRRP server stopped");
        Ok(())
    }
}
