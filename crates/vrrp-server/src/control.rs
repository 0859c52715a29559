//! Control socket: newline-delimited JSON requests and responses.

use crate::candidate::CandidateConfig;
use crate::types::{ControlRequest, ControlResponse, InstanceStatus, OutcomeReport, VrfStatus};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vrrp::{ClusterSync, CommandExecutor, Reconciler};

/// Dispatches control requests to the VRRP components
pub struct ControlHandler {
    reconciler: Reconciler,
    candidate: Arc<CandidateConfig>,
    cluster: ClusterSync,
    /// Serializes cluster-driven updates so their CLI lines never interleave
    cluster_lock: Mutex<()>,
}

impl ControlHandler {
    pub fn new(reconciler: Reconciler, candidate: Arc<CandidateConfig>, cluster: ClusterSync) -> Self {
        Self {
            reconciler,
            candidate,
            cluster,
            cluster_lock: Mutex::new(()),
        }
    }

    /// Handle one request
    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Commit { path, config } => {
                match self.candidate.apply_commit(&path, &config.to_string()).await {
                    Ok(outcomes) => ControlResponse::Committed {
                        outcomes: outcomes.into_iter().map(OutcomeReport::from).collect(),
                    },
                    Err(e) => ControlResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            ControlRequest::ExecLine { line } => match self.candidate.exec_line(&line).await {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            },
            ControlRequest::CommitCandidate => match self.candidate.commit().await {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            },
            ControlRequest::ClusterSync { vrf_id, vrrp } => {
                let _guard = self.cluster_lock.lock().await;
                self.cluster.sync_from_cluster(vrf_id, &vrrp).await;
                ControlResponse::Ok
            }
            ControlRequest::DeleteVrf { vrf_id } => {
                let _guard = self.cluster_lock.lock().await;
                self.cluster.delete_vrf(vrf_id).await;
                ControlResponse::Ok
            }
            ControlRequest::StopAll => {
                let _guard = self.cluster_lock.lock().await;
                self.candidate.stop_all().await;
                ControlResponse::Ok
            }
            ControlRequest::Status => ControlResponse::Status {
                vrfs: self.status(),
            },
        }
    }

    /// Stop every instance and clear the published state
    pub async fn shutdown(&self) {
        self.candidate.stop_all().await;
    }

    fn status(&self) -> Vec<VrfStatus> {
        let registry = self.reconciler.registry();
        registry
            .vrfs()
            .into_iter()
            .map(|vrf| VrfStatus {
                instances: registry
                    .get(&vrf)
                    .into_iter()
                    .map(|instance| InstanceStatus {
                        interface: instance.interface,
                        vrid: instance.vrid,
                        running: instance.process.is_some(),
                    })
                    .collect(),
                vrf,
            })
            .filter(|status| !status.instances.is_empty())
            .collect()
    }
}

/// Unix socket listener for control requests
pub struct ControlServer {
    socket_path: String,
    handler: Arc<ControlHandler>,
}

impl ControlServer {
    pub fn new(socket_path: String, handler: Arc<ControlHandler>) -> Self {
        Self {
            socket_path,
            handler,
        }
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        // Remove old socket if it exists
        if Path::new(&self.socket_path).exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(socket = %self.socket_path, "Control listener started");

        loop {
            let (stream, _) = listener.accept().await?;
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(handler, stream).await {
                    warn!(error = %e, "Control connection failed");
                }
            });
        }
    }

    async fn handle_connection(handler: Arc<ControlHandler>, stream: UnixStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("Control client disconnected");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Failed to read control request");
                    return Err(e);
                }
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
                Ok(request) => {
                    debug!(request = ?request, "Received control request");
                    handler.handle(request).await
                }
                Err(e) => {
                    warn!(error = %e, line = %line.trim(), "Failed to parse control request");
                    ControlResponse::Error {
                        message: format!("invalid request: {}", e),
                    }
                }
            };

            let mut json = serde_json::to_string(&response).map_err(std::io::Error::other)?;
            json.push('\n');
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await?;
        }
    }
}
