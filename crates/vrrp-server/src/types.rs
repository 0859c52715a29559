//! Types for the VRRP server and its control socket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use vrrp::{EtcdSettings, InstanceOutcome, RenderPaths, StatePaths, VirtualRouterDefinition};

/// Which coordination store backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Etcd,
    /// In-process store for single-node deployments
    Memory,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub store_backend: StoreBackend,

    /// etcd connection settings
    pub etcd: EtcdSettings,

    /// Lock and state document paths
    pub state_paths: StatePaths,

    /// Generated file layout
    pub render_paths: RenderPaths,

    /// keepalived binary
    pub daemon_binary: String,

    /// Start daemons through `ip netns exec <vrf>`
    pub netns_exec: bool,

    /// Delay before restarting an exited daemon
    pub start_delay: Duration,

    /// Control socket path
    pub control_socket: String,

    /// Interface → CIDR, used for instance names
    pub interfaces: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Etcd,
            etcd: EtcdSettings::default(),
            state_paths: StatePaths::default(),
            render_paths: RenderPaths::default(),
            daemon_binary: "keepalived".to_string(),
            netns_exec: true,
            start_delay: Duration::from_secs(10),
            control_socket: "/var/run/vrrp-server.sock".to_string(),
            interfaces: HashMap::new(),
        }
    }
}

/// Request received on the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Committed VRRP document from the local commit pipeline
    Commit {
        path: Vec<String>,
        config: serde_json::Value,
    },

    /// Apply one line to the candidate configuration
    ExecLine { line: String },

    /// Commit the candidate configuration
    CommitCandidate,

    /// VRRP configuration of a VRF observed in the cluster
    ClusterSync {
        vrf_id: u32,
        #[serde(default)]
        vrrp: Vec<VirtualRouterDefinition>,
    },

    /// Remove all virtual routers of a VRF
    DeleteVrf { vrf_id: u32 },

    /// Stop every instance
    StopAll,

    /// Report registered instances
    Status,
}

/// Response written to the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,

    Committed { outcomes: Vec<OutcomeReport> },

    Status { vrfs: Vec<VrfStatus> },

    Error { message: String },
}

/// Serializable view of an [`InstanceOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub vrid: u8,
    pub interface: String,
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<InstanceOutcome> for OutcomeReport {
    fn from(outcome: InstanceOutcome) -> Self {
        match outcome {
            InstanceOutcome::Started { vrid, interface } => Self {
                vrid,
                interface,
                started: true,
                reason: None,
            },
            InstanceOutcome::Failed {
                vrid,
                interface,
                reason,
            } => Self {
                vrid,
                interface,
                started: false,
                reason: Some(reason),
            },
        }
    }
}

/// Instances registered for one VRF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfStatus {
    pub vrf: String,
    pub instances: Vec<InstanceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub interface: String,
    pub vrid: u8,
    pub running: bool,
}
