//! VRRP instance management for multi-VRF routers.
//!
//! Keeps one keepalived daemon per configured virtual router and keeps the
//! cluster-wide view of per-interface VRRP state consistent.
//!
//! # Components
//!
//! - **InstanceRegistry**: VRF → running instances
//! - **Reconciler**: tears down and recreates a VRF's instances from a
//!   desired-state document
//! - **ConfigRenderer** / **DaemonLauncher**: keepalived configuration and
//!   process lifecycle
//! - **StateStore**: lock-protected updates of the published state document
//! - **ClusterSync**: replays cluster configuration through the local CLI
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vrrp::{
//!     ConfigRenderer, DaemonLauncher, InstanceRegistry, MemoryConnector, ProcessSupervisor,
//!     Reconciler, StateStore, StatePaths, StaticAddresses,
//! };
//!
//! # async fn example() -> common::Result<()> {
//! let supervisor = Arc::new(ProcessSupervisor::new(true));
//! let reconciler = Reconciler::new(
//!     Arc::new(InstanceRegistry::new()),
//!     ConfigRenderer::default(),
//!     DaemonLauncher::new(supervisor, "keepalived", Duration::from_secs(10)),
//!     StateStore::new(Arc::new(MemoryConnector::new()), StatePaths::default()),
//!     Arc::new(StaticAddresses::default()),
//! );
//!
//! let path: Vec<String> = ["vrf", "name", "vrf1", "vrrp"].map(String::from).to_vec();
//! reconciler
//!     .apply_commit(&path, r#"[{"vrid": 1, "interface": "eth0", "state": "master"}]"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod cli_sync;
pub mod process;
pub mod reconciler;
pub mod registry;
pub mod render;
pub mod store;
pub mod types;

pub use address::{InterfaceAddresses, StaticAddresses};
pub use cli_sync::{ClusterSync, CommandExecutor};
pub use process::{DaemonLauncher, ProcessHandle, ProcessSpec, ProcessSupervisor, Supervisor};
pub use reconciler::Reconciler;
pub use registry::InstanceRegistry;
pub use render::{ConfigArtifact, ConfigRenderer, RenderPaths};
pub use store::{
    EtcdConnector, EtcdSettings, MemoryConnector, StatePaths, StateStore, StoreConnection,
    StoreConnector,
};
pub use types::{
    Instance, InstanceOutcome, PublishedState, Role, UnicastPeer, VirtualAddress,
    VirtualRouterDefinition, decode_document, vrf_name,
};
