//! VRRP server
//!
//! Long-running service that owns the keepalived instances of every VRF on
//! this node.
//!
//! # Components
//!
//! - **Candidate**: candidate/committed configuration edited line by line
//! - **Control**: newline-delimited JSON over a Unix socket
//! - **Server**: wires the reconciler, state store and cluster sync together
//!
//! Commits, cluster syncs and shutdown all funnel into [`vrrp::Reconciler`].

pub mod candidate;
pub mod config;
pub mod control;
pub mod server;
pub mod types;

pub use candidate::CandidateConfig;
pub use config::{Config, ConfigError};
pub use control::{ControlHandler, ControlServer};
pub use server::VrrpServer;
pub use types::{ControlRequest, ControlResponse, ServerConfig, StoreBackend};
