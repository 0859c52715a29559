//! VRRP definition and state types.
//!
//! Definitions arrive as a JSON array, either from a local configuration
//! commit or from the coordination store. Field names follow the CLI keywords;
//! the Go-style names used by older producers are accepted as aliases.

use crate::process::ProcessHandle;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Advertisement interval (seconds) used when a definition leaves it at zero.
pub const DEFAULT_ADVERT_INTERVAL: u32 = 10;

/// Role a virtual router starts in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Master,
    #[default]
    Backup,
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        if s == "master" { Role::Master } else { Role::Backup }
    }
}

impl Role {
    /// Lowercase name used in CLI lines and script names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Backup => "backup",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "MASTER"),
            Role::Backup => write!(f, "BACKUP"),
        }
    }
}

/// Virtual IP, optionally in prefix form (`10.0.0.1/24`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualAddress {
    pub address: IpAddr,
    pub prefix: Option<u8>,
}

impl FromStr for VirtualAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::decode(format!("invalid virtual address: {}", s));
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let address: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            None => None,
            Some(p) => match p.parse::<u8>() {
                Ok(p) if p <= max => Some(p),
                _ => return Err(invalid()),
            },
        };
        Ok(Self { address, prefix })
    }
}

impl TryFrom<String> for VirtualAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<VirtualAddress> for String {
    fn from(vip: VirtualAddress) -> Self {
        vip.to_string()
    }
}

impl From<IpAddr> for VirtualAddress {
    fn from(address: IpAddr) -> Self {
        Self { address, prefix: None }
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Some(prefix) => write!(f, "{}/{}", self.address, prefix),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Unicast peer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnicastPeer {
    #[serde(alias = "Address")]
    pub address: IpAddr,
}

/// One virtual router within a VRF
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VirtualRouterDefinition {
    /// Virtual Router ID, unique within the VRF
    #[serde(alias = "Vrid")]
    pub vrid: u8,

    #[serde(alias = "Interface")]
    pub interface: String,

    #[serde(alias = "Priority")]
    pub priority: u8,

    /// Advertisement interval in seconds, 0 selects the default
    #[serde(alias = "AdvertisementInterval")]
    pub advertisement_interval: u32,

    #[serde(alias = "Preempt")]
    pub preempt: bool,

    #[serde(alias = "State")]
    pub state: Role,

    #[serde(alias = "VirtualAddress", skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<VirtualAddress>,

    #[serde(alias = "UnicastPeerList", skip_serializing_if = "Vec::is_empty")]
    pub unicast_peer: Vec<UnicastPeer>,
}

impl VirtualRouterDefinition {
    /// Advertisement interval with the default applied
    pub fn effective_advert_interval(&self) -> u32 {
        if self.advertisement_interval == 0 {
            DEFAULT_ADVERT_INTERVAL
        } else {
            self.advertisement_interval
        }
    }
}

/// Decode a desired-state document.
///
/// `null` decodes as an empty list, which disables VRRP for the VRF.
pub fn decode_document(json: &str) -> Result<Vec<VirtualRouterDefinition>> {
    let defs: Option<Vec<VirtualRouterDefinition>> =
        serde_json::from_str(json).map_err(Error::decode)?;
    Ok(defs.unwrap_or_default())
}

/// Name of the VRF with the given numeric id, e.g. `vrf3`.
pub fn vrf_name(vrf_id: u32) -> String {
    format!("vrf{}", vrf_id)
}

/// Per-interface record published in the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedState {
    pub state: String,
    pub changed_at: i64,
}

/// A running (or failed to start) virtual router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub interface: String,
    pub vrid: u8,
    pub process: Option<ProcessHandle>,
}

/// Result of creating one instance during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOutcome {
    Started { vrid: u8, interface: String },
    Failed { vrid: u8, interface: String, reason: String },
}

impl InstanceOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, InstanceOutcome::Started { .. })
    }
}
