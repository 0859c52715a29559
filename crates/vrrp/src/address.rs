//! Interface address lookup used to build virtual router display names.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// Resolves the network an interface is addressed in
pub trait InterfaceAddresses: Send + Sync {
    /// Network in CIDR form, e.g. `10.0.0.0/24`
    fn network(&self, interface: &str) -> Option<String>;
}

/// Addresses from static configuration (interface → `addr/prefix`)
#[derive(Debug, Clone, Default)]
pub struct StaticAddresses {
    addresses: HashMap<String, String>,
}

impl StaticAddresses {
    pub fn new(addresses: HashMap<String, String>) -> Self {
        Self { addresses }
    }
}

impl InterfaceAddresses for StaticAddresses {
    fn network(&self, interface: &str) -> Option<String> {
        let cidr = self.addresses.get(interface)?;
        let network = parse_network(cidr);
        if network.is_none() {
            warn!(interface = %interface, cidr = %cidr, "Failed to parse interface CIDR");
        }
        network
    }
}

/// Network address of a CIDR string, `10.1.2.3/24` → `10.1.2.0/24`
pub fn parse_network(cidr: &str) -> Option<String> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;

    let network = match addr {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return None;
            }
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return None;
            }
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    };
    Some(format!("{}/{}", network, prefix))
}

/// Display name of a virtual router: `vrrp<vrid>-<interface>-<network>`
pub fn router_name(vrid: u8, interface: &str, network: Option<&str>) -> String {
    format!("vrrp{}-{}-{}", vrid, interface, network.unwrap_or(""))
}
