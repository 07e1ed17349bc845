//! Local network interface enumeration.

use std::net::Ipv4Addr;

use if_addrs::{get_if_addrs, IfAddr};
use tracing::{debug, warn};

/// IPv4 interface eligible for GVCP traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

impl NetworkInterface {
    /// `true` when `addr` lies in this interface's subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        same_subnet(self.ip, self.netmask, addr, self.netmask)
    }
}

/// Compare the network parts of two addresses, each under its own mask.
pub fn same_subnet(a: Ipv4Addr, a_mask: Ipv4Addr, b: Ipv4Addr, b_mask: Ipv4Addr) -> bool {
    u32::from(a) & u32::from(a_mask) == u32::from(b) & u32::from(b_mask)
}

/// Enumerate interfaces usable for GVCP: IPv4, up, not loopback, broadcast
/// capable (which rules out point-to-point links).
///
/// Enumeration failures are logged and yield an empty list.
pub fn detect_interfaces() -> Vec<NetworkInterface> {
    let addrs = match get_if_addrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!(?err, "unable to enumerate network interfaces");
            return Vec::new();
        }
    };
    let mut interfaces = Vec::new();
    for iface in addrs {
        let IfAddr::V4(v4) = &iface.addr else {
            continue;
        };
        if iface.is_loopback() {
            continue;
        }
        let Some(broadcast) = v4.broadcast else {
            debug!(name = %iface.name, "skipping interface without broadcast");
            continue;
        };
        if !is_running(&iface.name) {
            debug!(name = %iface.name, "skipping interface that is down");
            continue;
        }
        interfaces.push(NetworkInterface {
            name: iface.name.clone(),
            ip: v4.ip,
            netmask: v4.netmask,
            broadcast,
        });
    }
    interfaces
}

/// Interfaces restricted to the given names, in enumeration order.
pub fn detect_interfaces_named(names: &[String]) -> Vec<NetworkInterface> {
    detect_interfaces()
        .into_iter()
        .filter(|iface| names.iter().any(|n| n == &iface.name))
        .collect()
}

/// First interface whose subnet contains `addr`.
pub fn find_interface_for_address(addr: Ipv4Addr) -> Option<NetworkInterface> {
    detect_interfaces()
        .into_iter()
        .find(|iface| iface.contains(addr))
}

#[cfg(target_os = "linux")]
fn is_running(name: &str) -> bool {
    let path = format!("/sys/class/net/{name}/operstate");
    match std::fs::read_to_string(path) {
        Ok(state) => state.trim() != "down",
        // Aliases such as `eth0:1` have no sysfs entry.
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_running(_name: &str) -> bool {
    true
}

/// `true` when Linux strict reverse-path filtering is enabled on any
/// interface. Strict filtering drops replies from devices whose address lies
/// outside the receiving interface's subnet.
#[cfg(target_os = "linux")]
pub fn is_rp_filter_active() -> bool {
    let Ok(entries) = std::fs::read_dir("/proc/sys/net/ipv4/conf") else {
        return false;
    };
    entries.flatten().any(|entry| {
        std::fs::read_to_string(entry.path().join("rp_filter"))
            .map(|v| v.trim() == "1")
            .unwrap_or(false)
    })
}

#[cfg(not(target_os = "linux"))]
pub fn is_rp_filter_active() -> bool {
    false
}
