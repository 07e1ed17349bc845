//! Sanity checks for IP settings before they are sent to a device.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::nic::{detect_interfaces, NetworkInterface};

/// Reason a proposed IP configuration was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("no local interface shares a subnet with {0}")]
    NoCompatibleInterface(Ipv4Addr),
    #[error("netmask {given} does not match {expected} on interface {interface}")]
    NetmaskMismatch {
        interface: String,
        given: Ipv4Addr,
        expected: Ipv4Addr,
    },
    #[error("netmask {0} is not contiguous")]
    NonContiguousMask(Ipv4Addr),
    #[error("{0} is the network address of its subnet")]
    NetworkAddress(Ipv4Addr),
    #[error("{0} is the broadcast address of its subnet")]
    BroadcastAddress(Ipv4Addr),
    #[error("gateway {0} lies outside the subnet")]
    GatewayOutsideSubnet(Ipv4Addr),
}

/// Check `ip`/`subnet`/`gateway` against the local interfaces.
pub fn verify_settings(ip: Ipv4Addr, subnet: Ipv4Addr, gateway: Ipv4Addr) -> Result<(), SettingsError> {
    verify_settings_with(&detect_interfaces(), ip, subnet, gateway)
}

/// [`verify_settings`] against an explicit interface list.
pub fn verify_settings_with(
    interfaces: &[NetworkInterface],
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
) -> Result<(), SettingsError> {
    let iface = interfaces
        .iter()
        .find(|iface| iface.contains(ip))
        .ok_or(SettingsError::NoCompatibleInterface(ip))?;
    if iface.netmask != subnet {
        return Err(SettingsError::NetmaskMismatch {
            interface: iface.name.clone(),
            given: subnet,
            expected: iface.netmask,
        });
    }
    let mask = u32::from(subnet);
    if (!mask).wrapping_add(1).count_ones() != 1 {
        return Err(SettingsError::NonContiguousMask(subnet));
    }
    let host = u32::from(ip) & !mask;
    if host == 0 {
        return Err(SettingsError::NetworkAddress(ip));
    }
    if host == !mask {
        return Err(SettingsError::BroadcastAddress(ip));
    }
    if !gateway.is_unspecified() && u32::from(gateway) & mask != u32::from(ip) & mask {
        return Err(SettingsError::GatewayOutsideSubnet(gateway));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nics() -> Vec<NetworkInterface> {
        vec![NetworkInterface {
            name: "eth1".into(),
            ip: Ipv4Addr::new(192, 168, 10, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            broadcast: Ipv4Addr::new(192, 168, 10, 255),
        }]
    }

    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    #[test]
    fn accepts_valid_host() {
        verify_settings_with(
            &nics(),
            Ipv4Addr::new(192, 168, 10, 50),
            MASK,
            Ipv4Addr::new(192, 168, 10, 1),
        )
        .expect("valid");
    }

    #[test]
    fn rejects_foreign_subnet_and_mask_mismatch() {
        let err = verify_settings_with(&nics(), Ipv4Addr::new(10, 0, 0, 5), MASK, Ipv4Addr::UNSPECIFIED)
            .unwrap_err();
        assert_eq!(err, SettingsError::NoCompatibleInterface(Ipv4Addr::new(10, 0, 0, 5)));

        let err = verify_settings_with(
            &nics(),
            Ipv4Addr::new(192, 168, 10, 5),
            Ipv4Addr::new(255, 255, 0, 0),
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::NetmaskMismatch { .. }));
    }

    #[test]
    fn rejects_network_and_broadcast_hosts() {
        let err = verify_settings_with(&nics(), Ipv4Addr::new(192, 168, 10, 0), MASK, Ipv4Addr::UNSPECIFIED)
            .unwrap_err();
        assert!(matches!(err, SettingsError::NetworkAddress(_)));
        let err = verify_settings_with(&nics(), Ipv4Addr::new(192, 168, 10, 255), MASK, Ipv4Addr::UNSPECIFIED)
            .unwrap_err();
        assert!(matches!(err, SettingsError::BroadcastAddress(_)));
    }

    #[test]
    fn rejects_non_contiguous_mask() {
        let odd = Ipv4Addr::new(255, 0, 255, 0);
        let nics = vec![NetworkInterface {
            netmask: odd,
            ..nics().remove(0)
        }];
        let err = verify_settings_with(&nics, Ipv4Addr::new(192, 168, 10, 5), odd, Ipv4Addr::UNSPECIFIED)
            .unwrap_err();
        assert_eq!(err, SettingsError::NonContiguousMask(odd));
    }

    #[test]
    fn rejects_gateway_elsewhere() {
        let err = verify_settings_with(
            &nics(),
            Ipv4Addr::new(192, 168, 10, 5),
            MASK,
            Ipv4Addr::new(192, 168, 11, 1),
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::GatewayOutsideSubnet(_)));
    }
}
