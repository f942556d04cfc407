//! CIDR helpers

use headcni_core::{Error, Result};
use ipnet::IpNet;
use std::net::IpAddr;

/// First host address after the network address, if it is still inside
/// the subnet. A /32 or /128 has none.
pub fn first_usable_address(subnet: &IpNet) -> Option<IpAddr> {
    let candidate = match subnet.network() {
        IpAddr::V4(addr) => u32::from(addr).checked_add(1).map(|n| IpAddr::V4(n.into())),
        IpAddr::V6(addr) => u128::from(addr).checked_add(1).map(|n| IpAddr::V6(n.into())),
    }?;
    subnet.contains(&candidate).then_some(candidate)
}

/// Parse a single CIDR, masking host bits
pub fn parse_cidr(field: &str, value: &str) -> Result<IpNet> {
    value
        .trim()
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|source| Error::InvalidCidr {
            field: field.to_string(),
            value: value.trim().to_string(),
            source,
        })
}

/// Parse a comma-separated CIDR list, dropping blanks and exact duplicates
/// while keeping first-seen order.
pub fn parse_networks(field: &str, value: &str) -> Result<Vec<IpNet>> {
    let mut networks: Vec<IpNet> = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let net = parse_cidr(field, entry)?;
        if !networks.contains(&net) {
            networks.push(net);
        }
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_usable_v4() {
        assert_eq!(
            first_usable_address(&net("10.1.2.0/24")),
            Some("10.1.2.1".parse().unwrap())
        );
        // host bits are ignored
        assert_eq!(
            first_usable_address(&net("10.1.2.77/24")),
            Some("10.1.2.1".parse().unwrap())
        );
    }

    #[test]
    fn test_first_usable_carries_across_octets() {
        // 10.0.0.255 + 1 carries into 10.0.1.0, which is outside the /32
        assert_eq!(first_usable_address(&net("10.0.0.255/32")), None);
        assert_eq!(
            first_usable_address(&net("10.1.255.254/31")),
            Some("10.1.255.255".parse().unwrap())
        );
    }

    #[test]
    fn test_first_usable_host_routes() {
        assert_eq!(first_usable_address(&net("10.0.0.5/32")), None);
        assert_eq!(first_usable_address(&net("255.255.255.255/32")), None);
        assert_eq!(first_usable_address(&net("fd00::1/128")), None);
    }

    #[test]
    fn test_first_usable_v6() {
        assert_eq!(
            first_usable_address(&net("fd00:10:244::/64")),
            Some("fd00:10:244::1".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_networks_dedupes() {
        let nets = parse_networks("network", "10.0.0.0/8, 10.0.0.0/8,,192.168.0.0/16,10.0.0.0/8").unwrap();
        assert_eq!(nets, vec![net("10.0.0.0/8"), net("192.168.0.0/16")]);
    }

    #[test]
    fn test_parse_networks_same_ip_different_mask() {
        let nets = parse_networks("network", "10.0.0.0/8,10.0.0.0/16").unwrap();
        assert_eq!(nets.len(), 2);
    }

    #[test]
    fn test_parse_networks_rejects_garbage() {
        let err = parse_networks("ipv6_network", "fd00::/64,not-a-cidr").unwrap_err();
        assert!(err.to_string().contains("ipv6_network"));
        assert!(err.to_string().contains("not-a-cidr"));
    }
}
