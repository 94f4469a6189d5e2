//! IPv4 address arithmetic
//!
//! The registry stores subnets by their network address (`192.168.1.0/24`),
//! while the interface binds the first usable host inside each subnet
//! (`192.168.1.1/24`). Everything that touches the document goes through
//! [`host_cidr`] so both sides agree on the canonical host form.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(ip: &str) -> Result<Ipv4Addr> {
    ip.trim()
        .parse()
        .map_err(|_| Error::InvalidNetwork(format!("'{}' is not an IPv4 address", ip)))
}

/// Parse a CIDR string (`ip/mask`); host bits are allowed
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Network> {
    cidr.trim()
        .parse()
        .map_err(|e| Error::InvalidNetwork(format!("'{}': {}", cidr, e)))
}

fn network_of(ip: Ipv4Addr, mask: u8) -> Result<Ipv4Network> {
    if mask > 32 {
        return Err(Error::InvalidNetwork(format!(
            "mask {} is outside 0..=32",
            mask
        )));
    }
    Ipv4Network::new(ip, mask).map_err(|e| Error::InvalidNetwork(e.to_string()))
}

/// Build a network from a base address, rejecting addresses with host bits set
pub fn strict_network(ip: Ipv4Addr, mask: u8) -> Result<Ipv4Network> {
    let net = network_of(ip, mask)?;
    if net.network() != ip {
        return Err(Error::InvalidNetwork(format!(
            "{}/{} has host bits set (network base is {})",
            ip,
            mask,
            net.network()
        )));
    }
    Ok(net)
}

pub fn is_network_address(ip: Ipv4Addr, mask: u8) -> Result<bool> {
    Ok(network_of(ip, mask)?.network() == ip)
}

pub fn is_broadcast_address(ip: Ipv4Addr, mask: u8) -> Result<bool> {
    Ok(network_of(ip, mask)?.broadcast() == ip)
}

/// Strict membership test; `network/mask` must itself be a network base
pub fn contains(network: Ipv4Addr, mask: u8, ip: Ipv4Addr) -> Result<bool> {
    Ok(strict_network(network, mask)?.contains(ip))
}

/// Number of assignable hosts, excluding network and broadcast addresses
fn host_count(mask: u8) -> i64 {
    (1i64 << (32 - u32::from(mask))) - 2
}

/// First address after the network address
pub fn first_usable_host(network: Ipv4Addr, mask: u8) -> Result<Ipv4Addr> {
    let net = strict_network(network, mask)?;
    if host_count(mask) <= 0 {
        return Err(Error::NoUsableHost {
            network: format!("{}/{}", network, mask),
        });
    }
    Ok(Ipv4Addr::from(u32::from(net.network()) + 1))
}

/// The CIDR the interface binds for a subnet: first usable host plus mask
pub fn host_cidr(network: Ipv4Addr, mask: u8) -> Result<String> {
    let host = first_usable_host(network, mask)?;
    Ok(format!("{}/{}", host, mask))
}

/// Network CIDR in `ip/mask` form
pub fn network_cidr(network: Ipv4Addr, mask: u8) -> String {
    format!("{}/{}", network, mask)
}

/// Check that `ip` is an assignable host inside `network/mask`
pub fn validate_host_in_subnet(network: Ipv4Addr, mask: u8, ip: Ipv4Addr) -> Result<()> {
    let net = strict_network(network, mask)?;
    if !net.contains(ip) {
        return Err(Error::InvalidNetwork(format!(
            "{} is outside subnet {}",
            ip, net
        )));
    }
    if ip == net.network() {
        return Err(Error::InvalidNetwork(format!(
            "{} is the network address of {}",
            ip, net
        )));
    }
    if ip == net.broadcast() {
        return Err(Error::InvalidNetwork(format!(
            "{} is the broadcast address of {}",
            ip, net
        )));
    }
    Ok(())
}
