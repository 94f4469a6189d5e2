//! Registry record types

use crate::address;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A registered subnet, stored by its network address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: Uuid,
    pub name: String,
    pub subnet_ip: Ipv4Addr,
    pub subnet_mask: u8,
    pub created_at: i64,
}

impl Subnet {
    pub fn new(name: impl Into<String>, subnet_ip: Ipv4Addr, subnet_mask: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subnet_ip,
            subnet_mask,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Address the interface binds inside this subnet
    pub fn host_cidr(&self) -> Result<String> {
        address::host_cidr(self.subnet_ip, self.subnet_mask)
    }

    pub fn network_cidr(&self) -> String {
        address::network_cidr(self.subnet_ip, self.subnet_mask)
    }
}

/// A registered client (one WireGuard peer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub client_ip: Ipv4Addr,
    pub public_key: String,
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub subnet_id: Uuid,
    pub is_enabled: bool,
    pub created_at: i64,
}

impl Client {
    /// AllowedIPs value for this client's peer block
    pub fn allowed_ips(&self) -> String {
        format!("{}/32", self.client_ip)
    }
}
