//! Registry boundary
//!
//! The registry is the durable source of truth for which subnets and
//! clients ought to exist. Callers never cache its answers across calls.

use crate::types::{Client, Subnet};
use crate::Result;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Lookups and writes against the subnet/client registry
pub trait Registry: Send + Sync {
    fn find_subnet_by_id(&self, id: Uuid) -> Result<Option<Subnet>>;
    fn find_subnet_by_ip(&self, ip: Ipv4Addr) -> Result<Option<Subnet>>;
    fn find_subnet_by_name(&self, name: &str) -> Result<Option<Subnet>>;
    fn list_subnets(&self) -> Result<Vec<Subnet>>;
    fn find_client_by_id(&self, id: Uuid) -> Result<Option<Client>>;
    fn list_clients_by_subnet(&self, subnet_id: Uuid) -> Result<Vec<Client>>;
    fn list_clients(&self) -> Result<Vec<Client>>;

    fn insert_subnet(&self, subnet: &Subnet) -> Result<()>;
    fn update_subnet(&self, subnet: &Subnet) -> Result<()>;
    /// Deletes the subnet together with its clients
    fn delete_subnet(&self, id: Uuid) -> Result<bool>;

    fn insert_client(&self, client: &Client) -> Result<()>;
    fn update_client(&self, client: &Client) -> Result<()>;
    fn delete_client(&self, id: Uuid) -> Result<bool>;
}
