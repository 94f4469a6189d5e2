//! Subnet and client management
//!
//! Every mutation validates its input, performs exactly one document
//! transaction through the [`Synchronizer`], then writes the registry.
//! The registry is queried fresh on every call. Mutations hold the
//! manager's write lock for that whole sequence, so a check made during
//! validation still holds when the registry write lands.

use crate::document::{ConfigDocument, PeerBlock};
use crate::keys::KeyProvisioner;
use crate::sync::Synchronizer;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;
use wgsync_common::address;
use wgsync_common::{Client, Error, Registry, Result, Subnet};

/// Keepalive written into every rendered client document
pub const CLIENT_KEEPALIVE_SECS: u16 = 25;

/// Server details published to clients
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub endpoint: Option<String>,
    pub dns: Option<String>,
}

pub struct NetworkManager {
    registry: Arc<dyn Registry>,
    sync: Arc<Synchronizer>,
    keys: Arc<dyn KeyProvisioner>,
    settings: ClientSettings,
    writes: Mutex<()>,
}

fn validated_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidConfig("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

impl NetworkManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        sync: Arc<Synchronizer>,
        keys: Arc<dyn KeyProvisioner>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            registry,
            sync,
            keys,
            settings,
            writes: Mutex::new(()),
        }
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get_subnet(&self, id: Uuid) -> Result<Subnet> {
        self.registry
            .find_subnet_by_id(id)?
            .ok_or_else(|| Error::not_found("subnet", id))
    }

    pub fn list_subnets(&self) -> Result<Vec<Subnet>> {
        self.registry.list_subnets()
    }

    pub fn get_client(&self, id: Uuid) -> Result<Client> {
        self.registry
            .find_client_by_id(id)?
            .ok_or_else(|| Error::not_found("client", id))
    }

    pub fn list_clients(&self, subnet_id: Option<Uuid>) -> Result<Vec<Client>> {
        match subnet_id {
            Some(id) => {
                self.get_subnet(id)?;
                self.registry.list_clients_by_subnet(id)
            }
            None => self.registry.list_clients(),
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    fn ensure_subnet_name_free(&self, name: &str, owner: Option<Uuid>) -> Result<()> {
        match self.registry.find_subnet_by_name(name)? {
            Some(existing) if Some(existing.id) != owner => Err(Error::already_exists("subnet", name)),
            _ => Ok(()),
        }
    }

    fn ensure_subnet_ip_free(&self, ip: Ipv4Addr, owner: Option<Uuid>) -> Result<()> {
        match self.registry.find_subnet_by_ip(ip)? {
            Some(existing) if Some(existing.id) != owner => Err(Error::already_exists("subnet", ip)),
            _ => Ok(()),
        }
    }

    /// Network base must be strict and leave room for the interface host
    fn validate_network(ip: Ipv4Addr, mask: u8) -> Result<()> {
        address::strict_network(ip, mask)?;
        address::first_usable_host(ip, mask)?;
        Ok(())
    }

    fn ensure_no_clients(&self, subnet: &Subnet) -> Result<()> {
        let clients = self.registry.list_clients_by_subnet(subnet.id)?;
        if !clients.is_empty() {
            return Err(Error::SubnetInUse {
                id: subnet.id.to_string(),
                clients: clients.len(),
            });
        }
        Ok(())
    }

    fn validate_client_ip(&self, subnet: &Subnet, ip: Ipv4Addr, owner: Option<Uuid>) -> Result<()> {
        address::validate_host_in_subnet(subnet.subnet_ip, subnet.subnet_mask, ip)?;
        let taken = self
            .registry
            .list_clients_by_subnet(subnet.id)?
            .into_iter()
            .any(|c| c.client_ip == ip && Some(c.id) != owner);
        if taken {
            return Err(Error::already_exists("client", ip));
        }
        Ok(())
    }

    // ========================================================================
    // Subnets
    // ========================================================================

    pub async fn create_subnet(&self, name: &str, subnet_ip: &str, subnet_mask: u8) -> Result<Subnet> {
        let _writes = self.writes.lock().await;
        let name = validated_name(name)?;
        let ip = address::parse_ipv4(subnet_ip)?;
        Self::validate_network(ip, subnet_mask)?;
        self.ensure_subnet_ip_free(ip, None)?;
        self.ensure_subnet_name_free(&name, None)?;

        let subnet = Subnet::new(name, ip, subnet_mask);
        self.sync.sync_subnet_added(&subnet).await?;
        if let Err(e) = self.registry.insert_subnet(&subnet) {
            error!("Registry insert for subnet {} failed: {}", subnet.name, e);
            if let Err(revert) = self.sync.sync_subnet_removed(&subnet, &[]).await {
                warn!("Could not revert document for subnet {}: {}", subnet.name, revert);
            }
            return Err(e);
        }

        info!("Created subnet {} ({})", subnet.name, subnet.network_cidr());
        Ok(subnet)
    }

    pub async fn rename_subnet(&self, id: Uuid, name: &str) -> Result<Subnet> {
        let _writes = self.writes.lock().await;
        let name = validated_name(name)?;
        let mut subnet = self.get_subnet(id)?;
        self.ensure_subnet_name_free(&name, Some(id))?;
        subnet.name = name;
        self.registry.update_subnet(&subnet)?;
        Ok(subnet)
    }

    pub async fn update_subnet_ip(&self, id: Uuid, subnet_ip: &str) -> Result<Subnet> {
        let _writes = self.writes.lock().await;
        let old = self.get_subnet(id)?;
        self.ensure_no_clients(&old)?;
        let ip = address::parse_ipv4(subnet_ip)?;
        Self::validate_network(ip, old.subnet_mask)?;
        self.ensure_subnet_ip_free(ip, Some(id))?;

        let mut new = old.clone();
        new.subnet_ip = ip;
        if new == old {
            return Ok(new);
        }
        self.sync.sync_subnet_address_changed(&old, &new).await?;
        self.registry.update_subnet(&new)?;
        info!("Subnet {} moved to {}", new.name, new.network_cidr());
        Ok(new)
    }

    pub async fn update_subnet_mask(&self, id: Uuid, subnet_mask: u8) -> Result<Subnet> {
        let _writes = self.writes.lock().await;
        let old = self.get_subnet(id)?;
        self.ensure_no_clients(&old)?;
        Self::validate_network(old.subnet_ip, subnet_mask)?;

        let mut new = old.clone();
        new.subnet_mask = subnet_mask;
        if new == old {
            return Ok(new);
        }
        self.sync.sync_subnet_mask_changed(&old, &new).await?;
        self.registry.update_subnet(&new)?;
        info!("Subnet {} resized to {}", new.name, new.network_cidr());
        Ok(new)
    }

    /// Removes the subnet, its clients and their peers
    pub async fn delete_subnet(&self, id: Uuid) -> Result<()> {
        let _writes = self.writes.lock().await;
        let subnet = self.get_subnet(id)?;
        let peer_keys: Vec<String> = self
            .registry
            .list_clients_by_subnet(id)?
            .into_iter()
            .filter(|c| c.is_enabled)
            .map(|c| c.public_key)
            .collect();

        self.sync.sync_subnet_removed(&subnet, &peer_keys).await?;
        self.registry.delete_subnet(id)?;
        info!("Deleted subnet {} and {} peer(s)", subnet.name, peer_keys.len());
        Ok(())
    }

    // ========================================================================
    // Clients
    // ========================================================================

    pub async fn create_client(&self, name: &str, subnet_id: Uuid, client_ip: &str) -> Result<Client> {
        let _writes = self.writes.lock().await;
        let name = validated_name(name)?;
        let subnet = self.get_subnet(subnet_id)?;
        let ip = address::parse_ipv4(client_ip)?;
        self.validate_client_ip(&subnet, ip, None)?;

        let pair = self.keys.generate_key_pair().await?;
        let client = Client {
            id: Uuid::new_v4(),
            name,
            client_ip: ip,
            public_key: pair.public_key,
            private_key: pair.private_key,
            subnet_id,
            is_enabled: true,
            created_at: chrono::Utc::now().timestamp(),
        };

        self.sync
            .sync_peer_added(&client.public_key, &client.allowed_ips())
            .await?;
        if let Err(e) = self.registry.insert_client(&client) {
            error!("Registry insert for client {} failed: {}", client.name, e);
            if let Err(revert) = self.sync.sync_peer_removed(&client.public_key).await {
                warn!("Could not revert peer for client {}: {}", client.name, revert);
            }
            return Err(e);
        }

        info!("Created client {} at {} in {}", client.name, ip, subnet.name);
        Ok(client)
    }

    pub async fn enable_client(&self, id: Uuid) -> Result<Client> {
        let _writes = self.writes.lock().await;
        let mut client = self.get_client(id)?;
        if client.is_enabled {
            return Ok(client);
        }
        self.sync
            .sync_peer_enabled(&client.public_key, &client.allowed_ips())
            .await?;
        client.is_enabled = true;
        self.registry.update_client(&client)?;
        info!("Enabled client {}", client.name);
        Ok(client)
    }

    pub async fn disable_client(&self, id: Uuid) -> Result<Client> {
        let _writes = self.writes.lock().await;
        let mut client = self.get_client(id)?;
        if !client.is_enabled {
            return Ok(client);
        }
        self.sync.sync_peer_disabled(&client.public_key).await?;
        client.is_enabled = false;
        self.registry.update_client(&client)?;
        info!("Disabled client {}", client.name);
        Ok(client)
    }

    pub async fn rename_client(&self, id: Uuid, name: &str) -> Result<Client> {
        let _writes = self.writes.lock().await;
        let name = validated_name(name)?;
        let mut client = self.get_client(id)?;
        client.name = name;
        self.registry.update_client(&client)?;
        Ok(client)
    }

    pub async fn update_client_ip(&self, id: Uuid, client_ip: &str) -> Result<Client> {
        let _writes = self.writes.lock().await;
        let mut client = self.get_client(id)?;
        let subnet = self.get_subnet(client.subnet_id)?;
        let ip = address::parse_ipv4(client_ip)?;
        self.validate_client_ip(&subnet, ip, Some(id))?;
        if ip == client.client_ip {
            return Ok(client);
        }

        client.client_ip = ip;
        // A disabled client has no peer block to rewrite
        if client.is_enabled {
            self.sync
                .sync_peer_allowed_ip_changed(&client.public_key, &client.allowed_ips())
                .await?;
        }
        self.registry.update_client(&client)?;
        info!("Client {} moved to {}", client.name, ip);
        Ok(client)
    }

    pub async fn delete_client(&self, id: Uuid) -> Result<()> {
        let _writes = self.writes.lock().await;
        let client = self.get_client(id)?;
        self.sync.sync_peer_removed(&client.public_key).await?;
        self.registry.delete_client(id)?;
        info!("Deleted client {}", client.name);
        Ok(())
    }

    /// wg-quick document for the client side of the tunnel
    pub async fn client_configuration(&self, id: Uuid) -> Result<String> {
        let client = self.get_client(id)?;
        let subnet = self.get_subnet(client.subnet_id)?;
        let server_key = self.sync.server_public_key().await?;

        let mut document = ConfigDocument::new(format!("{}/32", client.client_ip));
        document.interface.private_key = Some(client.private_key.clone());
        if let Some(dns) = &self.settings.dns {
            document.interface.extra.push(("DNS".to_string(), dns.clone()));
        }

        let mut peer = PeerBlock::new(server_key, subnet.network_cidr());
        if let Some(endpoint) = &self.settings.endpoint {
            peer.extra.push(("Endpoint".to_string(), endpoint.clone()));
        }
        peer.extra.push((
            "PersistentKeepalive".to_string(),
            CLIENT_KEEPALIVE_SECS.to_string(),
        ));
        document.peers.push(peer);

        Ok(document.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HookDefaults;
    use crate::keys::{BuiltinKeyProvisioner, WgKeyPair};
    use crate::store::{ConfigStore, InterfaceSeed};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use wgsync_common::Database;

    struct FailingKeys;

    #[async_trait]
    impl KeyProvisioner for FailingKeys {
        async fn generate_key_pair(&self) -> Result<WgKeyPair> {
            Err(Error::ProvisioningFailed("no key source".to_string()))
        }
    }

    async fn manager_with(keys: Arc<dyn KeyProvisioner>, settings: ClientSettings) -> (TempDir, NetworkManager) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_memory().unwrap();
        let registry: Arc<dyn Registry> = Arc::new(db);
        let store = ConfigStore::new(tmp.path().join("wg0.conf"), Duration::from_secs(5));
        let seed = InterfaceSeed {
            address: "10.10.10.1/24".to_string(),
            listen_port: 51830,
            hooks: HookDefaults::default(),
        };
        store.bootstrap(&BuiltinKeyProvisioner, &seed).await.unwrap();
        let sync = Arc::new(Synchronizer::new(store, registry.clone(), HookDefaults::default()));
        (tmp, NetworkManager::new(registry, sync, keys, settings))
    }

    async fn manager() -> (TempDir, NetworkManager) {
        manager_with(Arc::new(BuiltinKeyProvisioner), ClientSettings::default()).await
    }

    #[tokio::test]
    async fn test_create_subnet_validation() {
        let (_tmp, mgr) = manager().await;
        mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();

        let err = mgr.create_subnet("host", "192.168.2.5", 24).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_network");
        let err = mgr.create_subnet("wide", "192.168.3.0", 33).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_network");
        let err = mgr.create_subnet("tiny", "192.168.4.0", 31).await.unwrap_err();
        assert_eq!(err.kind(), "no_usable_host");
        let err = mgr.create_subnet("office", "192.168.5.0", 24).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
        let err = mgr.create_subnet("other", "192.168.1.0", 24).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
        let err = mgr.create_subnet("  ", "192.168.6.0", 24).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_config");

        assert_eq!(mgr.list_subnets().unwrap().len(), 1);
        let doc = mgr.synchronizer().document().await.unwrap();
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24", "192.168.1.1/24"]);
    }

    #[tokio::test]
    async fn test_client_allocation_boundaries() {
        let (_tmp, mgr) = manager().await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();

        for ip in ["192.168.1.0", "192.168.1.255", "192.168.2.10"] {
            let err = mgr.create_client("c", subnet.id, ip).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_network", "{}", ip);
        }
        mgr.create_client("first", subnet.id, "192.168.1.1").await.unwrap();
        mgr.create_client("last", subnet.id, "192.168.1.254").await.unwrap();

        let err = mgr.create_client("dup", subnet.id, "192.168.1.254").await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
        assert_eq!(mgr.synchronizer().document().await.unwrap().peers.len(), 2);
    }

    #[tokio::test]
    async fn test_topology_change_rejected_with_clients() {
        let (_tmp, mgr) = manager().await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();
        let client = mgr.create_client("laptop", subnet.id, "192.168.1.10").await.unwrap();

        let err = mgr.update_subnet_ip(subnet.id, "192.168.9.0").await.unwrap_err();
        assert_eq!(err.kind(), "subnet_in_use");
        let err = mgr.update_subnet_mask(subnet.id, 16).await.unwrap_err();
        assert_eq!(err.kind(), "subnet_in_use");

        mgr.delete_client(client.id).await.unwrap();
        let moved = mgr.update_subnet_ip(subnet.id, "192.168.9.0").await.unwrap();
        assert_eq!(moved.network_cidr(), "192.168.9.0/24");
        let resized = mgr.update_subnet_mask(subnet.id, 25).await.unwrap();
        assert_eq!(resized.network_cidr(), "192.168.9.0/25");

        let doc = mgr.synchronizer().document().await.unwrap();
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24", "192.168.9.1/25"]);
    }

    #[tokio::test]
    async fn test_subnet_moves_rewrite_isolation_rules() {
        let (_tmp, mgr) = manager().await;
        let a = mgr.create_subnet("a", "10.0.1.0", 24).await.unwrap();
        mgr.create_subnet("b", "10.0.2.0", 24).await.unwrap();

        mgr.update_subnet_ip(a.id, "10.0.3.0").await.unwrap();
        let rules = mgr.synchronizer().document().await.unwrap().isolation_rules();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.references("10.0.3.1/24")));
        assert!(!rules.iter().any(|r| r.references("10.0.1.1/24")));

        let err = mgr.update_subnet_mask(a.id, 23).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_network");
    }

    #[tokio::test]
    async fn test_enable_disable_cycle() {
        let (_tmp, mgr) = manager().await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();
        let client = mgr.create_client("laptop", subnet.id, "192.168.1.10").await.unwrap();

        let disabled = mgr.disable_client(client.id).await.unwrap();
        assert!(!disabled.is_enabled);
        mgr.disable_client(client.id).await.unwrap();
        assert!(mgr.synchronizer().document().await.unwrap().peers.is_empty());

        // Address changes on a disabled client only touch the registry
        mgr.update_client_ip(client.id, "192.168.1.20").await.unwrap();
        assert!(mgr.synchronizer().document().await.unwrap().peers.is_empty());

        let enabled = mgr.enable_client(client.id).await.unwrap();
        assert!(enabled.is_enabled);
        mgr.enable_client(client.id).await.unwrap();
        let doc = mgr.synchronizer().document().await.unwrap();
        assert_eq!(doc.peers.len(), 1);
        assert_eq!(doc.peers[0].allowed_ips, "192.168.1.20/32");
    }

    #[tokio::test]
    async fn test_update_client_ip_rewrites_peer() {
        let (_tmp, mgr) = manager().await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();
        let a = mgr.create_client("a", subnet.id, "192.168.1.10").await.unwrap();
        let b = mgr.create_client("b", subnet.id, "192.168.1.11").await.unwrap();

        let err = mgr.update_client_ip(a.id, "192.168.1.11").await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
        let err = mgr.update_client_ip(a.id, "192.168.1.255").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_network");

        mgr.update_client_ip(a.id, "192.168.1.12").await.unwrap();
        let doc = mgr.synchronizer().document().await.unwrap();
        assert_eq!(doc.find_peer(&a.public_key).unwrap().allowed_ips, "192.168.1.12/32");
        assert_eq!(doc.find_peer(&b.public_key).unwrap().allowed_ips, "192.168.1.11/32");
    }

    #[tokio::test]
    async fn test_delete_subnet_cascades() {
        let (_tmp, mgr) = manager().await;
        let a = mgr.create_subnet("a", "10.0.1.0", 24).await.unwrap();
        let b = mgr.create_subnet("b", "10.0.2.0", 24).await.unwrap();
        let c1 = mgr.create_client("c1", a.id, "10.0.1.10").await.unwrap();
        let c2 = mgr.create_client("c2", a.id, "10.0.1.11").await.unwrap();
        mgr.disable_client(c2.id).await.unwrap();
        let keep = mgr.create_client("keep", b.id, "10.0.2.10").await.unwrap();

        mgr.delete_subnet(a.id).await.unwrap();

        assert_eq!(mgr.get_subnet(a.id).unwrap_err().kind(), "not_found");
        assert_eq!(mgr.get_client(c1.id).unwrap_err().kind(), "not_found");
        assert_eq!(mgr.list_clients(None).unwrap().len(), 1);

        let doc = mgr.synchronizer().document().await.unwrap();
        assert_eq!(doc.peers.len(), 1);
        assert_eq!(doc.peers[0].public_key, keep.public_key);
        assert!(doc.isolation_rules().is_empty());
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24", "10.0.2.1/24"]);
    }

    #[tokio::test]
    async fn test_provisioning_failure_leaves_no_trace() {
        let (_tmp, mgr) = manager_with(Arc::new(FailingKeys), ClientSettings::default()).await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();
        let before = mgr.synchronizer().document().await.unwrap();

        let err = mgr.create_client("laptop", subnet.id, "192.168.1.10").await.unwrap_err();
        assert_eq!(err.kind(), "provisioning_failed");
        assert!(mgr.list_clients(Some(subnet.id)).unwrap().is_empty());
        assert_eq!(mgr.synchronizer().document().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_client_configuration() {
        let settings = ClientSettings {
            endpoint: Some("vpn.example.com:51830".to_string()),
            dns: Some("1.1.1.1".to_string()),
        };
        let (_tmp, mgr) = manager_with(Arc::new(BuiltinKeyProvisioner), settings).await;
        let subnet = mgr.create_subnet("office", "192.168.1.0", 24).await.unwrap();
        let client = mgr.create_client("laptop", subnet.id, "192.168.1.10").await.unwrap();
        let server_key = mgr.synchronizer().server_public_key().await.unwrap();

        let text = mgr.client_configuration(client.id).await.unwrap();
        let expected = format!(
            "[Interface]\nPrivateKey = {}\nAddress = 192.168.1.10/32\nDNS = 1.1.1.1\n\n\
             [Peer]\nPublicKey = {}\nAllowedIPs = 192.168.1.0/24\n\
             Endpoint = vpn.example.com:51830\nPersistentKeepalive = 25\n",
            client.private_key, server_key
        );
        assert_eq!(text, expected);

        let err = mgr.client_configuration(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
