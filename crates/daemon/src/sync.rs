//! Registry-to-document synchronization
//!
//! Each `sync_*` call is exactly one [`ConfigStore`] transaction. Subnet
//! calls read the current subnet list from the registry on every call so
//! the isolation rules always reflect what is registered right now.

use crate::document::{ConfigDocument, HookDefaults};
use crate::keys::public_key_from_private;
use crate::store::ConfigStore;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use wgsync_common::{Error, Registry, Result, Subnet};

pub struct Synchronizer {
    store: ConfigStore,
    registry: Arc<dyn Registry>,
    hooks: HookDefaults,
}

impl Synchronizer {
    pub fn new(store: ConfigStore, registry: Arc<dyn Registry>, hooks: HookDefaults) -> Self {
        Self {
            store,
            registry,
            hooks,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Current document, read from disk
    pub async fn document(&self) -> Result<ConfigDocument> {
        self.store.load().await
    }

    /// Public key of the interface, derived from its PrivateKey line
    pub async fn server_public_key(&self) -> Result<String> {
        let document = self.store.load().await?;
        let private_key = document.interface.private_key.ok_or_else(|| {
            Error::MalformedDocument("[Interface] section has no PrivateKey".to_string())
        })?;
        public_key_from_private(&private_key)
    }

    /// Host CIDRs of every registered subnet except `exclude`
    fn other_subnet_hosts(&self, exclude: Uuid) -> Result<Vec<String>> {
        self.registry
            .list_subnets()?
            .iter()
            .filter(|s| s.id != exclude)
            .map(Subnet::host_cidr)
            .collect()
    }

    // ========================================================================
    // Peers
    // ========================================================================

    pub async fn sync_peer_added(&self, public_key: &str, allowed_ips: &str) -> Result<u64> {
        let committed = self
            .store
            .apply(|doc| doc.add_peer(public_key, allowed_ips))
            .await?;
        info!("Peer {} added ({})", public_key, allowed_ips);
        Ok(committed.revision)
    }

    pub async fn sync_peer_removed(&self, public_key: &str) -> Result<u64> {
        let committed = self
            .store
            .apply(|doc| Ok(doc.remove_peer(public_key)))
            .await?;
        if committed.value {
            info!("Peer {} removed", public_key);
        }
        Ok(committed.revision)
    }

    pub async fn sync_peer_allowed_ip_changed(&self, public_key: &str, allowed_ips: &str) -> Result<u64> {
        let committed = self
            .store
            .apply(|doc| doc.update_allowed_ips(public_key, allowed_ips))
            .await?;
        info!("Peer {} now allows {}", public_key, allowed_ips);
        Ok(committed.revision)
    }

    pub async fn sync_peer_enabled(&self, public_key: &str, allowed_ips: &str) -> Result<u64> {
        self.sync_peer_added(public_key, allowed_ips).await
    }

    pub async fn sync_peer_disabled(&self, public_key: &str) -> Result<u64> {
        self.sync_peer_removed(public_key).await
    }

    // ========================================================================
    // Subnets
    // ========================================================================

    /// Bind the subnet's host address and isolate it from every other subnet.
    /// The subnet list is read under the writer lock.
    pub async fn sync_subnet_added(&self, subnet: &Subnet) -> Result<u64> {
        let host = subnet.host_cidr()?;

        let committed = self
            .store
            .apply(|doc| {
                let existing = self.other_subnet_hosts(subnet.id)?;
                doc.add_address(&host)?;
                doc.on_subnet_added(&host, &existing)?;
                Ok(existing.len())
            })
            .await?;
        info!(
            "Subnet {} added as {} ({} other subnet(s))",
            subnet.name, host, committed.value
        );
        Ok(committed.revision)
    }

    /// Unbind the subnet, drop its isolation rules and the peers of its clients
    pub async fn sync_subnet_removed(&self, subnet: &Subnet, peer_keys: &[String]) -> Result<u64> {
        let host = subnet.host_cidr()?;

        let committed = self
            .store
            .apply(|doc| {
                let remaining = self.other_subnet_hosts(subnet.id)?;
                doc.remove_address(&host);
                doc.on_subnet_removed(&host, &remaining, &self.hooks);
                for key in peer_keys {
                    doc.remove_peer(key);
                }
                Ok(())
            })
            .await?;
        info!(
            "Subnet {} ({}) removed with {} peer(s)",
            subnet.name,
            host,
            peer_keys.len()
        );
        Ok(committed.revision)
    }

    pub async fn sync_subnet_address_changed(&self, old: &Subnet, new: &Subnet) -> Result<u64> {
        let old_host = old.host_cidr()?;
        let new_host = new.host_cidr()?;
        let committed = self
            .store
            .apply(|doc| doc.on_subnet_address_changed(&old_host, &new_host))
            .await?;
        info!("Subnet {} moved {} -> {}", new.name, old_host, new_host);
        Ok(committed.revision)
    }

    pub async fn sync_subnet_mask_changed(&self, old: &Subnet, new: &Subnet) -> Result<u64> {
        let old_host = old.host_cidr()?;
        let new_host = new.host_cidr()?;
        let committed = self
            .store
            .apply(|doc| doc.on_subnet_mask_changed(&old_host, &new_host))
            .await?;
        info!("Subnet {} resized {} -> {}", new.name, old_host, new_host);
        Ok(committed.revision)
    }
}
