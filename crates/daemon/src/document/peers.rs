//! Peer block edits, keyed by public key

use super::{ConfigDocument, PeerBlock};
use tracing::debug;
use wgsync_common::{Error, Result};

impl ConfigDocument {
    pub fn find_peer(&self, public_key: &str) -> Option<&PeerBlock> {
        self.peers.iter().find(|p| p.public_key == public_key)
    }

    /// Append a new peer block
    pub fn add_peer(&mut self, public_key: &str, allowed_ips: &str) -> Result<()> {
        if self.find_peer(public_key).is_some() {
            return Err(Error::DuplicatePeer {
                public_key: public_key.to_string(),
            });
        }
        self.peers.push(PeerBlock::new(public_key, allowed_ips));
        debug!("Added peer {} ({})", public_key, allowed_ips);
        Ok(())
    }

    /// Remove the peer block for `public_key`; returns whether one was removed
    pub fn remove_peer(&mut self, public_key: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.public_key != public_key);
        let removed = self.peers.len() != before;
        if removed {
            debug!("Removed peer {}", public_key);
        }
        removed
    }

    pub fn update_allowed_ips(&mut self, public_key: &str, allowed_ips: &str) -> Result<()> {
        let peer = self
            .peers
            .iter_mut()
            .find(|p| p.public_key == public_key)
            .ok_or_else(|| Error::PeerNotFound {
                public_key: public_key.to_string(),
            })?;
        debug!(
            "Peer {}: AllowedIPs {} -> {}",
            public_key, peer.allowed_ips, allowed_ips
        );
        peer.allowed_ips = allowed_ips.to_string();
        Ok(())
    }
}
