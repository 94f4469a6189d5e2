//! Edits to the interface `Address =` list

use super::ConfigDocument;
use tracing::debug;
use wgsync_common::{Error, Result};

impl ConfigDocument {
    pub fn has_address(&self, cidr: &str) -> bool {
        self.interface.addresses.iter().any(|a| a == cidr)
    }

    pub fn add_address(&mut self, cidr: &str) -> Result<()> {
        if self.has_address(cidr) {
            return Err(Error::AddressAlreadyPresent {
                cidr: cidr.to_string(),
            });
        }
        self.interface.addresses.push(cidr.to_string());
        debug!("Added interface address {}", cidr);
        Ok(())
    }

    /// Returns whether the address was present
    pub fn remove_address(&mut self, cidr: &str) -> bool {
        let before = self.interface.addresses.len();
        self.interface.addresses.retain(|a| a != cidr);
        let removed = self.interface.addresses.len() != before;
        if removed {
            debug!("Removed interface address {}", cidr);
        }
        removed
    }

    /// Replace `old` in place, keeping its position in the list
    pub fn replace_address(&mut self, old: &str, new: &str) -> Result<()> {
        let idx = self
            .interface
            .addresses
            .iter()
            .position(|a| a == old)
            .ok_or_else(|| Error::AddressNotFound {
                cidr: old.to_string(),
            })?;
        if old != new && self.has_address(new) {
            return Err(Error::AddressAlreadyPresent {
                cidr: new.to_string(),
            });
        }
        self.interface.addresses[idx] = new.to_string();
        debug!("Replaced interface address {} with {}", old, new);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut doc = ConfigDocument::new("10.10.10.1/24");
        doc.add_address("10.0.5.1/24").unwrap();
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24", "10.0.5.1/24"]);

        let err = doc.add_address("10.0.5.1/24").unwrap_err();
        assert!(matches!(err, Error::AddressAlreadyPresent { .. }));

        assert!(doc.remove_address("10.0.5.1/24"));
        assert!(!doc.remove_address("10.0.5.1/24"));
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut doc = ConfigDocument::new("10.10.10.1/24");
        doc.add_address("10.0.5.1/24").unwrap();
        doc.add_address("10.0.6.1/24").unwrap();

        doc.replace_address("10.0.5.1/24", "10.0.7.1/24").unwrap();
        assert_eq!(
            doc.interface.addresses,
            vec!["10.10.10.1/24", "10.0.7.1/24", "10.0.6.1/24"]
        );
        assert!(doc.serialize().contains("Address = 10.10.10.1/24, 10.0.7.1/24, 10.0.6.1/24\n"));
    }

    #[test]
    fn test_replace_errors() {
        let mut doc = ConfigDocument::new("10.10.10.1/24");
        doc.add_address("10.0.5.1/24").unwrap();

        let err = doc.replace_address("10.0.9.1/24", "10.0.8.1/24").unwrap_err();
        assert_eq!(err.kind(), "address_not_found");

        let err = doc.replace_address("10.0.5.1/24", "10.10.10.1/24").unwrap_err();
        assert_eq!(err.kind(), "address_already_present");
    }

    #[test]
    fn test_peers_untouched() {
        let mut doc = ConfigDocument::new("10.10.10.1/24");
        doc.add_peer("A", "10.0.5.1/24").unwrap();
        doc.add_address("10.0.5.1/24").unwrap();
        doc.remove_address("10.0.5.1/24");
        assert_eq!(doc.find_peer("A").unwrap().allowed_ips, "10.0.5.1/24");
    }
}
