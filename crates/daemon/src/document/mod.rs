//! WireGuard interface document
//!
//! Structured form of the `wg-quick` text the network daemon reads:
//! one `[Interface]` section followed by zero or more `[Peer]` blocks.
//! Every edit operates on these fields; the text is only produced by
//! [`ConfigDocument::serialize`].
//!
//! Grammar accepted by [`ConfigDocument::parse`]:
//! - `[Interface]` / `[Peer]` section headers
//! - `Key = value` lines (the first `=` splits, so base64 padding survives)
//! - blank lines, which close the current block
//! - `#` comment lines, which are dropped

mod addresses;
mod isolation;
mod peers;

pub use isolation::{HookDefaults, IsolationRule};

use std::fmt;
use std::str::FromStr;
use tracing::debug;
use wgsync_common::{Error, Result};

/// The `[Interface]` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSection {
    pub private_key: Option<String>,
    /// `Address =` entries, in document order
    pub addresses: Vec<String>,
    pub listen_port: Option<u16>,
    pub post_up: Vec<String>,
    pub post_down: Vec<String>,
    /// Unrecognised `Key = value` lines, kept in order
    pub extra: Vec<(String, String)>,
}

/// One `[Peer]` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlock {
    pub public_key: String,
    pub allowed_ips: String,
    pub extra: Vec<(String, String)>,
}

impl PeerBlock {
    pub fn new(public_key: impl Into<String>, allowed_ips: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            allowed_ips: allowed_ips.into(),
            extra: Vec::new(),
        }
    }
}

/// In-memory interface document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    pub interface: InterfaceSection,
    pub peers: Vec<PeerBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

#[derive(Default)]
struct PeerDraft {
    line: usize,
    public_key: Option<String>,
    allowed_ips: Option<String>,
    extra: Vec<(String, String)>,
}

impl PeerDraft {
    fn finish(self) -> Result<PeerBlock> {
        let public_key = self.public_key.ok_or_else(|| {
            Error::MalformedDocument(format!("peer at line {} has no PublicKey", self.line))
        })?;
        let allowed_ips = self.allowed_ips.ok_or_else(|| {
            Error::MalformedDocument(format!("peer at line {} has no AllowedIPs", self.line))
        })?;
        Ok(PeerBlock {
            public_key,
            allowed_ips,
            extra: self.extra,
        })
    }
}

fn close_peer(draft: &mut Option<PeerDraft>, peers: &mut Vec<PeerBlock>) -> Result<()> {
    if let Some(d) = draft.take() {
        let block = d.finish()?;
        if peers.iter().any(|p| p.public_key == block.public_key) {
            return Err(Error::MalformedDocument(format!(
                "public key {} appears in more than one peer",
                block.public_key
            )));
        }
        peers.push(block);
    }
    Ok(())
}

fn split_list(value: &str, separator: char) -> impl Iterator<Item = String> + '_ {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
}

impl ConfigDocument {
    /// Minimal document with a single interface address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            interface: InterfaceSection {
                addresses: vec![address.into()],
                ..Default::default()
            },
            peers: Vec::new(),
        }
    }

    /// Parse document text
    pub fn parse(text: &str) -> Result<Self> {
        let mut interface: Option<InterfaceSection> = None;
        let mut saw_address = false;
        let mut peers: Vec<PeerBlock> = Vec::new();
        let mut draft: Option<PeerDraft> = None;
        let mut section = Section::None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();

            if line.is_empty() {
                close_peer(&mut draft, &mut peers)?;
                section = Section::None;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                close_peer(&mut draft, &mut peers)?;
                match line {
                    "[Interface]" => {
                        if interface.is_some() {
                            return Err(Error::MalformedDocument(format!(
                                "second [Interface] section at line {}",
                                lineno
                            )));
                        }
                        interface = Some(InterfaceSection::default());
                        section = Section::Interface;
                    }
                    "[Peer]" => {
                        draft = Some(PeerDraft {
                            line: lineno,
                            ..Default::default()
                        });
                        section = Section::Peer;
                    }
                    other => {
                        return Err(Error::MalformedDocument(format!(
                            "unknown section {} at line {}",
                            other, lineno
                        )));
                    }
                }
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::MalformedDocument(format!("expected 'Key = value' at line {}", lineno))
            })?;
            let key = key.trim();
            let value = value.trim();

            match section {
                Section::None => {
                    return Err(Error::MalformedDocument(format!(
                        "'{}' at line {} is outside any section",
                        key, lineno
                    )));
                }
                Section::Interface => {
                    let iface = interface
                        .as_mut()
                        .ok_or_else(|| Error::Internal("interface section missing".to_string()))?;
                    match key.to_ascii_lowercase().as_str() {
                        "privatekey" => iface.private_key = Some(value.to_string()),
                        "address" => {
                            saw_address = true;
                            iface.addresses.extend(split_list(value, ','));
                        }
                        "listenport" => {
                            let port = value.parse().map_err(|_| {
                                Error::MalformedDocument(format!(
                                    "ListenPort '{}' at line {} is not a port number",
                                    value, lineno
                                ))
                            })?;
                            iface.listen_port = Some(port);
                        }
                        "postup" => iface.post_up.extend(split_list(value, ';')),
                        "postdown" => iface.post_down.extend(split_list(value, ';')),
                        _ => iface.extra.push((key.to_string(), value.to_string())),
                    }
                }
                Section::Peer => {
                    let peer = draft
                        .as_mut()
                        .ok_or_else(|| Error::Internal("peer draft missing".to_string()))?;
                    match key.to_ascii_lowercase().as_str() {
                        "publickey" => peer.public_key = Some(value.to_string()),
                        "allowedips" => peer.allowed_ips = Some(value.to_string()),
                        _ => peer.extra.push((key.to_string(), value.to_string())),
                    }
                }
            }
        }
        close_peer(&mut draft, &mut peers)?;

        let interface = interface
            .ok_or_else(|| Error::MalformedDocument("missing [Interface] section".to_string()))?;
        if !saw_address {
            return Err(Error::MalformedDocument(
                "[Interface] section has no Address line".to_string(),
            ));
        }

        debug!(
            "Parsed document: {} address(es), {} peer(s)",
            interface.addresses.len(),
            peers.len()
        );
        Ok(Self { interface, peers })
    }

    /// Render document text
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl FromStr for ConfigDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.interface;
        writeln!(f, "[Interface]")?;
        if let Some(key) = &iface.private_key {
            writeln!(f, "PrivateKey = {}", key)?;
        }
        writeln!(f, "Address = {}", iface.addresses.join(", "))?;
        if let Some(port) = iface.listen_port {
            writeln!(f, "ListenPort = {}", port)?;
        }
        if !iface.post_up.is_empty() {
            writeln!(f, "PostUp = {}", iface.post_up.join("; "))?;
        }
        if !iface.post_down.is_empty() {
            writeln!(f, "PostDown = {}", iface.post_down.join("; "))?;
        }
        for (key, value) in &iface.extra {
            writeln!(f, "{} = {}", key, value)?;
        }

        for peer in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            writeln!(f, "PublicKey = {}", peer.public_key)?;
            writeln!(f, "AllowedIPs = {}", peer.allowed_ips)?;
            for (key, value) in &peer.extra {
                writeln!(f, "{} = {}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Interface]
PrivateKey = cHJpdmF0ZS1rZXktbWF0ZXJpYWwtZm9yLXRlc3RzIQ=
Address = 10.10.10.1/24, 10.0.5.1/24
ListenPort = 51830
PostUp = iptables -A FORWARD -i %i -j ACCEPT; iptables -t nat -A POSTROUTING -o ens3 -j MASQUERADE
PostDown = iptables -D FORWARD -i %i -j ACCEPT; iptables -t nat -D POSTROUTING -o ens3 -j MASQUERADE

[Peer]
PublicKey = peerA=
AllowedIPs = 10.0.5.10/32

[Peer]
PublicKey = peerB=
AllowedIPs = 10.0.5.11/32
PersistentKeepalive = 25
";

    #[test]
    fn test_parse_sample() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        assert_eq!(
            doc.interface.private_key.as_deref(),
            Some("cHJpdmF0ZS1rZXktbWF0ZXJpYWwtZm9yLXRlc3RzIQ=")
        );
        assert_eq!(doc.interface.addresses, vec!["10.10.10.1/24", "10.0.5.1/24"]);
        assert_eq!(doc.interface.listen_port, Some(51830));
        assert_eq!(doc.interface.post_up.len(), 2);
        assert_eq!(
            doc.interface.post_down[1],
            "iptables -t nat -D POSTROUTING -o ens3 -j MASQUERADE"
        );
        assert_eq!(doc.peers.len(), 2);
        assert_eq!(doc.peers[0].public_key, "peerA=");
        assert_eq!(
            doc.peers[1].extra,
            vec![("PersistentKeepalive".to_string(), "25".to_string())]
        );
    }

    #[test]
    fn test_serialize_is_byte_exact() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.serialize(), SAMPLE);
    }

    #[test]
    fn test_round_trip() {
        let mut doc = ConfigDocument::new("10.10.10.1/24");
        doc.interface.listen_port = Some(51830);
        doc.add_peer("k1", "10.10.10.2/32").unwrap();
        doc.add_peer("k2", "10.10.10.3/32").unwrap();
        doc.add_address("10.0.5.1/24").unwrap();

        let text = doc.serialize();
        let reparsed = ConfigDocument::parse(&text).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.serialize(), text);
    }

    #[test]
    fn test_comments_are_dropped() {
        let text = "# managed by wgsync\n[Interface]\nAddress = 10.0.0.1/24\n# trailing\n";
        let doc: ConfigDocument = text.parse().unwrap();
        assert_eq!(doc.serialize(), "[Interface]\nAddress = 10.0.0.1/24\n");
    }

    #[test]
    fn test_missing_interface() {
        let err = ConfigDocument::parse("[Peer]\nPublicKey = a\nAllowedIPs = 10.0.0.2/32\n")
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_document");
    }

    #[test]
    fn test_missing_address() {
        let err = ConfigDocument::parse("[Interface]\nListenPort = 51830\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(ConfigDocument::parse("[Interface]\nAddress = 10.0.0.1/24\nbogus\n").is_err());
        assert!(ConfigDocument::parse("[Interface]\nAddress = 10.0.0.1/24\n[Wat]\n").is_err());
        assert!(ConfigDocument::parse("[Interface]\nAddress = 10.0.0.1/24\nListenPort = x\n").is_err());
        assert!(ConfigDocument::parse("[Interface]\nAddress = 10.0.0.1/24\n\nDNS = 1.1.1.1\n").is_err());
    }

    #[test]
    fn test_incomplete_or_duplicate_peer() {
        let missing = "[Interface]\nAddress = 10.0.0.1/24\n\n[Peer]\nPublicKey = a\n";
        assert!(ConfigDocument::parse(missing).is_err());

        let dup = "[Interface]\nAddress = 10.0.0.1/24\n\n[Peer]\nPublicKey = a\nAllowedIPs = 10.0.0.2/32\n\n[Peer]\nPublicKey = a\nAllowedIPs = 10.0.0.3/32\n";
        assert!(ConfigDocument::parse(dup).is_err());
    }

    #[test]
    fn test_adjacent_peers_without_blank_lines() {
        let text = "[Interface]\nAddress = 10.0.0.1/24\n[Peer]\nPublicKey = a\nAllowedIPs = 10.0.0.2/32\n[Peer]\nPublicKey = b\nAllowedIPs = 10.0.0.3/32\n";
        let doc = ConfigDocument::parse(text).unwrap();
        assert_eq!(doc.peers.len(), 2);
        assert_eq!(doc.peers[1].allowed_ips, "10.0.0.3/32");
    }
}
