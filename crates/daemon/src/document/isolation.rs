//! Pairwise subnet isolation rules in the PostUp/PostDown hooks
//!
//! For every unordered pair of registered subnets `(A, B)` PostUp carries
//! `DROP A->B` and `DROP B->A`, and PostDown carries the matching `-D`
//! rules. Isolation rules are recognised structurally; any other hook
//! command is kept as is. After every edit the hooks are rebuilt so the
//! rule order depends only on the set of subnets:
//!
//! - PostUp: sorted isolation rules, then the other commands
//! - PostDown: the other commands, then the sorted mirrors

use super::ConfigDocument;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;
use wgsync_common::{address, Error, Result};

/// One direction of a subnet isolation pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRule {
    pub source: String,
    pub destination: String,
}

impl IsolationRule {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Bring-up form, inserted ahead of the FORWARD accept rule
    pub fn up_command(&self) -> String {
        format!(
            "iptables -I FORWARD -s {} -d {} -j DROP",
            self.source, self.destination
        )
    }

    /// Tear-down form mirroring [`Self::up_command`]
    pub fn down_command(&self) -> String {
        format!(
            "iptables -D FORWARD -s {} -d {} -j DROP",
            self.source, self.destination
        )
    }

    fn parse_with(command: &str, action: &str) -> Option<Self> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.as_slice() {
            ["iptables", a, "FORWARD", "-s", src, "-d", dst, "-j", "DROP"] if *a == action => {
                Some(Self::new(*src, *dst))
            }
            _ => None,
        }
    }

    pub fn parse_up(command: &str) -> Option<Self> {
        Self::parse_with(command, "-I")
    }

    pub fn parse_down(command: &str) -> Option<Self> {
        Self::parse_with(command, "-D")
    }

    pub fn references(&self, cidr: &str) -> bool {
        self.source == cidr || self.destination == cidr
    }

    fn sort_key(&self) -> (CidrKey, CidrKey) {
        (CidrKey::of(&self.source), CidrKey::of(&self.destination))
    }
}

/// Orders CIDRs by address then prefix; unparsable text sorts last
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CidrKey(Option<(Ipv4Addr, u8)>, String);

impl CidrKey {
    fn of(cidr: &str) -> Self {
        let parsed = address::parse_cidr(cidr).ok().map(|n| (n.ip(), n.prefix()));
        match parsed {
            Some(p) => CidrKey(Some(p), cidr.to_string()),
            None => CidrKey(None, cidr.to_string()),
        }
    }
}

impl PartialOrd for IsolationRule {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IsolationRule {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Hook commands installed when no subnet is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDefaults {
    pub egress_interface: String,
}

impl HookDefaults {
    pub fn new(egress_interface: impl Into<String>) -> Self {
        Self {
            egress_interface: egress_interface.into(),
        }
    }

    pub fn post_up(&self) -> Vec<String> {
        vec![
            "iptables -A FORWARD -i %i -j ACCEPT".to_string(),
            format!(
                "iptables -t nat -A POSTROUTING -o {} -j MASQUERADE",
                self.egress_interface
            ),
        ]
    }

    pub fn post_down(&self) -> Vec<String> {
        vec![
            "iptables -D FORWARD -i %i -j ACCEPT".to_string(),
            format!(
                "iptables -t nat -D POSTROUTING -o {} -j MASQUERADE",
                self.egress_interface
            ),
        ]
    }
}

impl Default for HookDefaults {
    fn default() -> Self {
        Self::new("ens3")
    }
}

impl ConfigDocument {
    /// Isolation rules currently present in PostUp
    pub fn isolation_rules(&self) -> Vec<IsolationRule> {
        self.interface
            .post_up
            .iter()
            .filter_map(|c| IsolationRule::parse_up(c))
            .collect()
    }

    fn rebuild_hooks(&mut self, rules: BTreeSet<IsolationRule>) {
        let iface = &mut self.interface;
        let up_other: Vec<String> = iface
            .post_up
            .drain(..)
            .filter(|c| IsolationRule::parse_up(c).is_none())
            .collect();
        let down_other: Vec<String> = iface
            .post_down
            .drain(..)
            .filter(|c| IsolationRule::parse_down(c).is_none())
            .collect();

        iface.post_up = rules.iter().map(IsolationRule::up_command).collect();
        iface.post_up.extend(up_other);
        iface.post_down = down_other;
        iface
            .post_down
            .extend(rules.iter().map(IsolationRule::down_command));
    }

    /// Isolate a new subnet from every existing one.
    ///
    /// `SubnetAlreadyIsolated` is raised only when some drop rule already
    /// names `new_cidr`. A subnet with no peers to isolate from has no rules,
    /// so adding it again passes this guard untouched; callers pair this
    /// with [`ConfigDocument::add_address`], which rejects the repeat with
    /// `AddressAlreadyPresent`.
    pub fn on_subnet_added(&mut self, new_cidr: &str, existing: &[String]) -> Result<()> {
        let mut rules: BTreeSet<IsolationRule> = self.isolation_rules().into_iter().collect();
        if rules.iter().any(|r| r.references(new_cidr)) {
            return Err(Error::SubnetAlreadyIsolated {
                cidr: new_cidr.to_string(),
            });
        }

        for other in existing.iter().filter(|c| c.as_str() != new_cidr) {
            rules.insert(IsolationRule::new(new_cidr, other.as_str()));
            rules.insert(IsolationRule::new(other.as_str(), new_cidr));
        }
        debug!(
            "Isolating {} from {} subnet(s); {} rule(s) total",
            new_cidr,
            existing.len(),
            rules.len()
        );
        self.rebuild_hooks(rules);
        Ok(())
    }

    /// Drop every rule referencing `removed`; with no subnets left the hooks
    /// fall back to `defaults` instead of going empty
    pub fn on_subnet_removed(&mut self, removed: &str, remaining: &[String], defaults: &HookDefaults) {
        if remaining.is_empty() {
            debug!("Last subnet {} removed; resetting hooks", removed);
            self.interface.post_up = defaults.post_up();
            self.interface.post_down = defaults.post_down();
            return;
        }

        let rules: BTreeSet<IsolationRule> = self
            .isolation_rules()
            .into_iter()
            .filter(|r| !r.references(removed))
            .collect();
        debug!("Removed isolation rules for {}; {} rule(s) left", removed, rules.len());
        self.rebuild_hooks(rules);
    }

    /// Substitute `old` with `new` across the address list and both hooks
    pub fn on_subnet_address_changed(&mut self, old: &str, new: &str) -> Result<()> {
        let in_addresses = self.has_address(old);
        let rules = self.isolation_rules();
        let in_rules = rules.iter().any(|r| r.references(old));
        if !in_addresses && !in_rules {
            return Err(Error::RuleNotFound {
                cidr: old.to_string(),
            });
        }
        if old != new {
            if self.has_address(new) {
                return Err(Error::AddressAlreadyPresent {
                    cidr: new.to_string(),
                });
            }
            if rules.iter().any(|r| r.references(new)) {
                return Err(Error::SubnetAlreadyIsolated {
                    cidr: new.to_string(),
                });
            }
        }

        if in_addresses {
            self.replace_address(old, new)?;
        }
        let swap = |c: &String| if c == old { new.to_string() } else { c.clone() };
        let rules: BTreeSet<IsolationRule> = rules
            .into_iter()
            .map(|r| IsolationRule::new(swap(&r.source), swap(&r.destination)))
            .collect();
        debug!("Substituted {} with {} in interface", old, new);
        self.rebuild_hooks(rules);
        Ok(())
    }

    pub fn on_subnet_mask_changed(&mut self, old: &str, new: &str) -> Result<()> {
        self.on_subnet_address_changed(old, new)
    }
}
