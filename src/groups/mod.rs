//! Whitelist groups: named CIDR buckets with exclusions and domain
//! filters, consulted by both the sniffer and the alert mapper.

use crate::config::WhitelistConfig;
use crate::error::{Result, SensorError};
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::info;

/// A named whitelist bucket.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub label: String,
    pub includes: Vec<IpNet>,
    pub excludes: Vec<IpNet>,
    pub domains: Vec<String>,
}

impl Group {
    /// True when the address falls inside the group: an include matches
    /// and no exclude does. Excludes always beat includes.
    fn contains(&self, ip: IpAddr) -> bool {
        self.includes.iter().any(|net| net.contains(&ip)) && !self.excludes_ip(ip)
    }

    fn excludes_ip(&self, ip: IpAddr) -> bool {
        self.excludes.iter().any(|net| net.contains(&ip))
    }

    fn matches_domain(&self, fqdn: &str) -> bool {
        self.domains
            .iter()
            .any(|pattern| domain_matches(pattern, fqdn))
    }
}

/// Ordered set of whitelist groups, immutable once built.
#[derive(Debug, Default)]
pub struct Groups {
    groups: Vec<Group>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the group set from configuration. Group definition order is
    /// the configuration map's key order.
    pub fn from_config(config: &WhitelistConfig) -> Result<Self> {
        let mut groups = Groups::new();
        if config.groups.is_empty() {
            return Ok(groups);
        }

        info!("found {} whitelist groups", config.groups.len());
        for (name, group) in &config.groups {
            groups.add(Group {
                name: name.clone(),
                label: group.label.clone(),
                includes: parse_networks(&group.networks)?,
                excludes: parse_networks(&group.exclude.networks)?,
                domains: group.exclude.domains.clone(),
            })?;
        }
        Ok(groups)
    }

    pub fn add(&mut self, group: Group) -> Result<()> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(SensorError::DuplicateGroup(group.name));
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups the source address belongs to, in definition order.
    pub fn find_by_src_ip(&self, ip: IpAddr) -> Vec<&Group> {
        self.groups.iter().filter(|g| g.contains(ip)).collect()
    }

    /// True when some matched group excludes the queried domain.
    pub fn should_drop_query(&self, ip: IpAddr, fqdn: &str) -> bool {
        self.groups
            .iter()
            .any(|g| g.contains(ip) && g.matches_domain(fqdn))
    }

    /// True when the source belongs to a group whose exclude networks
    /// cover either endpoint of the flow.
    pub fn should_drop_flow(&self, src: IpAddr, dst: IpAddr) -> bool {
        self.groups
            .iter()
            .any(|g| g.contains(src) && (g.excludes_ip(src) || g.excludes_ip(dst)))
    }
}

fn parse_networks(networks: &[String]) -> Result<Vec<IpNet>> {
    networks.iter().map(|raw| parse_network(raw)).collect()
}

// Accepts CIDR notation or a bare address (host-length prefix).
fn parse_network(raw: &str) -> Result<IpNet> {
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net);
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(IpNet::from(ip));
    }
    Err(SensorError::InvalidNetwork(raw.to_string()))
}

// Suffix match, case-insensitive. "*.example.com" matches any name
// under example.com; a bare "example.com" also matches itself.
fn domain_matches(pattern: &str, fqdn: &str) -> bool {
    let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return fqdn.ends_with(&format!(".{suffix}"));
    }
    fqdn == pattern || fqdn.ends_with(&format!(".{pattern}"))
}
