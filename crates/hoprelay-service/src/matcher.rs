//! Address matcher sets used for admission and bypass lists.
//!
//! An entry is one of:
//! - an IP address (`10.0.0.1`, `::1`) or CIDR (`192.168.0.0/16`)
//! - a domain (`example.com`), matched exactly
//! - `*.example.com`, matching subdomains only
//! - `.example.com`, matching the domain and its subdomains
//! - any of the above with a port (`example.com:443`, `[::1]:53`), in which
//!   case the entry only matches addresses carrying that port

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use hoprelay_core::{Admission, Bypass, host_of};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::BuildError;

/// CIDR ranges, split by family.
#[derive(Debug, Default)]
struct CidrMatcher {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

impl CidrMatcher {
    fn add(&mut self, net: IpNet) {
        match net {
            IpNet::V4(n) => self.v4.push(n),
            IpNet::V6(n) => self.v6.push(n),
        }
    }

    fn finish(&mut self) {
        self.v4.sort();
        self.v4.dedup();
        self.v6.sort();
        self.v6.dedup();
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.v4.iter().any(|net| net.contains(&v4)),
            IpAddr::V6(v6) => {
                // IPv4-mapped addresses also match IPv4 ranges.
                if let Some(v4) = v6.to_ipv4_mapped() {
                    return self.v4.iter().any(|net| net.contains(&v4));
                }
                self.v6.iter().any(|net| net.contains(&v6))
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Exact and suffix domain rules. Suffixes are stored with a leading dot.
#[derive(Debug, Default)]
struct DomainMatcher {
    exact: HashSet<String>,
    suffixes: HashSet<String>,
}

impl DomainMatcher {
    fn add(&mut self, pattern: &str) {
        if let Some(rest) = pattern.strip_prefix("*.") {
            self.suffixes.insert(format!(".{rest}"));
        } else if let Some(rest) = pattern.strip_prefix('.') {
            self.suffixes.insert(format!(".{rest}"));
            self.exact.insert(rest.to_string());
        } else {
            self.exact.insert(pattern.to_string());
        }
    }

    fn matches(&self, domain: &str) -> bool {
        let lower = domain.trim_end_matches('.').to_ascii_lowercase();
        if self.exact.contains(lower.as_str()) {
            return true;
        }
        if self.suffixes.is_empty() {
            return false;
        }
        // Strip labels left to right: a.b.c -> .b.c -> .c
        let mut pos = 0;
        while let Some(dot) = lower[pos..].find('.') {
            if self.suffixes.contains(&lower[pos + dot..]) {
                return true;
            }
            pos += dot + 1;
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffixes.is_empty()
    }
}

#[derive(Debug, Default)]
struct Rules {
    cidrs: CidrMatcher,
    domains: DomainMatcher,
}

impl Rules {
    fn add(&mut self, host: &str) {
        if let Ok(net) = host.parse::<IpNet>() {
            self.cidrs.add(net);
        } else if let Ok(ip) = host.parse::<IpAddr>() {
            self.cidrs.add(IpNet::from(ip));
        } else {
            self.domains.add(host);
        }
    }

    fn finish(&mut self) {
        self.cidrs.finish();
    }

    fn matches(&self, host: &str) -> bool {
        match host.parse::<IpAddr>() {
            Ok(ip) => self.cidrs.contains(ip),
            Err(_) => self.domains.matches(host),
        }
    }

    fn is_empty(&self) -> bool {
        self.cidrs.is_empty() && self.domains.is_empty()
    }
}

/// A named list of address matchers.
///
/// [`Bypass::contains`] reports whether the set covers an address; with
/// `whitelist` the answer is inverted. [`Admission::admit`] admits exactly
/// the addresses the set does not cover.
#[derive(Debug)]
pub struct MatcherSet {
    name: String,
    whitelist: bool,
    any_port: Rules,
    by_port: HashMap<u16, Rules>,
}

impl MatcherSet {
    pub fn new(
        name: impl Into<String>,
        whitelist: bool,
        entries: &[String],
    ) -> Result<Self, BuildError> {
        let name = name.into();
        let mut any_port = Rules::default();
        let mut by_port: HashMap<u16, Rules> = HashMap::new();

        for raw in entries {
            let entry = raw.trim().to_ascii_lowercase();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let invalid = || BuildError::InvalidMatcher {
                set: name.clone(),
                entry: raw.clone(),
            };
            match split_port(&entry) {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| invalid())?;
                    if host.is_empty() {
                        return Err(invalid());
                    }
                    by_port.entry(port).or_default().add(host);
                }
                None => any_port.add(&entry),
            }
        }

        any_port.finish();
        for rules in by_port.values_mut() {
            rules.finish();
        }
        Ok(Self {
            name,
            whitelist,
            any_port,
            by_port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_whitelist(&self) -> bool {
        self.whitelist
    }

    pub fn is_empty(&self) -> bool {
        self.any_port.is_empty() && self.by_port.is_empty()
    }

    /// Whether any entry matches `addr`, ignoring the whitelist flag.
    pub fn matches(&self, addr: &str) -> bool {
        let host = host_of(addr);
        if self.any_port.matches(host) {
            return true;
        }
        if self.by_port.is_empty() {
            return false;
        }
        let port = port_of(addr);
        port.and_then(|p| self.by_port.get(&p))
            .is_some_and(|rules| rules.matches(host))
    }
}

impl Bypass for MatcherSet {
    fn contains(&self, addr: &str) -> bool {
        self.matches(addr) != self.whitelist
    }
}

impl Admission for MatcherSet {
    fn admit(&self, addr: &str) -> bool {
        !self.contains(addr)
    }
}

/// Split `host:port` or `[v6]:port`. CIDRs and bare IPv6 literals have no port.
fn split_port(entry: &str) -> Option<(&str, &str)> {
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return tail.strip_prefix(':').map(|port| (host, port));
    }
    if entry.contains('/') {
        return None;
    }
    match entry.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host, port)),
        _ => None,
    }
}

fn port_of(addr: &str) -> Option<u16> {
    split_port(addr).and_then(|(_, port)| port.parse().ok())
}
