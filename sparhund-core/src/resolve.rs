//! Local name lookups for hosts and service ports.
//!
//! Lookups never fail: anything unknown resolves to an empty string.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::flow::TransportProtocol;

pub trait NameLookup: Send + Sync {
    /// Service name for a port, e.g. `domain` for 53/udp.
    fn lookup_service_name(&self, port: u16, protocol: TransportProtocol) -> String;

    /// Host name for an address in textual form.
    fn lookup_dns_name(&self, ip: &str) -> String;
}

/// Resolves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

impl NameLookup for NoLookup {
    fn lookup_service_name(&self, _port: u16, _protocol: TransportProtocol) -> String {
        String::new()
    }

    fn lookup_dns_name(&self, _ip: &str) -> String {
        String::new()
    }
}

const WELL_KNOWN: &[(u16, TransportProtocol, &str)] = &[
    (20, TransportProtocol::Tcp, "ftp-data"),
    (21, TransportProtocol::Tcp, "ftp"),
    (22, TransportProtocol::Tcp, "ssh"),
    (23, TransportProtocol::Tcp, "telnet"),
    (25, TransportProtocol::Tcp, "smtp"),
    (53, TransportProtocol::Tcp, "domain"),
    (53, TransportProtocol::Udp, "domain"),
    (67, TransportProtocol::Udp, "bootps"),
    (68, TransportProtocol::Udp, "bootpc"),
    (69, TransportProtocol::Udp, "tftp"),
    (80, TransportProtocol::Tcp, "http"),
    (110, TransportProtocol::Tcp, "pop3"),
    (123, TransportProtocol::Udp, "ntp"),
    (137, TransportProtocol::Udp, "netbios-ns"),
    (138, TransportProtocol::Udp, "netbios-dgm"),
    (143, TransportProtocol::Tcp, "imap2"),
    (161, TransportProtocol::Udp, "snmp"),
    (162, TransportProtocol::Udp, "snmp-trap"),
    (443, TransportProtocol::Tcp, "https"),
    (443, TransportProtocol::Udp, "https"),
    (445, TransportProtocol::Tcp, "microsoft-ds"),
    (500, TransportProtocol::Udp, "isakmp"),
    (514, TransportProtocol::Udp, "syslog"),
    (520, TransportProtocol::Udp, "router"),
    (993, TransportProtocol::Tcp, "imaps"),
    (995, TransportProtocol::Tcp, "pop3s"),
    (1900, TransportProtocol::Udp, "ssdp"),
    (3306, TransportProtocol::Tcp, "mysql"),
    (5060, TransportProtocol::Tcp, "sip"),
    (5060, TransportProtocol::Udp, "sip"),
    (5353, TransportProtocol::Udp, "mdns"),
    (5432, TransportProtocol::Tcp, "postgresql"),
    (6379, TransportProtocol::Tcp, "redis"),
    (8080, TransportProtocol::Tcp, "http-alt"),
];

/// Hosts and services databases loaded from local files, with a built-in
/// table of well-known ports as fallback.
#[derive(Debug, Default, Clone)]
pub struct LocalResolver {
    hosts: HashMap<IpAddr, String>,
    services: HashMap<(u16, TransportProtocol), String>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads whichever of the given files exist. Unreadable files are logged
    /// and skipped.
    pub fn from_files(hosts: Option<&Path>, services: Option<&Path>) -> Self {
        let mut resolver = Self::new();
        if let Some(text) = hosts.and_then(read_database) {
            resolver.load_hosts(&text);
            info!(hosts = resolver.hosts.len(), "Loaded local DNS hosts");
        }
        if let Some(text) = services.and_then(read_database) {
            resolver.load_services(&text);
            info!(services = resolver.services.len(), "Loaded service names");
        }
        resolver
    }

    /// Parses `ip name...` lines. Comments and invalid addresses are skipped.
    pub fn load_hosts(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let mut fields = line.split_whitespace();
            let (Some(ip), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            match ip.parse::<IpAddr>() {
                Ok(ip) => {
                    self.hosts.entry(ip).or_insert_with(|| name.to_string());
                }
                Err(_) => debug!(ip, "Ignoring hosts entry with invalid address"),
            }
        }
    }

    /// Parses `/etc/services` style `name port/proto [aliases]` lines.
    pub fn load_services(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let mut fields = line.split_whitespace();
            let (Some(name), Some(spec)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Some((port, proto)) = spec.split_once('/') else {
                continue;
            };
            let protocol = match proto {
                "tcp" => TransportProtocol::Tcp,
                "udp" => TransportProtocol::Udp,
                _ => continue,
            };
            if let Ok(port) = port.parse::<u16>() {
                self.services
                    .entry((port, protocol))
                    .or_insert_with(|| name.to_string());
            }
        }
    }
}

fn read_database(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Name database not found");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read name database");
            None
        }
    }
}

impl NameLookup for LocalResolver {
    fn lookup_service_name(&self, port: u16, protocol: TransportProtocol) -> String {
        if let Some(name) = self.services.get(&(port, protocol)) {
            return name.clone();
        }
        WELL_KNOWN
            .iter()
            .find(|(p, proto, _)| *p == port && *proto == protocol)
            .map(|(_, _, name)| name.to_string())
            .unwrap_or_default()
    }

    fn lookup_dns_name(&self, ip: &str) -> String {
        ip.parse::<IpAddr>()
            .ok()
            .and_then(|ip| self.hosts.get(&ip).cloned())
            .unwrap_or_default()
    }
}
