//! Listener host discovery.
//!
//! With an explicit host configured, that host is the only candidate.
//! Otherwise candidates are, in order:
//! 1. the first non-loopback `nameserver` in the resolver configuration
//!    (inside WSL this is the Windows host),
//! 2. the static fallback list of common virtual-adapter gateways,
//! 3. `localhost`.
//!
//! Parsing is pure; only [`discover`] touches the filesystem.

use std::net::IpAddr;
use std::path::PathBuf;

/// Default TCP port of the execution listener.
pub const DEFAULT_PORT: u16 = 8765;

pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Docker bridge, VirtualBox host-only adapter, QEMU/VirtualBox NAT gateway.
pub const DEFAULT_FALLBACK_HOSTS: &[&str] = &["172.17.0.1", "192.168.56.1", "10.0.2.2"];

const LOCALHOST: &str = "localhost";

/// Address of an execution listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ListenerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ListenerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Explicit listener host; disables discovery when set.
    pub host: Option<String>,
    pub port: u16,
    pub fallback_hosts: Vec<String>,
    pub resolv_conf: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            fallback_hosts: DEFAULT_FALLBACK_HOSTS.iter().map(|h| h.to_string()).collect(),
            resolv_conf: PathBuf::from(DEFAULT_RESOLV_CONF),
        }
    }
}

/// Ordered, single-pass sequence of listener candidates.
#[derive(Debug)]
pub struct Candidates {
    inner: std::vec::IntoIter<ListenerEndpoint>,
}

impl Iterator for Candidates {
    type Item = ListenerEndpoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Candidates {}

/// First non-loopback `nameserver` entry of a resolv.conf document.
pub fn nameserver_from(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            return None;
        }
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            return None;
        }
        let address = fields.next()?;
        match address.parse::<IpAddr>() {
            Ok(ip) if ip.is_loopback() => None,
            _ => Some(address.to_string()),
        }
    })
}

/// Candidate list from configuration and (optionally) resolv.conf contents.
pub fn resolve_candidates(config: &ResolverConfig, resolv_conf: Option<&str>) -> Candidates {
    let hosts: Vec<String> = match &config.host {
        Some(host) => vec![host.clone()],
        None => {
            let mut hosts: Vec<String> = Vec::new();
            let discovered = resolv_conf.and_then(nameserver_from);
            let ordered = discovered
                .into_iter()
                .chain(config.fallback_hosts.iter().cloned())
                .chain(std::iter::once(LOCALHOST.to_string()));
            for host in ordered {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
            hosts
        }
    };

    let endpoints: Vec<ListenerEndpoint> = hosts
        .into_iter()
        .map(|host| ListenerEndpoint::new(host, config.port))
        .collect();

    Candidates {
        inner: endpoints.into_iter(),
    }
}

/// Resolve candidates, reading the resolver configuration file when needed.
///
/// An unreadable file only removes the nameserver candidate.
pub async fn discover(config: &ResolverConfig) -> Candidates {
    if config.host.is_some() {
        return resolve_candidates(config, None);
    }

    let contents = match tokio::fs::read_to_string(&config.resolv_conf).await {
        Ok(contents) => Some(contents),
        Err(e) => {
            tracing::debug!(
                path = %config.resolv_conf.display(),
                error = %e,
                "Resolver configuration not readable"
            );
            None
        }
    };
    resolve_candidates(config, contents.as_deref())
}
