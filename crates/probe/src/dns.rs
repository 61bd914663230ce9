//! DNS resolution and address vetting.
//!
//! Name resolution sits behind the [`NameResolver`] port so the engine can
//! be tested without real DNS; [`HickoryResolver`] is the production
//! implementation. [`IpResolver`] layers policy on top: only public IPv4
//! addresses are usable, literal IPs are tolerated with a warning, and every
//! accepted address is annotated with WHOIS-derived organization and country.
//!
//! IPv6 support is dormant: AAAA-only hosts produce no usable addresses.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::debug;

use bpscan_common::findings::{Class, Finding, FindingLog, Kind};

use crate::whois::{country_field, org_field, WhoisProbe};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("dns lookup failed: {0}")]
    Lookup(String),
}

/// Port for raw name resolution.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// HICKORY RESOLVER
// ════════════════════════════════════════════════════════════════════════════════

/// Production resolver over hickory-dns.
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    #[must_use]
    pub fn new() -> Self {
        let inner = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { inner }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameResolver for HickoryResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;
        Ok(lookup.iter().collect())
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        let lookup = self
            .inner
            .mx_lookup(domain)
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|mx| mx.exchange().to_string())
            .collect())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK RESOLVER
// ════════════════════════════════════════════════════════════════════════════════

/// Table-driven resolver for tests. Unknown hosts resolve to nothing.
#[derive(Debug, Default)]
pub struct MockResolver {
    a: HashMap<String, Vec<IpAddr>>,
    mx: HashMap<String, Vec<String>>,
}

impl MockResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&mut self, name: &str, addrs: Vec<IpAddr>) -> &mut Self {
        self.a.insert(name.to_string(), addrs);
        self
    }

    pub fn host_v4(&mut self, name: &str, addr: [u8; 4]) -> &mut Self {
        self.host(name, vec![IpAddr::V4(Ipv4Addr::from(addr))])
    }

    pub fn mx(&mut self, domain: &str, exchanges: Vec<String>) -> &mut Self {
        self.mx.insert(domain.to_string(), exchanges);
        self
    }
}

#[async_trait]
impl NameResolver for MockResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        Ok(self.a.get(host).cloned().unwrap_or_default())
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self.mx.get(domain).cloned().unwrap_or_default())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// IP RESOLVER (policy layer)
// ════════════════════════════════════════════════════════════════════════════════

/// One usable, annotated address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub ip_address: String,
    pub organization: String,
    pub country: String,
}

/// Resolves a host to public IPv4 addresses with WHOIS annotation.
pub struct IpResolver {
    dns: Arc<dyn NameResolver>,
    whois: WhoisProbe,
}

impl IpResolver {
    #[must_use]
    pub fn new(dns: Arc<dyn NameResolver>, whois: WhoisProbe) -> Self {
        Self { dns, whois }
    }

    /// Resolve `host`, reporting into the finding stream under `class`.
    ///
    /// - literal IP → `warn`, the address is still used (IPv4 only)
    /// - private/loopback address → `crit`, dropped
    /// - nothing usable left → `crit`
    pub async fn resolve(
        &self,
        host: &str,
        log: &mut FindingLog,
        class: Class,
    ) -> Vec<HostInfo> {
        let mut candidates: Vec<Ipv4Addr> = Vec::new();

        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            log.add(
                Finding::new(Kind::Warn, class, "ip address used instead of a hostname")
                    .with("host", host),
            );
            candidates.push(v4);
        } else if host.parse::<Ipv6Addr>().is_ok() {
            log.add(
                Finding::new(Kind::Warn, class, "ip address used instead of a hostname")
                    .with("host", host),
            );
            // IPv6 addresses are not usable yet.
        } else {
            match self.dns.lookup_ip(host).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if let IpAddr::V4(v4) = addr {
                            candidates.push(v4);
                        }
                    }
                }
                Err(e) => debug!(host, error = %e, "dns lookup failed"),
            }
        }

        let mut usable: Vec<Ipv4Addr> = Vec::new();
        for ip in candidates {
            if is_public(ip) {
                usable.push(ip);
            } else {
                log.add(
                    Finding::new(Kind::Crit, class, "host resolves to a non-public address")
                        .with("host", host)
                        .with("ip_address", ip.to_string()),
                );
            }
        }

        if usable.is_empty() {
            log.add(
                Finding::new(
                    Kind::Crit,
                    class,
                    "host did not resolve to any public ipv4 address",
                )
                .with("host", host),
            );
            return Vec::new();
        }

        let mut hosts = Vec::with_capacity(usable.len());
        for ip in usable {
            let ip_string = ip.to_string();
            let fields = self.whois.lookup(&ip_string).await;
            hosts.push(HostInfo {
                ip_address: ip_string,
                organization: org_field(&fields).unwrap_or_default(),
                country: country_field(&fields).unwrap_or_default(),
            });
        }
        hosts
    }

    /// True when `domain` publishes at least one MX record.
    pub async fn has_mx(&self, domain: &str) -> bool {
        match self.dns.lookup_mx(domain).await {
            Ok(exchanges) => !exchanges.is_empty(),
            Err(e) => {
                debug!(domain, error = %e, "mx lookup failed");
                false
            }
        }
    }
}

fn is_public(ip: Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified())
}
