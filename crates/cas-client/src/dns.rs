//! Reverse DNS used to authorize logout senders and to name this node

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Host name for `ip`, without the trailing dot; `None` on any failure
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// [`DnsResolver`] on top of hickory
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    /// Uses the system resolver configuration, falling back to hickory's
    /// defaults when it cannot be read
    pub fn from_system_conf() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("System resolver configuration unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!("Reverse lookup of {} failed: {}", ip, e);
                None
            }
        }
    }
}

/// A resolver that knows no names
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDnsResolver;

#[async_trait]
impl DnsResolver for NoDnsResolver {
    async fn reverse(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}
