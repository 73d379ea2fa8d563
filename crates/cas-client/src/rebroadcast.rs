//! Fan-out of logout and PGT callback requests to peer nodes
//!
//! Behind a load balancer the CAS server reaches one node only. That node
//! forwards the request to every configured peer, marking it with
//! `rebroadcast=false` so peers do not forward it again. Delivery is best
//! effort.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RebroadcastConfig;
use crate::dns::DnsResolver;
use crate::http::{HttpFetcher, HttpRequest};
use crate::request::RequestContext;
use crate::types::RebroadcastKind;
use crate::uri::encode_component;

/// Connect timeout per peer
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Total timeout per peer
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(4);

/// How a node is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// IP literal, with or without port
    Ip,
    /// Host name
    Hostname,
}

/// Classifies a node by its host part
pub fn node_type(node: &str) -> NodeType {
    if node_ip(node).is_some() {
        NodeType::Ip
    } else {
        NodeType::Hostname
    }
}

/// Address of an IP-literal node, port and brackets removed
fn node_ip(node: &str) -> Option<IpAddr> {
    let host = node_host(node);
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().ok()
}

/// Host name of a node, lowercased, without port
fn node_hostname(node: &str) -> String {
    let host = node_host(node);
    let host = host.rsplit_once(':').map_or(host.as_str(), |(name, _)| name);
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Same host, allowing a short name against its fully qualified form
fn same_hostname(node: &str, own: &str) -> bool {
    node == own
        || own.strip_prefix(node).is_some_and(|rest| rest.starts_with('.'))
        || node.strip_prefix(own).is_some_and(|rest| rest.starts_with('.'))
}

fn node_host(node: &str) -> String {
    if node.contains("://") {
        if let Some(host) = Url::parse(node).ok().and_then(|url| url.host_str().map(str::to_string)) {
            return host;
        }
    }
    node.split('/').next().unwrap_or(node).to_string()
}

/// What this node knows about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Address this node is reached on
    pub ip: Option<String>,
    /// Reverse DNS name of that address
    pub dns: Option<String>,
}

impl NodeIdentity {
    /// Whether a request to `node` may be sent. IP nodes are compared by
    /// address, host name nodes by name (case-insensitive, a short name
    /// matches its fully qualified form). A node whose relevant identity is
    /// unknown is skipped.
    pub fn is_peer(&self, node: &str) -> bool {
        match node_ip(node) {
            Some(ip) => match self.ip.as_deref().and_then(|own| own.parse::<IpAddr>().ok()) {
                Some(own) => own != ip,
                None => false,
            },
            None => match self.dns.as_deref().filter(|own| !own.is_empty()) {
                Some(own) => {
                    let own = own.trim_end_matches('.').to_ascii_lowercase();
                    !same_hostname(&node_hostname(node), &own)
                }
                None => false,
            },
        }
    }
}

/// Target URL for a node: `<node><request uri>`
pub fn target_url(node: &str, request_uri: &str) -> String {
    let node = node.trim_end_matches('/');
    if node.contains("://") {
        format!("{}{}", node, request_uri)
    } else {
        format!("http://{}{}", node, request_uri)
    }
}

/// Body sent to peers
pub fn rebroadcast_body(kind: RebroadcastKind, logout_request: Option<&str>) -> String {
    match (kind, logout_request) {
        (RebroadcastKind::Logout, Some(logout_request)) => format!(
            "rebroadcast=false&logoutRequest={}",
            encode_component(logout_request)
        ),
        _ => "rebroadcast=false".to_string(),
    }
}

/// What happened to each configured node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebroadcastReport {
    /// URLs that accepted the request
    pub sent: Vec<String>,
    /// Nodes not contacted
    pub skipped: Vec<String>,
    /// URLs that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl RebroadcastReport {
    /// Number of nodes a request was sent to
    pub fn attempted(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

/// Forwards logout and PGT callback requests to the configured nodes
pub struct RebroadcastDispatcher {
    fetcher: Arc<dyn HttpFetcher>,
    resolver: Arc<dyn DnsResolver>,
    config: RebroadcastConfig,
}

impl RebroadcastDispatcher {
    /// Dispatcher sending through `fetcher`, naming itself through `resolver`
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        resolver: Arc<dyn DnsResolver>,
        config: RebroadcastConfig,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            config,
        }
    }

    /// Whether rebroadcasting is switched on for the guard
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Own IP from the server-bound address or the local address, own name
    /// by reverse lookup
    pub async fn identify(&self, request: &RequestContext) -> NodeIdentity {
        let Some(ip) = request.own_ip() else {
            return NodeIdentity::default();
        };
        NodeIdentity {
            ip: Some(ip.to_string()),
            dns: self.resolver.reverse(ip).await,
        }
    }

    /// Sends `request` to every peer concurrently and waits for all of them.
    /// Failures are logged and reported, never returned as errors.
    pub async fn broadcast(&self, kind: RebroadcastKind, request: &RequestContext) -> RebroadcastReport {
        let identity = self.identify(request).await;
        let body = rebroadcast_body(kind, request.input("logoutRequest"));

        let mut report = RebroadcastReport::default();
        let mut requests = Vec::new();
        for node in &self.config.nodes {
            if !identity.is_peer(node) {
                debug!(
                    "Rebroadcast not sent to self: {} == {}/{}",
                    node,
                    identity.ip.as_deref().unwrap_or_default(),
                    identity.dns.as_deref().unwrap_or_default()
                );
                report.skipped.push(node.clone());
                continue;
            }

            let url = target_url(node, &request.request_uri);
            debug!("Rebroadcast target URL: {}", url);
            let mut outbound = HttpRequest::post(url, body.clone())
                .header("content-type", "application/x-www-form-urlencoded")
                .with_timeouts(CONNECT_TIMEOUT, TOTAL_TIMEOUT);
            for (name, value) in &self.config.headers {
                outbound = outbound.header(name.clone(), value.clone());
            }
            requests.push(outbound);
        }

        if requests.is_empty() {
            return report;
        }

        let results = join_all(requests.into_iter().map(|outbound| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let url = outbound.url.clone();
                (url, fetcher.fetch(outbound).await)
            }
        }))
        .await;

        for (url, result) in results {
            match result {
                Ok(response) if response.status < 400 => report.sent.push(url),
                Ok(response) => {
                    warn!("Rebroadcast to {} answered HTTP {}", url, response.status);
                    report.failed.push((url, format!("HTTP status {}", response.status)));
                }
                Err(e) => {
                    warn!("Rebroadcast to {} failed: {}", url, e);
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        info!(
            "Rebroadcast {:?}: {} sent, {} failed, {} skipped",
            kind,
            report.sent.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }
}
