//! Single logout requests sent by the CAS server
//!
//! ```text
//! Idle --(logoutRequest present)--> LogoutDetected --+--> Authorized
//!                                                     +--> Rejected
//! ```
//!
//! An authorized request is rebroadcast to peers (unless it already is a
//! rebroadcast) and then the session handed to the handler is invalidated.
//! A rejected request leaves the session untouched.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::LogoutConfig;
use crate::dns::DnsResolver;
use crate::error::Result;
use crate::rebroadcast::{RebroadcastDispatcher, RebroadcastReport};
use crate::request::RequestContext;
use crate::session::SessionStore;
use crate::types::RebroadcastKind;
use crate::xml::XmlElement;

pub const LOGOUT_REQUEST_FIELD: &str = "logoutRequest";
pub const REBROADCAST_FIELD: &str = "rebroadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutState {
    /// Not a logout request
    Idle,
    LogoutDetected,
    Authorized,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub state: LogoutState,
    /// `SessionIndex` of the SAML logout request, the service ticket the
    /// logged-out session was opened with
    pub session_index: Option<String>,
    /// Name or address of the sender, as used for authorization
    pub client: Option<String>,
    pub rebroadcast: Option<RebroadcastReport>,
}

impl LogoutOutcome {
    fn idle() -> Self {
        Self {
            state: LogoutState::Idle,
            session_index: None,
            client: None,
            rebroadcast: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state == LogoutState::Authorized
    }
}

pub fn is_logout_request(request: &RequestContext) -> bool {
    request.has_input(LOGOUT_REQUEST_FIELD)
}

/// `SessionIndex` text of a SAML `LogoutRequest`
pub fn session_index(logout_request: &str) -> Option<String> {
    match XmlElement::parse(logout_request) {
        Ok(root) => root
            .find("SessionIndex")
            .map(|index| index.text().trim().to_string())
            .filter(|index| !index.is_empty()),
        Err(e) => {
            debug!("Logout request is not XML: {}", e);
            None
        }
    }
}

pub struct LogoutHandler {
    config: LogoutConfig,
    /// Host of the CAS server, allowed when no client list is configured
    server_host: Option<String>,
    resolver: Arc<dyn DnsResolver>,
    rebroadcast: Option<Arc<RebroadcastDispatcher>>,
}

impl LogoutHandler {
    pub fn new(config: LogoutConfig, server_host: Option<String>, resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            config,
            server_host,
            resolver,
            rebroadcast: None,
        }
    }

    pub fn with_rebroadcast(mut self, dispatcher: Arc<RebroadcastDispatcher>) -> Self {
        self.rebroadcast = Some(dispatcher);
        self
    }

    fn allowed_clients(&self) -> Vec<String> {
        if self.config.allowed_clients.is_empty() {
            self.server_host.iter().cloned().collect()
        } else {
            self.config.allowed_clients.clone()
        }
    }

    /// Decides whether the sender may log sessions out. Returns the decision
    /// and the sender as it was identified.
    pub async fn authorize(&self, request: &RequestContext) -> (bool, Option<String>) {
        let client_ip = request.client_ip;
        let hostname = match client_ip {
            Some(ip) => self.resolver.reverse(ip).await,
            None => None,
        };
        let client = hostname.clone().or_else(|| client_ip.map(|ip| ip.to_string()));

        if !self.config.check_client {
            debug!("No access control set for logout requests");
            return (true, client);
        }
        let Some(ip) = client_ip else {
            warn!("Logout request without a client address");
            return (false, client);
        };

        let ip = ip.to_string();
        debug!("Logout client: {}/{}", hostname.as_deref().unwrap_or_default(), ip);
        for allowed in self.allowed_clients() {
            let host_matches = hostname
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(&allowed));
            if host_matches || ip == allowed {
                debug!("Allowed client `{}` matches, logout request is allowed", allowed);
                return (true, client);
            }
            debug!("Allowed client `{}` does not match", allowed);
        }
        (false, client)
    }

    pub async fn handle(&self, request: &RequestContext, session: &dyn SessionStore) -> Result<LogoutOutcome> {
        let Some(logout_request) = request.input(LOGOUT_REQUEST_FIELD) else {
            return Ok(LogoutOutcome::idle());
        };
        debug!("SAML logout request: {}", logout_request);

        let mut outcome = LogoutOutcome {
            state: LogoutState::LogoutDetected,
            session_index: session_index(logout_request),
            client: None,
            rebroadcast: None,
        };

        let (allowed, client) = self.authorize(request).await;
        outcome.client = client;
        if !allowed {
            warn!(
                "Unauthorized logout request from client `{}`",
                outcome.client.as_deref().unwrap_or("unknown")
            );
            outcome.state = LogoutState::Rejected;
            return Ok(outcome);
        }

        if let Some(dispatcher) = &self.rebroadcast {
            if dispatcher.is_enabled() && !request.has_input(REBROADCAST_FIELD) {
                outcome.rebroadcast = Some(dispatcher.broadcast(RebroadcastKind::Logout, request).await);
            }
        }

        info!(
            "Logout command allowed, session index {}",
            outcome.session_index.as_deref().unwrap_or("unknown")
        );
        session.invalidate().await?;
        outcome.state = LogoutState::Authorized;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::NoDnsResolver;
    use crate::session::MemorySession;
    use async_trait::async_trait;
    use serde_json::json;
    use std::net::IpAddr;

    const LOGOUT_XML: &str = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="LR-1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:NameID xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">alice</saml:NameID><samlp:SessionIndex>ST-42-abc</samlp:SessionIndex></samlp:LogoutRequest>"#;

    struct StaticResolver(&'static str);

    #[async_trait]
    impl DnsResolver for StaticResolver {
        async fn reverse(&self, _ip: IpAddr) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn logout_request(ip: &str) -> RequestContext {
        RequestContext::new("https://app.example.com/cas/logout")
            .with_form(vec![("logoutRequest".to_string(), LOGOUT_XML.to_string())])
            .with_client_ip(ip.parse().unwrap())
    }

    async fn session() -> MemorySession {
        let session = MemorySession::new();
        session.put("cas.pgt", json!("PGT-1")).await.unwrap();
        session
    }

    #[test]
    fn test_session_index_extraction() {
        assert_eq!(session_index(LOGOUT_XML).as_deref(), Some("ST-42-abc"));
        assert_eq!(session_index("not xml"), None);
        assert_eq!(session_index("<samlp:LogoutRequest xmlns:samlp=\"urn:x\"/>"), None);
    }

    #[tokio::test]
    async fn test_not_a_logout_request() {
        let handler = LogoutHandler::new(LogoutConfig::default(), None, Arc::new(NoDnsResolver));
        let session = session().await;
        let outcome = handler
            .handle(&RequestContext::new("https://app/x"), &session)
            .await
            .unwrap();
        assert_eq!(outcome.state, LogoutState::Idle);
        assert!(!session.is_invalidated());
    }

    #[tokio::test]
    async fn test_server_host_is_allowed_by_default() {
        let handler = LogoutHandler::new(
            LogoutConfig::default(),
            Some("cas.example.com".to_string()),
            Arc::new(StaticResolver("CAS.example.com")),
        );
        let session = session().await;
        let outcome = handler.handle(&logout_request("192.0.2.10"), &session).await.unwrap();
        assert!(outcome.is_authorized());
        assert_eq!(outcome.session_index.as_deref(), Some("ST-42-abc"));
        assert_eq!(outcome.client.as_deref(), Some("CAS.example.com"));
        assert!(outcome.rebroadcast.is_none());
        assert!(session.is_invalidated());
    }

    #[tokio::test]
    async fn test_unknown_client_is_rejected() {
        let handler = LogoutHandler::new(
            LogoutConfig::default(),
            Some("cas.example.com".to_string()),
            Arc::new(StaticResolver("attacker.example.net")),
        );
        let session = session().await;
        let outcome = handler.handle(&logout_request("198.51.100.7"), &session).await.unwrap();
        assert_eq!(outcome.state, LogoutState::Rejected);
        assert!(!session.is_invalidated());
        assert_eq!(session.get("cas.pgt"), Some(json!("PGT-1")));
    }

    #[tokio::test]
    async fn test_ip_literal_in_allowed_list() {
        let config = LogoutConfig {
            check_client: true,
            allowed_clients: vec!["192.0.2.10".to_string()],
        };
        let handler = LogoutHandler::new(config, None, Arc::new(NoDnsResolver));
        let session = session().await;
        assert!(handler.handle(&logout_request("192.0.2.10"), &session).await.unwrap().is_authorized());
    }

    #[tokio::test]
    async fn test_client_check_disabled() {
        let config = LogoutConfig {
            check_client: false,
            allowed_clients: Vec::new(),
        };
        let handler = LogoutHandler::new(config, None, Arc::new(NoDnsResolver));
        let session = session().await;
        let request = RequestContext::new("https://app/x")
            .with_form(vec![("logoutRequest".to_string(), LOGOUT_XML.to_string())]);
        assert!(handler.handle(&request, &session).await.unwrap().is_authorized());
        assert!(session.is_invalidated());
    }
}
