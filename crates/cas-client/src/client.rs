//! Per-guard client facade
//!
//! A [`CasClient`] is built once per guard and shared. Each inbound request
//! is wrapped in a [`CasRequest`], which caches the ticket and the service URL
//! for the lifetime of that request.
//!
//! ```no_run
//! # async fn example(settings: cas_client::CasSettings, ctx: cas_client::RequestContext,
//! #                  session: &dyn cas_client::SessionStore) -> cas_client::Result<()> {
//! let client = cas_client::CasClient::from_settings(&settings, "default")?;
//! let request = client.request(&ctx);
//! if !request.has_ticket() {
//!     let _redirect = request.login_url(None, false, false);
//!     return Ok(());
//! }
//! let login = request.handle_login(false, session).await?;
//! println!("{} logged in, continue at {}", login.result.user, login.redirect_url);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{CasSettings, TenantConfig};
use crate::dns::{DnsResolver, HickoryDnsResolver};
use crate::error::{CasError, Result};
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::logout::{LogoutHandler, LogoutOutcome, REBROADCAST_FIELD, is_logout_request};
use crate::pgt::{MemoryPgtStorage, PROXY_SUCCESS_REPLY, PgtCallback, PgtStorage, ProxyGrantValidator};
use crate::proxy_chain::{ProxyChainAllowedList, ProxyChainMatcher};
use crate::rebroadcast::{RebroadcastDispatcher, RebroadcastReport};
use crate::request::RequestContext;
use crate::session::SessionStore;
use crate::types::{AuthenticationResult, RebroadcastKind, Ticket};
use crate::uri::{build_uri, strip_query_params, without_query};
use crate::validator::{ProtocolValidator, ValidationOptions};

/// Ticket appended to the login URL in fake mode
pub const FAKE_TICKET: &str = "ST-123-2345678910";

const CHANNEL_PARAM: &str = "channel";

pub struct CasClient {
    guard: String,
    config: Arc<TenantConfig>,
    validator: ProtocolValidator,
    pgt_validator: ProxyGrantValidator,
    pgt_storage: Arc<dyn PgtStorage>,
    allowed_chains: ProxyChainAllowedList,
    except_urls: Vec<Regex>,
    logout: LogoutHandler,
    rebroadcast: Arc<RebroadcastDispatcher>,
}

pub struct CasClientBuilder {
    guard: String,
    config: TenantConfig,
    fetcher: Option<Arc<dyn HttpFetcher>>,
    resolver: Option<Arc<dyn DnsResolver>>,
    pgt_storage: Option<Arc<dyn PgtStorage>>,
    extra_chains: Vec<Box<dyn ProxyChainMatcher>>,
}

impl CasClientBuilder {
    pub fn guard(mut self, name: impl Into<String>) -> Self {
        self.guard = name.into();
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn pgt_storage(mut self, storage: Arc<dyn PgtStorage>) -> Self {
        self.pgt_storage = Some(storage);
        self
    }

    /// Adds a chain on top of the configured ones
    pub fn allow_proxy_chain(mut self, chain: impl ProxyChainMatcher + 'static) -> Self {
        self.extra_chains.push(Box::new(chain));
        self
    }

    pub fn build(self) -> Result<CasClient> {
        self.config.validate()?;

        let mut allowed_chains = ProxyChainAllowedList::from_config(&self.config.proxy.allowed_chains)?;
        for chain in self.extra_chains {
            allowed_chains.allow(BoxedMatcher(chain));
        }

        let except_urls = self
            .config
            .except
            .url
            .iter()
            .map(|pattern| except_url_regex(pattern))
            .collect::<Result<Vec<_>>>()?;

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(ReqwestFetcher::new()));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HickoryDnsResolver::from_system_conf()));
        let pgt_storage = self
            .pgt_storage
            .unwrap_or_else(|| Arc::new(MemoryPgtStorage::new()));

        let rebroadcast = Arc::new(RebroadcastDispatcher::new(
            Arc::clone(&fetcher),
            Arc::clone(&resolver),
            self.config.rebroadcast.clone(),
        ));
        let logout = LogoutHandler::new(self.config.logout.clone(), self.config.server_host(), resolver)
            .with_rebroadcast(Arc::clone(&rebroadcast));

        debug!(
            "CAS guard `{}` ready: server {}, version {}, {} allowed proxy chain(s)",
            self.guard,
            self.config.server,
            self.config.version,
            allowed_chains.len()
        );

        Ok(CasClient {
            guard: self.guard,
            config: Arc::new(self.config),
            validator: ProtocolValidator::new(fetcher),
            pgt_validator: ProxyGrantValidator::new(Arc::clone(&pgt_storage)),
            pgt_storage,
            allowed_chains,
            except_urls,
            logout,
            rebroadcast,
        })
    }
}

struct BoxedMatcher(Box<dyn ProxyChainMatcher>);

impl ProxyChainMatcher for BoxedMatcher {
    fn matches(&self, proxies: &[String]) -> bool {
        self.0.matches(proxies)
    }
}

impl CasClient {
    pub fn builder(config: TenantConfig) -> CasClientBuilder {
        CasClientBuilder {
            guard: "default".to_string(),
            config,
            fetcher: None,
            resolver: None,
            pgt_storage: None,
            extra_chains: Vec::new(),
        }
    }

    /// Client for a named guard with the default collaborators
    pub fn from_settings(settings: &CasSettings, guard: &str) -> Result<Self> {
        Self::builder(settings.guard(guard)?.clone()).guard(guard).build()
    }

    pub fn guard(&self) -> &str {
        &self.guard
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn allowed_proxy_chains(&self) -> &ProxyChainAllowedList {
        &self.allowed_chains
    }

    /// Acts as a CAS proxy, requesting a PGT on validation
    pub fn is_proxy(&self) -> bool {
        self.config.proxy.enabled
    }

    pub fn find_password_url(&self) -> String {
        format!("{}{}", self.config.server_base(), self.config.find_password_uri)
    }

    pub fn request<'a>(&'a self, request: &'a RequestContext) -> CasRequest<'a> {
        CasRequest {
            client: self,
            request,
            ticket: OnceLock::new(),
            base_url: OnceLock::new(),
        }
    }
}

/// Result of a handled login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub result: AuthenticationResult,
    /// Current URL without the ticket, where the browser should go next
    pub redirect_url: String,
}

/// A [`CasClient`] bound to one inbound request
pub struct CasRequest<'a> {
    client: &'a CasClient,
    request: &'a RequestContext,
    ticket: OnceLock<Option<Ticket>>,
    base_url: OnceLock<String>,
}

impl<'a> CasRequest<'a> {
    fn config(&self) -> &TenantConfig {
        &self.client.config
    }

    /// Ticket from the query string, read once. Values not starting with
    /// `ST-` or `PT-` are ignored.
    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket
            .get_or_init(|| {
                let key = &self.config().ticket_key;
                let raw = self
                    .request
                    .query_param(key)
                    .or_else(|| self.request.form_param(key))?;
                match Ticket::parse(raw) {
                    Some(ticket) => {
                        debug!("Ticket `{}` found", ticket);
                        Some(ticket)
                    }
                    None => {
                        if !raw.is_empty() {
                            debug!("Ill-formed ticket found in the URL ({}=`{}`)", key, raw);
                        }
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn has_ticket(&self) -> bool {
        self.ticket().is_some()
    }

    fn base_url(&self) -> &str {
        self.base_url.get_or_init(|| match &self.request.previous_url {
            Some(previous) if self.in_except_list() => previous.clone(),
            _ => self.request.full_url.clone(),
        })
    }

    /// Whether the service URL should come from the previous page
    fn in_except_list(&self) -> bool {
        let config = self.config();
        let Some(previous) = &self.request.previous_url else {
            return false;
        };
        if previous.starts_with(&config.server) {
            return false;
        }

        let full_url = &self.request.full_url;
        let path = self.request.path();
        let url_match = self
            .client
            .except_urls
            .iter()
            .any(|regex| regex.is_match(full_url) || regex.is_match(path));
        if url_match {
            return true;
        }

        let Some(route) = &self.request.route_name else {
            return false;
        };
        config.except.route.iter().any(|pattern| {
            if pattern == route {
                return true;
            }
            match pattern.strip_suffix('*') {
                Some(prefix) => route.starts_with(prefix.trim_end_matches(['*', '.'])),
                None => false,
            }
        })
    }

    /// Current URL, optionally without the `channel` and ticket parameters,
    /// trailing `/` removed
    pub fn request_url(&self, without_channel: bool, without_ticket: bool) -> String {
        let mut remove = Vec::new();
        if without_channel {
            remove.push(CHANNEL_PARAM);
        }
        if without_ticket {
            remove.push(self.config().ticket_key.as_str());
        }
        strip_query_params(self.base_url(), &remove)
    }

    /// The service URL sent to the CAS server
    pub fn service_url(&self) -> String {
        self.request_url(true, true)
    }

    pub fn login_url(&self, redirect: Option<&str>, gateway: bool, renew: bool) -> String {
        let config = self.config();
        let service = self.service_url();
        if config.fake {
            return build_uri(&service, &[(config.ticket_key.as_str(), FAKE_TICKET)]);
        }

        let mut params = vec![("service", redirect.unwrap_or(&service))];
        if let Some(channel) = &config.channel {
            params.push((CHANNEL_PARAM, channel.as_str()));
        }
        if gateway {
            params.push(("gateway", "true"));
        }
        if renew {
            params.push(("renew", "true"));
        }
        let url = build_uri(&format!("{}{}", config.server_base(), config.login_uri), &params);
        debug!("CAS login URL: {}", url);
        url
    }

    pub fn logout_url(&self, redirect: Option<&str>) -> String {
        let config = self.config();
        let service = self.service_url();
        if config.fake {
            return service;
        }

        let mut params = vec![("service", redirect.unwrap_or(&service))];
        if let Some(channel) = &config.channel {
            params.push((CHANNEL_PARAM, channel.as_str()));
        }
        let url = build_uri(&format!("{}{}", config.server_base(), config.logout_uri), &params);
        debug!("CAS logout URL: {}", url);
        url
    }

    fn pgt_callback_url(&self) -> Option<String> {
        let proxy = &self.config().proxy;
        if !proxy.enabled {
            return None;
        }
        Some(
            proxy
                .callback_url
                .clone()
                .unwrap_or_else(|| without_query(&self.request.full_url).to_string()),
        )
    }

    /// Validates the ticket of this request.
    ///
    /// After a CAS 2.0/3.0 success the PGT (proxy mode) and the proxy list
    /// (when not empty) are written to the session.
    pub async fn is_authenticated(&self, renew: bool, session: &dyn SessionStore) -> Result<AuthenticationResult> {
        let config = self.config();
        if config.fake {
            warn!("CAS fake mode: user `{}` authenticated without validation", config.fake_user_id);
            return Ok(AuthenticationResult::new(config.fake_user_id.clone()));
        }

        let ticket = self.ticket().ok_or(CasError::NoTicket)?;
        debug!("CAS {} ticket `{}` is present", config.version, ticket);

        let service_url = self.service_url();
        let callback_url = self.pgt_callback_url();
        let options = ValidationOptions::new(ticket, &service_url)
            .renew(renew)
            .accept_proxy_tickets(self.client.allowed_chains.is_proxying_allowed())
            .pgt_callback_url(callback_url.as_deref());

        let validated = self
            .client
            .validator
            .validate(config, &options, &self.client.allowed_chains)
            .await?;
        let mut result = validated.result;

        if config.version.is_xml_service_response() {
            if self.client.is_proxy() {
                let success = validated
                    .success
                    .as_ref()
                    .ok_or_else(|| CasError::MalformedResponse("no authenticationSuccess".to_string()))?;
                let pgt = self.client.pgt_validator.validate(success).await?;
                session
                    .put(&config.pgt_session_key(), json!(pgt.expose()))
                    .await?;
                result = result.with_pgt(pgt);
            }
            if result.is_proxied() {
                session
                    .put(&config.proxies_session_key(), json!(result.proxies))
                    .await?;
            }
        }
        Ok(result)
    }

    /// Validates the ticket and returns where to send the browser next
    pub async fn handle_login(&self, renew: bool, session: &dyn SessionStore) -> Result<LoginOutcome> {
        let result = self.is_authenticated(renew, session).await?;
        Ok(LoginOutcome {
            result,
            redirect_url: self.service_url(),
        })
    }

    pub fn is_logout_request(&self) -> bool {
        is_logout_request(self.request)
    }

    pub async fn handle_logout(&self, session: &dyn SessionStore) -> Result<LogoutOutcome> {
        self.client.logout.handle(self.request, session).await
    }

    /// Handles a call of the PGT callback URL and returns the reply body.
    ///
    /// The PGT is stored for the validation that follows and the callback is
    /// rebroadcast to peers, unless it already is a rebroadcast.
    pub async fn handle_pgt_callback(&self) -> Result<PgtCallbackReply> {
        let Some(callback) = PgtCallback::from_query(&self.request.query)? else {
            debug!("PGT callback probed by the CAS server");
            return Ok(PgtCallbackReply::default());
        };

        debug!("Storing PGT for IOU {}", callback.iou);
        self.client
            .pgt_storage
            .store(&callback.iou, callback.pgt)
            .await?;

        let rebroadcast = if self.client.rebroadcast.is_enabled() && !self.request.has_input(REBROADCAST_FIELD) {
            Some(
                self.client
                    .rebroadcast
                    .broadcast(RebroadcastKind::PgtIou, self.request)
                    .await,
            )
        } else {
            None
        };
        Ok(PgtCallbackReply {
            body: PROXY_SUCCESS_REPLY,
            rebroadcast,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgtCallbackReply {
    /// Always [`PROXY_SUCCESS_REPLY`]
    pub body: &'static str,
    pub rebroadcast: Option<RebroadcastReport>,
}

impl Default for PgtCallbackReply {
    fn default() -> Self {
        Self {
            body: PROXY_SUCCESS_REPLY,
            rebroadcast: None,
        }
    }
}

/// Except URL pattern: surrounding `/` trimmed, `*` matches any run of
/// characters, everything else is literal
fn except_url_regex(pattern: &str) -> Result<Regex> {
    let pattern = if pattern == "/" { pattern } else { pattern.trim_matches('/') };
    let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    Regex::new(&expr)
        .map_err(|e| CasError::ConfigError(format!("Invalid except URL pattern {}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::NoDnsResolver;
    use crate::http::{HttpRequest, HttpResponse, TransportError};
    use crate::session::MemorySession;
    use crate::types::ProtocolVersion;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CannedFetcher {
        body: String,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl CannedFetcher {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpFetcher for CannedFetcher {
        async fn fetch(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.requests.lock().push(request);
            Ok(HttpResponse::ok(self.body.clone()))
        }
    }

    fn client(config: TenantConfig, fetcher: Arc<CannedFetcher>) -> CasClient {
        CasClient::builder(config)
            .fetcher(fetcher)
            .resolver(Arc::new(NoDnsResolver))
            .build()
            .unwrap()
    }

    fn config(version: ProtocolVersion) -> TenantConfig {
        TenantConfig::new("https://cas.example.com/cas", version)
    }

    #[test]
    fn test_except_url_patterns() {
        let matches = |pattern: &str, text: &str| except_url_regex(pattern).unwrap().is_match(text);
        assert!(matches("api/*", "api/users/1"));
        assert!(matches("/api/*/", "api/users/1"));
        assert!(matches("*", ""));
        assert!(matches("a*c*e", "abcde"));
        assert!(!matches("api/*", "web/api/x"));
        assert!(!matches("abc", "abcd"));
        assert!(matches("https://app/*/edit", "https://app/posts/edit"));
        assert!(matches("shop/item.html", "shop/item.html"));
        assert!(!matches("shop/item.html", "shop/itemXhtml"));
        assert!(!matches("a+b", "aab"));
    }

    #[test]
    fn test_ticket_extraction_is_cached() {
        let client = client(config(ProtocolVersion::Cas20), CannedFetcher::new(""));
        let ctx = RequestContext::new("https://app.example.com/home?ticket=ST-1-abc");
        let request = client.request(&ctx);
        assert_eq!(request.ticket().map(Ticket::as_str), Some("ST-1-abc"));
        assert!(std::ptr::eq(request.ticket().unwrap(), request.ticket().unwrap()));

        let ctx = RequestContext::new("https://app.example.com/home?ticket=TGT-1");
        assert!(!client.request(&ctx).has_ticket());
    }

    #[test]
    fn test_service_and_request_urls() {
        let client = client(config(ProtocolVersion::Cas20), CannedFetcher::new(""));
        let ctx = RequestContext::new("https://app.example.com/home/?ticket=ST-1&channel=web&page=2");
        let request = client.request(&ctx);
        assert_eq!(request.service_url(), "https://app.example.com/home?page=2");
        assert_eq!(
            request.request_url(false, true),
            "https://app.example.com/home?channel=web&page=2"
        );
    }

    #[test]
    fn test_login_and_logout_urls() {
        let mut config = config(ProtocolVersion::Cas20);
        config.channel = Some("web".to_string());
        config.find_password_uri = "/password".to_string();
        let client = client(config, CannedFetcher::new(""));
        let ctx = RequestContext::new("https://app.example.com/home?ticket=ST-1");
        let request = client.request(&ctx);

        assert_eq!(
            request.login_url(None, true, true),
            "https://cas.example.com/cas/login?service=https%3A%2F%2Fapp.example.com%2Fhome&channel=web&gateway=true&renew=true"
        );
        assert_eq!(
            request.logout_url(Some("https://app.example.com/bye")),
            "https://cas.example.com/cas/logout?service=https%3A%2F%2Fapp.example.com%2Fbye&channel=web"
        );
        assert_eq!(client.find_password_url(), "https://cas.example.com/cas/password");
    }

    #[tokio::test]
    async fn test_fake_mode() {
        let mut config = config(ProtocolVersion::Cas20);
        config.fake = true;
        config.fake_user_id = "tester".to_string();
        let fetcher = CannedFetcher::new("");
        let client = client(config, Arc::clone(&fetcher));
        let ctx = RequestContext::new("https://app.example.com/home");
        let request = client.request(&ctx);

        assert_eq!(
            request.login_url(None, false, false),
            "https://app.example.com/home?ticket=ST-123-2345678910"
        );
        assert_eq!(request.logout_url(None), "https://app.example.com/home");
        let session = MemorySession::new();
        let result = request.is_authenticated(false, &session).await.unwrap();
        assert_eq!(result.user, "tester");
        assert!(fetcher.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_ticket() {
        let client = client(config(ProtocolVersion::Cas10), CannedFetcher::new("yes\nalice\n"));
        let ctx = RequestContext::new("https://app.example.com/home");
        let session = MemorySession::new();
        assert!(matches!(
            client.request(&ctx).is_authenticated(false, &session).await,
            Err(CasError::NoTicket)
        ));
    }

    #[tokio::test]
    async fn test_handle_login_redirects_without_ticket() {
        let fetcher = CannedFetcher::new("yes\nalice\n");
        let client = client(config(ProtocolVersion::Cas10), Arc::clone(&fetcher));
        let ctx = RequestContext::new("https://app.example.com/home?ticket=ST-7-x&tab=1");
        let session = MemorySession::new();
        let login = client.request(&ctx).handle_login(false, &session).await.unwrap();
        assert_eq!(login.result.user, "alice");
        assert_eq!(login.redirect_url, "https://app.example.com/home?tab=1");

        let requests = fetcher.requests.lock();
        assert_eq!(
            requests[0].url,
            "https://cas.example.com/cas/validate?service=https%3A%2F%2Fapp.example.com%2Fhome%3Ftab%3D1&ticket=ST-7-x"
        );
    }

    #[tokio::test]
    async fn test_except_url_uses_previous_page() {
        let mut config = config(ProtocolVersion::Cas20);
        config.except.url = vec!["/cas/callback/".to_string()];
        config.except.route = vec!["sso.*".to_string()];
        let client = client(config, CannedFetcher::new(""));

        let ctx = RequestContext::new("https://app.example.com/cas/callback?ticket=ST-1")
            .with_previous_url("https://app.example.com/orders/");
        assert_eq!(client.request(&ctx).service_url(), "https://app.example.com/orders");

        let ctx = RequestContext::new("https://app.example.com/other?ticket=ST-1")
            .with_previous_url("https://app.example.com/orders")
            .with_route_name("sso.return");
        assert_eq!(client.request(&ctx).service_url(), "https://app.example.com/orders");

        let ctx = RequestContext::new("https://app.example.com/cas/callback?ticket=ST-1")
            .with_previous_url("https://cas.example.com/cas/login");
        assert_eq!(client.request(&ctx).service_url(), "https://app.example.com/cas/callback");
    }

    #[tokio::test]
    async fn test_pgt_callback_probe_and_delivery() {
        let client = client(config(ProtocolVersion::Cas20), CannedFetcher::new(""));

        let probe = RequestContext::new("https://app.example.com/cas/callback");
        let reply = client.request(&probe).handle_pgt_callback().await.unwrap();
        assert_eq!(reply.body, PROXY_SUCCESS_REPLY);

        let ctx = RequestContext::new("https://app.example.com/cas/callback?pgtIou=PGTIOU-1-a&pgtId=PGT-1-b");
        let reply = client.request(&ctx).handle_pgt_callback().await.unwrap();
        assert!(reply.rebroadcast.is_none());
        assert_eq!(
            client.pgt_storage.load("PGTIOU-1-a").await.unwrap().unwrap().expose(),
            "PGT-1-b"
        );

        let bad = RequestContext::new("https://app.example.com/cas/callback?pgtIou=PGTIOU-1-a");
        assert!(matches!(
            client.request(&bad).handle_pgt_callback().await,
            Err(CasError::InvalidCallback(_))
        ));
    }
}
