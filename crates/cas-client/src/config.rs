//! Configuration for CAS guards
//!
//! A deployment declares one or more guards, each describing how to talk to
//! one CAS server:
//!
//! ```toml
//! [guards.default]
//! server = "https://cas.example.com/cas"
//! version = "3.0"
//! ticket_key = "ticket"
//! session_key = "cas"
//!
//! [guards.default.except]
//! url = ["api/*"]
//! route = ["admin.*"]
//!
//! [guards.default.rebroadcast]
//! enabled = true
//! nodes = ["http://10.0.0.2", "http://app2.example.com"]
//! ```
//!
//! Environment variables prefixed with `CAS__` override file values, for
//! example `CAS__GUARDS__DEFAULT__SERVER`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{CasError, Result};
use crate::http::TlsPolicy;
use crate::types::ProtocolVersion;

/// All configured guards
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CasSettings {
    #[serde(default)]
    pub guards: HashMap<String, TenantConfig>,
}

impl CasSettings {
    /// Load settings from an optional file plus `CAS__` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: CasSettings = builder
            .add_source(config::Environment::with_prefix("CAS").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: CasSettings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn guard(&self, name: &str) -> Result<&TenantConfig> {
        self.guards
            .get(name)
            .ok_or_else(|| CasError::ConfigError(format!("Unknown CAS guard: {}", name)))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, guard) in &self.guards {
            guard
                .validate()
                .map_err(|e| CasError::ConfigError(format!("guard `{}`: {}", name, e)))?;
        }
        Ok(())
    }
}

/// Configuration of one guard
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantConfig {
    /// CAS server base URL, e.g. `https://cas.example.com/cas`
    pub server: String,
    #[serde(default = "default_login_uri")]
    pub login_uri: String,
    #[serde(default = "default_logout_uri")]
    pub logout_uri: String,
    #[serde(default)]
    pub find_password_uri: String,
    #[serde(default = "default_version")]
    pub version: ProtocolVersion,
    /// Query parameter carrying the ticket
    #[serde(default = "default_ticket_key")]
    pub ticket_key: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_session_key")]
    pub session_key: String,
    /// CA certificate (PEM) used to validate the CAS server
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Verify the CAS server certificate. Turning it off is an explicit opt-out.
    #[serde(default = "default_true")]
    pub cert_validate: bool,
    #[serde(default = "default_true")]
    pub cert_cn_validate: bool,
    #[serde(default)]
    pub fake: bool,
    #[serde(default)]
    pub fake_user_id: String,
    #[serde(default)]
    pub except: ExceptConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub logout: LogoutConfig,
    #[serde(default)]
    pub rebroadcast: RebroadcastConfig,
}

/// Requests whose service URL is taken from the previous page
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExceptConfig {
    #[serde(default)]
    pub url: Vec<String>,
    #[serde(default)]
    pub route: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Act as a CAS proxy: request a PGT on validation
    #[serde(default)]
    pub enabled: bool,
    /// Fixed PGT callback URL; defaults to the current URL without query
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Proxy chains allowed in front of this application
    #[serde(default)]
    pub allowed_chains: Vec<AllowedChainConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllowedChainConfig {
    /// Proxy identifiers, innermost first; `/.../` entries are regexes
    pub proxies: Vec<String>,
    /// Accept longer chains that start with these proxies
    #[serde(default)]
    pub prefix: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogoutConfig {
    #[serde(default = "default_true")]
    pub check_client: bool,
    /// Hostnames or IP literals allowed to send logout requests.
    /// Empty means the CAS server host only.
    #[serde(default)]
    pub allowed_clients: Vec<String>,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            check_client: true,
            allowed_clients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RebroadcastConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Extra headers sent with every rebroadcast request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_login_uri() -> String {
    "/login".to_string()
}

fn default_logout_uri() -> String {
    "/logout".to_string()
}

fn default_version() -> ProtocolVersion {
    ProtocolVersion::Cas20
}

fn default_ticket_key() -> String {
    "ticket".to_string()
}

fn default_session_key() -> String {
    "cas".to_string()
}

fn default_true() -> bool {
    true
}

impl TenantConfig {
    /// A guard with default settings for everything but server and version
    pub fn new(server: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            server: server.into(),
            login_uri: default_login_uri(),
            logout_uri: default_logout_uri(),
            find_password_uri: String::new(),
            version,
            ticket_key: default_ticket_key(),
            channel: None,
            session_key: default_session_key(),
            cert: None,
            cert_validate: true,
            cert_cn_validate: true,
            fake: false,
            fake_user_id: String::new(),
            except: ExceptConfig::default(),
            proxy: ProxyConfig::default(),
            logout: LogoutConfig::default(),
            rebroadcast: RebroadcastConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let server = Url::parse(&self.server)
            .map_err(|e| CasError::ConfigError(format!("Invalid server URL {}: {}", self.server, e)))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(CasError::ConfigError(format!(
                "Server URL must be http(s): {}",
                self.server
            )));
        }
        if self.ticket_key.is_empty() {
            return Err(CasError::ConfigError("ticket_key must not be empty".to_string()));
        }
        if self.proxy.enabled && !self.version.is_xml_service_response() {
            return Err(CasError::ConfigError(format!(
                "Proxy mode requires CAS 2.0 or 3.0, got {}",
                self.version
            )));
        }
        if !self.proxy.allowed_chains.is_empty() && !self.version.is_xml_service_response() {
            return Err(CasError::ProxyValidationUnsupported(self.version));
        }
        if self.rebroadcast.enabled && self.rebroadcast.nodes.is_empty() {
            warn!("Rebroadcast is enabled but no nodes are configured");
        }
        Ok(())
    }

    /// Host of the CAS server, the default sender of logout requests
    pub fn server_host(&self) -> Option<String> {
        Url::parse(&self.server)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// Server URL without a trailing slash, ready for path concatenation
    pub fn server_base(&self) -> &str {
        self.server.trim_end_matches('/')
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy {
            ca_cert: self.cert.clone(),
            validate: self.cert_validate,
            validate_hostname: self.cert_cn_validate,
        }
    }

    pub fn pgt_session_key(&self) -> String {
        format!("{}.pgt", self.session_key)
    }

    pub fn proxies_session_key(&self) -> String {
        format!("{}.proxies", self.session_key)
    }
}
