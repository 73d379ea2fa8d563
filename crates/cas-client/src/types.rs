//! Core data model shared by the validators, the logout handler and the client facade

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CasError;

/// CAS protocol revision spoken by a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    Cas10,
    #[serde(rename = "2.0")]
    Cas20,
    #[serde(rename = "3.0")]
    Cas30,
    #[serde(rename = "S1")]
    Saml11,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Cas10 => "1.0",
            ProtocolVersion::Cas20 => "2.0",
            ProtocolVersion::Cas30 => "3.0",
            ProtocolVersion::Saml11 => "S1",
        }
    }

    /// Whether responses are CAS `serviceResponse` XML documents.
    pub fn is_xml_service_response(&self) -> bool {
        matches!(self, ProtocolVersion::Cas20 | ProtocolVersion::Cas30)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(ProtocolVersion::Cas10),
            "2.0" => Ok(ProtocolVersion::Cas20),
            "3.0" => Ok(ProtocolVersion::Cas30),
            "S1" => Ok(ProtocolVersion::Saml11),
            other => Err(CasError::ConfigError(format!("Unsupported CAS version: {}", other))),
        }
    }
}

/// Service or proxy ticket taken from the inbound query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket(String);

impl Ticket {
    /// Accepts only `ST-` and `PT-` prefixed values.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.starts_with("ST-") || raw.starts_with("PT-") {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_proxy_ticket(&self) -> bool {
        self.0.starts_with("PT-")
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user attribute: one value is kept scalar, several keep their order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AttributeValue {
    /// Collapses a value list; `None` for an empty list.
    pub fn from_values(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(AttributeValue::Single),
            _ => Some(AttributeValue::Multiple(values)),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(value) => vec![value.as_str()],
            AttributeValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Proxy granting ticket. The value is a secret and is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyGrantingTicket(String);

impl ProxyGrantingTicket {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProxyGrantingTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProxyGrantingTicket(<redacted>)")
    }
}

/// Outcome of a successful ticket validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub authenticated: bool,
    pub user: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Proxies in front of this application, innermost first.
    pub proxies: Vec<String>,
    /// Set only when the client acts as a CAS proxy.
    pub pgt: Option<ProxyGrantingTicket>,
}

impl AuthenticationResult {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            user: user.into(),
            attributes: BTreeMap::new(),
            proxies: Vec::new(),
            pgt: None,
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, AttributeValue>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_pgt(mut self, pgt: ProxyGrantingTicket) -> Self {
        self.pgt = Some(pgt);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn is_proxied(&self) -> bool {
        !self.proxies.is_empty()
    }
}

/// Kind of notification fanned out to peer nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebroadcastKind {
    Logout,
    PgtIou,
}
