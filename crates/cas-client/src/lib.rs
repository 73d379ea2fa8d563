//! # CAS Client
//!
//! Client side of the Central Authentication Service protocol: exchanges the
//! service ticket found on an inbound request for the user identity and
//! attributes, following CAS 1.0, 2.0, 3.0 or SAML 1.1.
//!
//! Beyond plain validation the crate covers:
//! - proxy ticket validation against an allow-list of proxy chains
//! - acting as a CAS proxy (PGT callback and PGT IOU resolution)
//! - single logout requests, with authorization of the sender
//! - rebroadcasting logout and PGT callbacks to peer nodes of a cluster
//!
//! The web framework, the session store and the HTTP transport are reached
//! through traits ([`SessionStore`], [`HttpFetcher`], [`DnsResolver`],
//! [`PgtStorage`]), with default implementations where one makes sense.

pub mod client;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod logging;
pub mod logout;
pub mod pgt;
pub mod proxy_chain;
pub mod rebroadcast;
pub mod request;
pub mod session;
pub mod types;
pub mod uri;
pub mod validator;
pub mod xml;

pub use client::{CasClient, CasClientBuilder, CasRequest, LoginOutcome, PgtCallbackReply};
pub use config::{CasSettings, TenantConfig};
pub use dns::{DnsResolver, HickoryDnsResolver};
pub use error::{CasError, ErrorCode, Result};
pub use http::{HttpFetcher, HttpRequest, HttpResponse, ReqwestFetcher, TlsPolicy, TransportError};
pub use logout::{LogoutHandler, LogoutOutcome, LogoutState};
pub use pgt::{MemoryPgtStorage, PgtStorage, ProxyGrantValidator};
pub use proxy_chain::{ProxyChain, ProxyChainAllowedList, ProxyChainMatcher};
pub use rebroadcast::{RebroadcastDispatcher, RebroadcastReport};
pub use request::RequestContext;
pub use session::{MemorySession, SessionStore};
pub use types::{AttributeValue, AuthenticationResult, ProtocolVersion, ProxyGrantingTicket, Ticket};
pub use validator::{ProtocolValidator, ValidationOptions};
