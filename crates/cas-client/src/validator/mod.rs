//! Ticket validation against the CAS server
//!
//! Validation is split in two steps. [`plan`] is a pure function turning a
//! guard configuration and the ticket into the HTTP request to send plus the
//! parser to apply to the answer. [`ProtocolValidator`] performs the round
//! trip through an [`HttpFetcher`] and runs the parser.
//!
//! | Version | Endpoint              | Proxy endpoint        | Response        |
//! |---------|-----------------------|-----------------------|-----------------|
//! | 1.0     | `/validate`           | none                  | `yes`/`no` text |
//! | 2.0     | `/serviceValidate`    | `/proxyValidate`      | CAS XML         |
//! | 3.0     | `/p3/serviceValidate` | `/p3/proxyValidate`   | CAS XML         |
//! | S1      | `/samlValidate`       | none                  | SOAP/SAML 1.1   |

pub mod cas10;
pub mod cas20;
pub mod saml;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::TenantConfig;
use crate::error::{CasError, Result};
use crate::http::{HttpFetcher, HttpRequest, TransportError};
use crate::proxy_chain::ProxyChainAllowedList;
use crate::types::{AuthenticationResult, ProtocolVersion, Ticket};
use crate::uri::build_uri;
use crate::xml::XmlElement;

/// Per-request inputs of a validation
#[derive(Debug, Clone)]
pub struct ValidationOptions<'a> {
    pub ticket: &'a Ticket,
    /// Service URL the ticket was issued for
    pub service_url: &'a str,
    /// Ask the server to reject tickets issued from a single sign-on session
    pub renew: bool,
    /// Use the proxy validation endpoint so proxy tickets are accepted
    pub accept_proxy_tickets: bool,
    /// URL the server delivers the PGT to, when acting as a proxy
    pub pgt_callback_url: Option<&'a str>,
}

impl<'a> ValidationOptions<'a> {
    pub fn new(ticket: &'a Ticket, service_url: &'a str) -> Self {
        Self {
            ticket,
            service_url,
            renew: false,
            accept_proxy_tickets: false,
            pgt_callback_url: None,
        }
    }

    pub fn renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    pub fn accept_proxy_tickets(mut self, accept: bool) -> Self {
        self.accept_proxy_tickets = accept;
        self
    }

    pub fn pgt_callback_url(mut self, url: Option<&'a str>) -> Self {
        self.pgt_callback_url = url;
        self
    }
}

/// How the server answer is to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseParser {
    Cas10,
    ServiceResponse,
    Saml11,
}

#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub request: HttpRequest,
    pub parser: ResponseParser,
}

/// A validated ticket
#[derive(Debug, Clone)]
pub struct ValidatedTicket {
    pub result: AuthenticationResult,
    /// The `authenticationSuccess` element of a CAS 2.0/3.0 answer, kept for
    /// PGT extraction
    pub success: Option<XmlElement>,
}

/// Endpoint path for a version, relative to the server base URL
pub fn endpoint_path(version: ProtocolVersion, proxy: bool) -> Result<&'static str> {
    match (version, proxy) {
        (ProtocolVersion::Cas10, false) => Ok("/validate"),
        (ProtocolVersion::Cas20, false) => Ok("/serviceValidate"),
        (ProtocolVersion::Cas30, false) => Ok("/p3/serviceValidate"),
        (ProtocolVersion::Saml11, false) => Ok("/samlValidate"),
        (ProtocolVersion::Cas20, true) => Ok("/proxyValidate"),
        (ProtocolVersion::Cas30, true) => Ok("/p3/proxyValidate"),
        (version, true) => Err(CasError::ProxyValidationUnsupported(version)),
    }
}

/// Builds the validation request for a guard
pub fn plan(config: &TenantConfig, options: &ValidationOptions<'_>) -> Result<ValidationPlan> {
    let version = config.version;
    let base = format!(
        "{}{}",
        config.server_base(),
        endpoint_path(version, options.accept_proxy_tickets)?
    );

    let (request, parser) = match version {
        ProtocolVersion::Saml11 => {
            let mut params = vec![("TARGET", options.service_url)];
            if options.renew {
                params.push(("renew", "true"));
            }
            let url = build_uri(&base, &params);
            (saml::validation_request(url, options.ticket), ResponseParser::Saml11)
        }
        ProtocolVersion::Cas10 | ProtocolVersion::Cas20 | ProtocolVersion::Cas30 => {
            let mut params = vec![
                ("service", options.service_url),
                (config.ticket_key.as_str(), options.ticket.as_str()),
            ];
            if version != ProtocolVersion::Cas10 {
                if let Some(callback) = options.pgt_callback_url {
                    params.push(("pgtUrl", callback));
                }
            }
            if options.renew {
                params.push(("renew", "true"));
            }
            let parser = if version == ProtocolVersion::Cas10 {
                ResponseParser::Cas10
            } else {
                ResponseParser::ServiceResponse
            };
            (HttpRequest::get(build_uri(&base, &params)), parser)
        }
    };

    Ok(ValidationPlan {
        request: request.with_tls(config.tls_policy()),
        parser,
    })
}

/// Runs a [`ResponseParser`] over a response body
pub fn parse_response(
    parser: ResponseParser,
    body: &str,
    allowed_chains: &ProxyChainAllowedList,
) -> Result<ValidatedTicket> {
    match parser {
        ResponseParser::Cas10 => cas10::parse(body).map(|result| ValidatedTicket {
            result,
            success: None,
        }),
        ResponseParser::ServiceResponse => cas20::parse(body, allowed_chains),
        ResponseParser::Saml11 => saml::parse(body).map(|result| ValidatedTicket {
            result,
            success: None,
        }),
    }
}

/// Sends validation requests and interprets the answers
#[derive(Clone)]
pub struct ProtocolValidator {
    fetcher: Arc<dyn HttpFetcher>,
}

impl ProtocolValidator {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn validate(
        &self,
        config: &TenantConfig,
        options: &ValidationOptions<'_>,
        allowed_chains: &ProxyChainAllowedList,
    ) -> Result<ValidatedTicket> {
        let ValidationPlan { request, parser } = plan(config, options)?;
        let url = request.url.clone();
        debug!("CAS {} validation URL: {}", config.version, url);

        let response = self
            .fetcher
            .fetch(request)
            .await
            .map_err(|e| no_response(&url, e))?;
        if response.status >= 400 {
            return Err(no_response(&url, TransportError::Status(response.status)));
        }

        let validated = parse_response(parser, &response.body, allowed_chains);
        match &validated {
            Ok(ticket) => info!(
                "CAS {} ticket {} validated for user {}",
                config.version, options.ticket, ticket.result.user
            ),
            Err(e) => info!(
                "CAS {} ticket {} not validated: {}",
                config.version, options.ticket, e
            ),
        }
        validated
    }
}

impl std::fmt::Debug for ProtocolValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolValidator").finish_non_exhaustive()
    }
}

fn no_response(url: &str, err: TransportError) -> CasError {
    tracing::warn!("Could not open {} to validate: {}", url, err);
    CasError::NoResponse {
        url: url.to_string(),
        reason: err.to_string(),
    }
}
