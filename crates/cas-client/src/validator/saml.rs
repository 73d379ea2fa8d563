//! SAML 1.1 validation over SOAP

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{CasError, Result};
use crate::http::HttpRequest;
use crate::types::{AttributeValue, AuthenticationResult, Ticket};
use crate::uri::encode_component;
use crate::xml::XmlElement;

pub const SAML_ASSERTION_NAMESPACE: &str = "urn:oasis:names:tc:SAML:1.0:assertion";

const SOAP_ACTION: &str = "http://www.oasis-open.org/committees/security";

const ENVELOPE_HEAD: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">"#,
    r#"<SOAP-ENV:Header/><SOAP-ENV:Body>"#,
    r#"<samlp:Request xmlns:samlp="urn:oasis:names:tc:SAML:1.0:protocol"  MajorVersion="1" MinorVersion="1" RequestID="_192.168.16.51.1024506224022" IssueInstant="2002-06-19T17:03:44.022Z">"#,
    r#"<samlp:AssertionArtifact>"#,
);

const ENVELOPE_TAIL: &str = concat!(
    r#"</samlp:AssertionArtifact>"#,
    r#"</samlp:Request>"#,
    r#"</SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
);

/// SOAP envelope carrying the URL-encoded ticket as the assertion artifact
pub fn envelope(ticket: &Ticket) -> String {
    format!(
        "{}{}{}",
        ENVELOPE_HEAD,
        encode_component(ticket.as_str()),
        ENVELOPE_TAIL
    )
}

pub fn validation_request(url: String, ticket: &Ticket) -> HttpRequest {
    HttpRequest::post(url, envelope(ticket))
        .header("soapaction", SOAP_ACTION)
        .header("cache-control", "no-cache")
        .header("pragma", "no-cache")
        .header("accept", "text/xml")
        .header("connection", "keep-alive")
        .header("content-type", "text/xml")
}

pub fn parse(body: &str) -> Result<AuthenticationResult> {
    let root = XmlElement::parse(body)
        .map_err(|e| CasError::MalformedResponse(format!("invalid XML: {}", e)))?;
    if root.name != "Envelope" {
        debug!("Bad SAML root element `{}`", root.name);
        return Err(CasError::MalformedResponse(format!(
            "unexpected root element `{}`",
            root.name
        )));
    }

    let user = root
        .find_ns(SAML_ASSERTION_NAMESPACE, "NameIdentifier")
        .map(|name| name.text().trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or_else(|| {
            debug!("No NameIdentifier in SAML payload");
            CasError::MalformedResponse("no NameIdentifier in SAML payload".to_string())
        })?;

    Ok(AuthenticationResult::new(user).with_attributes(read_attributes(&root)))
}

fn read_attributes(root: &XmlElement) -> BTreeMap<String, AttributeValue> {
    let mut attributes = BTreeMap::new();
    for attribute in root.find_all_ns(SAML_ASSERTION_NAMESPACE, "Attribute") {
        let Some(name) = attribute.attribute("AttributeName") else {
            continue;
        };
        let values: Vec<String> = attribute
            .child_elements()
            .filter(|value| {
                value.name == "AttributeValue"
                    && value.namespace.as_deref() == Some(SAML_ASSERTION_NAMESPACE)
            })
            .map(|value| value.text().trim().to_string())
            .collect();
        match AttributeValue::from_values(values) {
            Some(value) => {
                debug!("SAML attribute {} = {:?}", name, value);
                attributes.insert(name.to_string(), value);
            }
            None => debug!("SAML attribute {} has no value", name),
        }
    }
    attributes
}
