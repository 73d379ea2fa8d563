//! CAS 2.0 and 3.0 `serviceResponse` documents

use std::collections::BTreeMap;

use tracing::debug;

use super::ValidatedTicket;
use crate::error::{CasError, Result};
use crate::proxy_chain::ProxyChainAllowedList;
use crate::types::{AttributeValue, AuthenticationResult};
use crate::xml::XmlElement;

pub const CAS_NAMESPACE: &str = "http://www.yale.edu/tp/cas";

pub fn parse(body: &str, allowed_chains: &ProxyChainAllowedList) -> Result<ValidatedTicket> {
    let root = XmlElement::parse(body)
        .map_err(|e| CasError::MalformedResponse(format!("invalid XML: {}", e)))?;
    if root.name != "serviceResponse" {
        return Err(CasError::MalformedResponse(format!(
            "unexpected root element `{}`",
            root.name
        )));
    }

    if let Some(failure) = root.find("authenticationFailure") {
        let message = failure.text().trim().to_string();
        return Err(CasError::TicketRejected {
            code: failure.attribute("code").map(str::to_string),
            message: (!message.is_empty()).then_some(message),
        });
    }

    let success = root
        .find("authenticationSuccess")
        .ok_or_else(|| CasError::MalformedResponse("no authentication result".to_string()))?;

    let user = success
        .find("user")
        .map(|user| user.text().trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or_else(|| CasError::MalformedResponse("no user in authenticationSuccess".to_string()))?;

    let proxies: Vec<String> = success
        .find_all("proxy")
        .map(|proxy| proxy.text().trim().to_string())
        .collect();
    for proxy in &proxies {
        debug!("Found proxy: {}", proxy);
    }
    if !allowed_chains.is_chain_allowed(&proxies) {
        return Err(CasError::ProxyNotAllowed(proxies));
    }

    let result = AuthenticationResult::new(user)
        .with_attributes(read_attributes(success))
        .with_proxies(proxies);
    Ok(ValidatedTicket {
        result,
        success: Some(success.clone()),
    })
}

/// Children of `<cas:attributes>`; a repeated name yields a sequence
fn read_attributes(success: &XmlElement) -> BTreeMap<String, AttributeValue> {
    let Some(attributes) = success.find("attributes") else {
        return BTreeMap::new();
    };

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for attribute in attributes.child_elements() {
        grouped
            .entry(attribute.name.clone())
            .or_default()
            .push(attribute.text().trim().to_string());
    }
    grouped
        .into_iter()
        .filter_map(|(name, values)| AttributeValue::from_values(values).map(|value| (name, value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy_chain::ProxyChain;
    use pretty_assertions::assert_eq;

    const SUCCESS: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationSuccess>
        <cas:user>alice</cas:user>
        <cas:attributes>
            <cas:email>alice@example.com</cas:email>
            <cas:memberOf>staff</cas:memberOf>
            <cas:memberOf>admins</cas:memberOf>
        </cas:attributes>
        <cas:proxyGrantingTicket>PGTIOU-84678-8a9d</cas:proxyGrantingTicket>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#;

    const PROXIED: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationSuccess>
        <cas:user>bob</cas:user>
        <cas:proxies>
            <cas:proxy>https://portal.example.com/proxy</cas:proxy>
            <cas:proxy>https://gateway.example.com/proxy</cas:proxy>
        </cas:proxies>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#;

    #[test]
    fn test_success_with_attributes() {
        let validated = parse(SUCCESS, &ProxyChainAllowedList::new()).unwrap();
        let result = validated.result;
        assert_eq!(result.user, "alice");
        assert_eq!(
            result.attribute("email"),
            Some(&AttributeValue::Single("alice@example.com".to_string()))
        );
        assert_eq!(
            result.attribute("memberOf"),
            Some(&AttributeValue::Multiple(vec!["staff".to_string(), "admins".to_string()]))
        );
        assert!(result.proxies.is_empty());
        let success = validated.success.unwrap();
        assert_eq!(success.name, "authenticationSuccess");
        assert_eq!(success.namespace.as_deref(), Some(CAS_NAMESPACE));
    }

    #[test]
    fn test_failure_code_and_message() {
        let body = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
            <cas:authenticationFailure code="INVALID_TICKET">
                Ticket ST-1856339-aA5Yuvrxzpv8Tau1cYQ7 not recognized
            </cas:authenticationFailure>
        </cas:serviceResponse>"#;
        match parse(body, &ProxyChainAllowedList::new()) {
            Err(CasError::TicketRejected { code, message }) => {
                assert_eq!(code.as_deref(), Some("INVALID_TICKET"));
                assert_eq!(
                    message.as_deref(),
                    Some("Ticket ST-1856339-aA5Yuvrxzpv8Tau1cYQ7 not recognized")
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_proxies_rejected_without_allowed_chain() {
        match parse(PROXIED, &ProxyChainAllowedList::new()) {
            Err(CasError::ProxyNotAllowed(proxies)) => assert_eq!(proxies.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_proxies_accepted_by_matching_chain() {
        let mut allowed = ProxyChainAllowedList::new();
        allowed.allow(
            ProxyChain::exact(["https://portal.example.com/proxy", "https://gateway.example.com/proxy"])
                .unwrap(),
        );
        let result = parse(PROXIED, &allowed).unwrap().result;
        assert_eq!(
            result.proxies,
            vec![
                "https://portal.example.com/proxy".to_string(),
                "https://gateway.example.com/proxy".to_string()
            ]
        );
        assert!(result.is_proxied());
    }

    #[test]
    fn test_malformed_documents() {
        let allowed = ProxyChainAllowedList::new();
        for body in [
            "yes\nalice\n",
            "<html><body>Login</body></html>",
            r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas"/>"#,
            r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                <cas:authenticationSuccess><cas:attributes/></cas:authenticationSuccess>
            </cas:serviceResponse>"#,
            r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
                <cas:authenticationSuccess><cas:user>  </cas:user></cas:authenticationSuccess>
            </cas:serviceResponse>"#,
        ] {
            assert!(
                matches!(parse(body, &allowed), Err(CasError::MalformedResponse(_))),
                "expected malformed: {}",
                body
            );
        }
    }
}
