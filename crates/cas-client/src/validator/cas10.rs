//! CAS 1.0 plain-text responses
//!
//! The body is `yes\n<user>\n` on success and `no\n` on failure.

use tracing::debug;

use crate::error::{CasError, Result};
use crate::types::AuthenticationResult;

pub fn parse(body: &str) -> Result<AuthenticationResult> {
    let mut lines = body.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));
    match lines.next() {
        Some("yes") => {}
        Some("no") => {
            debug!("Ticket has not been validated");
            return Err(CasError::TicketRejected {
                code: None,
                message: None,
            });
        }
        _ => {
            debug!("Ill-formed CAS 1.0 response");
            return Err(CasError::MalformedResponse(
                "first line is neither `yes` nor `no`".to_string(),
            ));
        }
    }

    let user = lines.next().map(str::trim).unwrap_or_default();
    if user.is_empty() {
        return Err(CasError::MalformedResponse("no user after `yes`".to_string()));
    }
    Ok(AuthenticationResult::new(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_with_user() {
        let result = parse("yes\nalice\n").unwrap();
        assert!(result.authenticated);
        assert_eq!(result.user, "alice");
        assert!(result.attributes.is_empty());
        assert!(result.proxies.is_empty());
    }

    #[test]
    fn test_crlf_and_padding() {
        assert_eq!(parse("yes\r\n  bob  \r\n").unwrap().user, "bob");
    }

    #[test]
    fn test_no_is_rejection() {
        assert!(matches!(parse("no\n\n"), Err(CasError::TicketRejected { .. })));
    }

    #[test]
    fn test_other_answers_are_malformed() {
        assert!(matches!(parse("maybe\n"), Err(CasError::MalformedResponse(_))));
        assert!(matches!(parse(""), Err(CasError::MalformedResponse(_))));
        assert!(matches!(parse("YES\nalice\n"), Err(CasError::MalformedResponse(_))));
        assert!(matches!(parse(" yes\nalice\n"), Err(CasError::MalformedResponse(_))));
    }

    #[test]
    fn test_yes_without_user_is_malformed() {
        assert!(matches!(parse("yes\n"), Err(CasError::MalformedResponse(_))));
        assert!(matches!(parse("yes"), Err(CasError::MalformedResponse(_))));
        assert!(matches!(parse("yes\n   \n"), Err(CasError::MalformedResponse(_))));
    }
}
