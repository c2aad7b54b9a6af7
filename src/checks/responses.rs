//! Token endpoint, registration and login page checks.

use serde_json::Value;

use super::CheckResult;
use crate::conversation::message::tokens;
use crate::conversation::{Conversation, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "verify-access-token-response",
            name: "Access Token Response",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "Bearer token type; ID Token present for an openid code grant",
            constructor: Constructor::Plain(verify_access_token_response),
        },
        CheckDef {
            id: "changed-client-secret",
            name: "Client Secret Rotated",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "The client secret changed on re-registration",
            constructor: Constructor::Plain(changed_client_secret),
        },
        CheckDef {
            id: "policy_uri_on_page",
            name: "policy_uri On Login Page",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "The registered policy_uri is shown on the login page",
            constructor: Constructor::Plain(policy_uri_on_page),
        },
        CheckDef {
            id: "logo_uri_on_page",
            name: "logo_uri On Login Page",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "The registered logo_uri is shown on the login page",
            constructor: Constructor::Plain(logo_uri_on_page),
        },
        CheckDef {
            id: "check-registration-response",
            name: "Registration Response",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "Registration response is sound",
            constructor: Constructor::Plain(accept),
        },
        CheckDef {
            id: "check-authorization-response",
            name: "Authorization Response",
            category: CheckCategory::Responses,
            severity: Status::Error,
            description: "Authorization response is sound",
            constructor: Constructor::Plain(accept),
        },
    ]
}

/// Run VERIFY-ACCESS-TOKEN-RESPONSE against the last protocol response
pub fn verify_access_token_response(conv: &mut Conversation) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::pass());
    };

    if let Some(token_type) = resp.str_claim("token_type")? {
        if !token_type.eq_ignore_ascii_case("bearer") {
            return Ok(Outcome::raised(Status::Error, "token_type has to be 'Bearer'"));
        }
    }

    let code_grant = conv
        .protocol_requests(MessageType::AccessTokenRequest)
        .last()
        .map(|req| req.str_claim("grant_type"))
        .transpose()?
        .flatten()
        == Some("authorization_code");
    if !code_grant {
        return Ok(Outcome::pass());
    }

    let openid = match conv.authorization_request().and_then(|req| req.get("scope").cloned()) {
        Some(Value::Null) | None => false,
        Some(scope) => tokens(&scope, "scope")?.iter().any(|s| s == "openid"),
    };
    if openid && !resp.contains("id_token") {
        return Ok(Outcome::raised(Status::Error, "ID Token has to be present"));
    }
    Ok(Outcome::pass())
}

/// Run CHANGED-CLIENT-SECRET
pub fn changed_client_secret(conv: &mut Conversation) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::pass());
    };
    let (Some(returned), Some(old)) = (resp.str_claim("client_secret")?, conv.entity.client_secret.as_deref())
    else {
        return Ok(Outcome::pass());
    };
    if returned == old {
        Ok(Outcome::raised(Status::Error, "Client Secret was not changed"))
    } else {
        Ok(Outcome::pass())
    }
}

fn registered_uri_on_page(conv: &Conversation, element: &str) -> CheckResult {
    let Some(reg) = conv.protocol_requests(MessageType::RegistrationRequest).last().copied() else {
        return Ok(Outcome::pass());
    };
    let Some(uri) = reg.str_claim(element)? else {
        return Ok(Outcome::pass());
    };
    let on_page = conv.login_page.as_deref().is_some_and(|page| page.contains(uri));
    if on_page {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, format!("{} not on page", element)))
    }
}

pub fn policy_uri_on_page(conv: &mut Conversation) -> CheckResult {
    registered_uri_on_page(conv, "policy_uri")
}

pub fn logo_uri_on_page(conv: &mut Conversation) -> CheckResult {
    registered_uri_on_page(conv, "logo_uri")
}

// Message-level validation happens when the response is parsed.
fn accept(_conv: &mut Conversation) -> CheckResult {
    Ok(Outcome::pass())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{EventData, EventKind, Message};
    use serde_json::json;

    fn push(conv: &mut Conversation, kind: EventKind, msg_type: MessageType, claims: Value) {
        let claims = claims.as_object().cloned().unwrap_or_default();
        conv.events
            .push(kind, EventData::Message(Message::with_claims(msg_type, claims)));
    }

    #[test]
    fn test_token_type_must_be_bearer() {
        let mut conv = Conversation::new();
        push(
            &mut conv,
            EventKind::ProtocolResponse,
            MessageType::AccessTokenResponse,
            json!({"access_token": "x", "token_type": "mac"}),
        );
        let outcome = verify_access_token_response(&mut conv).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("token_type has to be 'Bearer'"));
    }

    #[test]
    fn test_id_token_required_for_openid_code_grant() {
        let mut conv = Conversation::new();
        push(
            &mut conv,
            EventKind::ProtocolRequest,
            MessageType::AuthorizationRequest,
            json!({"scope": "openid profile"}),
        );
        push(
            &mut conv,
            EventKind::ProtocolRequest,
            MessageType::AccessTokenRequest,
            json!({"grant_type": "authorization_code"}),
        );
        push(
            &mut conv,
            EventKind::ProtocolResponse,
            MessageType::AccessTokenResponse,
            json!({"access_token": "x", "token_type": "Bearer"}),
        );
        let outcome = verify_access_token_response(&mut conv).unwrap();
        assert_eq!(outcome.status, Status::Error);
        assert_eq!(outcome.message.as_deref(), Some("ID Token has to be present"));
    }

    #[test]
    fn test_refresh_grant_needs_no_id_token() {
        let mut conv = Conversation::new();
        push(
            &mut conv,
            EventKind::ProtocolRequest,
            MessageType::AccessTokenRequest,
            json!({"grant_type": "refresh_token"}),
        );
        push(
            &mut conv,
            EventKind::ProtocolResponse,
            MessageType::AccessTokenResponse,
            json!({"access_token": "x", "token_type": "BEARER"}),
        );
        assert!(verify_access_token_response(&mut conv).unwrap().is_pass());
    }

    #[test]
    fn test_changed_client_secret() {
        let mut conv = Conversation::new();
        conv.entity.client_secret = Some("s3cret".to_string());
        push(
            &mut conv,
            EventKind::ProtocolResponse,
            MessageType::RegistrationResponse,
            json!({"client_secret": "s3cret"}),
        );
        assert_eq!(changed_client_secret(&mut conv).unwrap().status, Status::Error);

        push(
            &mut conv,
            EventKind::ProtocolResponse,
            MessageType::RegistrationResponse,
            json!({"client_secret": "fresh"}),
        );
        assert!(changed_client_secret(&mut conv).unwrap().is_pass());
    }

    #[test]
    fn test_uri_on_page() {
        let mut conv = Conversation::new();
        push(
            &mut conv,
            EventKind::ProtocolRequest,
            MessageType::RegistrationRequest,
            json!({"policy_uri": "https://rp/policy", "logo_uri": "https://rp/logo.png"}),
        );
        conv.login_page = Some(r#"<a href="https://rp/policy">policy</a>"#.to_string());
        assert!(policy_uri_on_page(&mut conv).unwrap().is_pass());
        let outcome = logo_uri_on_page(&mut conv).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("logo_uri not on page"));
    }
}
