//! Framework-level response checks.
//!
//! These live in the parent registry: any flow may name them, and a check
//! of the OP catalog with the same id takes precedence.

use serde::Deserialize;

use super::{parse_params, quoted, with_params, CheckFn, CheckResult, Params};
use crate::conversation::{Conversation, Message, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "check-http-response",
            name: "HTTP Response Status",
            category: CheckCategory::Generic,
            severity: Status::Critical,
            description: "The last HTTP response is not an error status",
            constructor: Constructor::Plain(check_http_response),
        },
        CheckDef {
            id: "verify-error-response",
            name: "Error Response",
            category: CheckCategory::Generic,
            severity: Status::Error,
            description: "The last protocol response is an error, optionally with an allowed code",
            constructor: Constructor::WithParams(build_error_response),
        },
        CheckDef {
            id: "verify-authn-response",
            name: "Authentication Response",
            category: CheckCategory::Generic,
            severity: Status::Error,
            description: "The last protocol response is a successful authorization response",
            constructor: Constructor::Plain(verify_authn_response),
        },
        CheckDef {
            id: "verify-response",
            name: "Response Type",
            category: CheckCategory::Generic,
            severity: Status::Error,
            description: "The last protocol response is of an expected type",
            constructor: Constructor::WithParams(build_verify_response),
        },
    ]
}

/// Run CHECK-HTTP-RESPONSE
pub fn check_http_response(conv: &mut Conversation) -> CheckResult {
    let Some(response) = conv.last_http_response() else {
        return Ok(Outcome::pass());
    };
    if response.status >= 400 {
        Ok(
            Outcome::raised(Status::Critical, format!("Non-OK HTTP response: {}", response.status))
                .with_detail("status", response.status)
                .with_detail("body", response.body.as_str()),
        )
    } else {
        Ok(Outcome::pass())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponseParams {
    /// Allowed error codes; any code when unset
    #[serde(default)]
    pub error: Option<Vec<String>>,
}

fn build_error_response(params: &Params) -> Result<CheckFn, String> {
    with_params(params, verify_error_response)
}

/// An error code outside the allow-list, if any.
fn unexpected_error_code(resp: &Message, allowed: Option<&[String]>) -> Option<Outcome> {
    let allowed = allowed?;
    let code = resp.str_claim("error").ok().flatten().unwrap_or_default();
    if allowed.iter().any(|a| a == code) {
        None
    } else {
        Some(
            Outcome::raised(Status::Error, "Wrong error code")
                .with_detail("error", code)
                .with_detail("expected", quoted(allowed)),
        )
    }
}

/// Run VERIFY-ERROR-RESPONSE
pub fn verify_error_response(conv: &mut Conversation, params: &ErrorResponseParams) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::raised(Status::Error, "Expected error message"));
    };
    if !resp.is_error() {
        return Ok(Outcome::raised(
            Status::Error,
            format!("Expected error message, got {}", resp.msg_type),
        ));
    }
    Ok(unexpected_error_code(resp, params.error.as_deref()).unwrap_or_else(Outcome::pass))
}

/// Run VERIFY-AUTHN-RESPONSE
pub fn verify_authn_response(conv: &mut Conversation) -> CheckResult {
    match conv.last_protocol_response() {
        None => Ok(Outcome::raised(Status::Error, "Expected an authorization response")),
        Some(resp) if resp.is_error() => Ok(Outcome::raised(
            Status::Error,
            "Expected an authorization response got an error response",
        )),
        Some(resp) if resp.msg_type != MessageType::AuthorizationResponse => Ok(Outcome::raised(
            Status::Error,
            format!("Expected an authorization response got {}", resp.msg_type),
        )),
        Some(_) => Ok(Outcome::pass()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyResponseParams {
    /// Acceptable message types by name
    pub response_cls: Vec<String>,
    /// Allowed error codes when the response is an error
    #[serde(default)]
    pub error: Option<Vec<String>>,
}

struct VerifyResponse {
    accepted: Vec<MessageType>,
    names: Vec<String>,
    error: Option<Vec<String>>,
}

fn build_verify_response(params: &Params) -> Result<CheckFn, String> {
    let parsed: VerifyResponseParams = parse_params(params)?;
    let accepted = parsed
        .response_cls
        .iter()
        .map(|name| MessageType::parse(name).ok_or_else(|| format!("unknown response class '{}'", name)))
        .collect::<Result<Vec<_>, _>>()?;
    let check = VerifyResponse {
        accepted,
        names: parsed.response_cls,
        error: parsed.error,
    };
    Ok(Box::new(move |conv| verify_response(conv, &check)))
}

fn verify_response(conv: &mut Conversation, check: &VerifyResponse) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::raised(Status::Error, "No response received"));
    };
    if !check.accepted.contains(&resp.msg_type) {
        return Ok(Outcome::raised(
            Status::Error,
            format!(
                "Got a {} response, expected one of {}",
                resp.msg_type,
                quoted(&check.names)
            ),
        ));
    }
    if resp.is_error() {
        if let Some(outcome) = unexpected_error_code(resp, check.error.as_deref()) {
            return Ok(outcome);
        }
    }
    Ok(Outcome::pass())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{EventData, EventKind};
    use crate::fetch::HttpResponse;
    use serde_json::{json, Value};

    fn respond(conv: &mut Conversation, msg_type: MessageType, claims: Value) {
        let claims = claims.as_object().cloned().unwrap_or_default();
        conv.events.push(
            EventKind::ProtocolResponse,
            EventData::Message(Message::with_claims(msg_type, claims)),
        );
    }

    #[test]
    fn test_http_error_status() {
        let mut conv = Conversation::new();
        conv.events.push(
            EventKind::HttpResponse,
            EventData::Http(HttpResponse {
                status: 500,
                body: "boom".to_string(),
                ..HttpResponse::default()
            }),
        );
        let outcome = check_http_response(&mut conv).unwrap();
        assert_eq!(outcome.status, Status::Critical);
        assert_eq!(outcome.detail["status"], json!(500));
        assert_eq!(outcome.detail["body"], json!("boom"));
    }

    #[test]
    fn test_error_response_allow_list() {
        let mut conv = Conversation::new();
        respond(&mut conv, MessageType::ErrorResponse, json!({"error": "invalid_request"}));
        assert!(verify_error_response(&mut conv, &ErrorResponseParams::default())
            .unwrap()
            .is_pass());

        let params = ErrorResponseParams {
            error: Some(vec!["login_required".to_string()]),
        };
        let outcome = verify_error_response(&mut conv, &params).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("Wrong error code"));
    }

    #[test]
    fn test_authn_response() {
        let mut conv = Conversation::new();
        respond(&mut conv, MessageType::AuthorizationResponse, json!({"code": "c"}));
        assert!(verify_authn_response(&mut conv).unwrap().is_pass());
        respond(
            &mut conv,
            MessageType::AuthorizationErrorResponse,
            json!({"error": "access_denied"}),
        );
        assert_eq!(verify_authn_response(&mut conv).unwrap().status, Status::Error);
    }

    #[test]
    fn test_verify_response_classes() {
        let params = json!({"response_cls": ["AuthorizationResponse", "AuthorizationErrorResponse"],
                            "error": ["login_required"]});
        let check = build_verify_response(params.as_object().unwrap()).ok().unwrap();

        let mut conv = Conversation::new();
        respond(
            &mut conv,
            MessageType::AuthorizationErrorResponse,
            json!({"error": "login_required"}),
        );
        assert!(check(&mut conv).unwrap().is_pass());

        respond(&mut conv, MessageType::AccessTokenResponse, json!({}));
        assert_eq!(check(&mut conv).unwrap().status, Status::Error);

        let params = json!({"response_cls": ["Bogus"]});
        assert!(build_verify_response(params.as_object().unwrap()).is_err());
    }
}
