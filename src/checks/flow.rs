//! Checks on the shape of the protocol flow: error responses where an
//! error was expected, pages that need a human, and where the response
//! parameters ended up.

use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use super::{CheckFn, CheckResult, Params};
use crate::conversation::message::tokens;
use crate::conversation::{Conversation, EventData, EventKind, Message, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, CheckError, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "verify-prompt-none-response",
            name: "prompt=none Response",
            category: CheckCategory::Flow,
            severity: Status::Critical,
            description: "The OP answered prompt=none with an expected error or a valid response",
            constructor: Constructor::Plain(verify_prompt_none_response),
        },
        CheckDef {
            id: "login-required",
            name: "login_required Error",
            category: CheckCategory::Flow,
            severity: Status::Error,
            description: "The OP returned a login_required authorization error",
            constructor: Constructor::Plain(login_required),
        },
        CheckDef {
            id: "interaction-needed",
            name: "Unexpected Page",
            category: CheckCategory::Flow,
            severity: Status::Critical,
            description: "A page nobody expected was shown",
            constructor: Constructor::Plain(interaction_needed),
        },
        CheckDef {
            id: "interaction-check",
            name: "Interaction Required",
            category: CheckCategory::Flow,
            severity: Status::Interaction,
            description: "The flow stopped at a page that needs a human",
            constructor: Constructor::Plain(interaction_check),
        },
        CheckDef {
            id: "verify-implicit-reponse",
            name: "Implicit Response In Fragment",
            category: CheckCategory::Flow,
            severity: Status::Error,
            description: "The implicit flow response arrived in the URL fragment",
            constructor: Constructor::Plain(verify_implicit_response),
        },
        CheckDef {
            id: "verify-redirect_uri-query_component",
            name: "redirect_uri Query Component",
            category: CheckCategory::Flow,
            severity: Status::Error,
            description: "The query component registered with the redirect_uri came back",
            constructor: Constructor::WithParams(build_query_component),
        },
        CheckDef {
            id: "check-query-part",
            name: "Query Part Returned",
            category: CheckCategory::Flow,
            severity: Status::Error,
            description: "Expected query parameters are part of the response",
            constructor: Constructor::WithParams(build_query_part),
        },
    ]
}

const PROMPT_NONE_ERRORS: &[&str] = &["consent_required", "interaction_required"];
const PROMPT_NONE_REDIRECT_ERRORS: &[&str] = &["consent_required", "interaction_required", "login_required"];

/// Run VERIFY-PROMPT-NONE-RESPONSE
///
/// Inspects the last HTTP response. The parsed error or authorization
/// response is appended to the log as a protocol response.
pub fn verify_prompt_none_response(conv: &mut Conversation) -> CheckResult {
    let Some(response) = conv.last_http_response().cloned() else {
        return Ok(Outcome::raised(Status::Critical, "Not an expected response"));
    };
    const SENDER: &str = "verify-prompt-none-response";

    match response.status {
        400 => {
            let claims = match serde_json::from_str::<Value>(&response.body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(CheckError::shape("error response", "a JSON object")),
                Err(e) => return Err(CheckError::decode("error response", e)),
            };
            let err = Message::with_claims(MessageType::ErrorResponse, claims);
            let code = err.str_claim("error")?.unwrap_or_default().to_string();
            if !PROMPT_NONE_ERRORS.contains(&code.as_str()) {
                return Ok(Outcome::raised(Status::Critical, "Not an expected error"));
            }
            let content = Value::Object(err.claims.clone());
            conv.events
                .store(EventKind::ProtocolResponse, EventData::Message(err), SENDER);
            Ok(Outcome::pass().with_detail("content", content))
        }
        301 | 302 | 303 => {
            let location = response.header("location").unwrap_or_default().to_string();
            if !conv.entity.redirect_uris.iter().any(|uri| location.starts_with(uri.as_str())) {
                return Ok(Outcome::raised(
                    Status::Error,
                    "Not valid to not redirect back to RP",
                ));
            }
            let Some((_, query)) = location.split_once('?').or_else(|| location.split_once('#')) else {
                return Ok(Outcome::raised(Status::Critical, "Expected info in the redirect"));
            };
            let query = query.to_string();
            conv.events
                .store(EventKind::Response, EventData::Text(query.clone()), SENDER);

            let parsed = Message::from_urlencoded(MessageType::AuthorizationResponse, &query);
            if let Some(code) = parsed.str_claim("error")? {
                if !PROMPT_NONE_REDIRECT_ERRORS.contains(&code) {
                    return Ok(Outcome::raised(
                        Status::Critical,
                        format!("Not an expected error '{}'", code),
                    ));
                }
                let err = Message::with_claims(MessageType::AuthorizationErrorResponse, parsed.claims);
                conv.events
                    .store(EventKind::ProtocolResponse, EventData::Message(err), SENDER);
                return Ok(Outcome::pass());
            }

            if !is_authorization_response(&parsed) {
                return Ok(Outcome::raised(Status::Critical, "Not an expected response"));
            }
            let content = Value::Object(parsed.claims.clone());
            conv.events
                .store(EventKind::ProtocolResponse, EventData::Message(parsed), SENDER);
            Ok(Outcome::pass().with_detail("content", content))
        }
        status => {
            warn!(status, "unexpected response to prompt=none");
            Ok(Outcome::raised(Status::Critical, "Not an expected response"))
        }
    }
}

/// A redirect that carries a code or a token. An access token needs its
/// token_type.
fn is_authorization_response(msg: &Message) -> bool {
    let has = |claim: &str| msg.contains(claim);
    if has("access_token") && !has("token_type") {
        return false;
    }
    has("code") || has("access_token") || has("id_token")
}

/// Run LOGIN-REQUIRED
pub fn login_required(conv: &mut Conversation) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::raised(Status::Critical, "Expected an Error Response, got nothing"));
    };

    let mut outcome = Outcome::pass();
    if resp.msg_type != MessageType::AuthorizationErrorResponse {
        outcome.escalate(
            Status::Error,
            format!("Expected authorization error response, got {}", resp.msg_type),
        );
        if resp.msg_type != MessageType::ErrorResponse {
            outcome.escalate(
                Status::Critical,
                format!("Expected an Error Response, got {}", resp.msg_type),
            );
            return Ok(outcome);
        }
    }

    if resp.str_claim("error")? != Some("login_required") {
        outcome.escalate(Status::Error, "Wrong error code");
    }
    Ok(outcome)
}

/// Run INTERACTION-NEEDED
pub fn interaction_needed(conv: &mut Conversation) -> CheckResult {
    let url = conv.position.clone().unwrap_or_default();
    Ok(Outcome::raised(Status::Critical, "Unexpected page").with_detail("url", url))
}

/// The URL without its query or fragment.
fn strip_query(position: &str) -> String {
    match Url::parse(position) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => position
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Run INTERACTION-CHECK
pub fn interaction_check(conv: &mut Conversation) -> CheckResult {
    let page = conv
        .events
        .last_item(EventKind::Response)
        .map(EventData::to_text)
        .unwrap_or_else(|| "Interaction required".to_string());
    let url = conv.position.as_deref().map(strip_query).unwrap_or_default();
    Ok(Outcome::raised(Status::Interaction, page).with_detail("url", url))
}

/// Run VERIFY-IMPLICIT-REPONSE
pub fn verify_implicit_response(conv: &mut Conversation) -> CheckResult {
    let fragment = conv
        .info
        .as_deref()
        .and_then(|info| info.split_once('#'))
        .map(|(_, fragment)| fragment)
        .filter(|fragment| !fragment.is_empty());
    let Some(fragment) = fragment else {
        return Ok(Outcome::raised(Status::Error, "Expected response in fragment"));
    };
    let parsed = Message::from_urlencoded(MessageType::AuthorizationResponse, fragment);
    if parsed.claims.is_empty() {
        return Ok(Outcome::raised(Status::Error, "Expected response in fragment"));
    }
    Ok(Outcome::pass())
}

/// Expected query pairs from a parameter map; values must be strings.
fn expected_pairs(params: &Params) -> Result<Vec<(String, String)>, String> {
    params
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(format!("value of '{}' must be a string, got {}", key, other)),
        })
        .collect()
}

fn build_query_component(params: &Params) -> Result<CheckFn, String> {
    let expected = expected_pairs(params)?;
    Ok(Box::new(move |conv| verify_query_component(conv, &expected)))
}

fn build_query_part(params: &Params) -> Result<CheckFn, String> {
    let expected = expected_pairs(params)?;
    Ok(Box::new(move |conv| check_query_part(conv, &expected)))
}

fn has_pair(claims: &Map<String, Value>, key: &str, value: &str) -> bool {
    claims.get(key).and_then(Value::as_str) == Some(value)
}

/// Run VERIFY-REDIRECT_URI-QUERY_COMPONENT
pub fn verify_query_component(conv: &mut Conversation, expected: &[(String, String)]) -> CheckResult {
    let claims = match &conv.query_component {
        Some(query) => Message::from_urlencoded(MessageType::AuthorizationResponse, query).claims,
        None => match conv.last_protocol_response() {
            Some(resp) => resp.claims.clone(),
            None => return Ok(Outcome::pass()),
        },
    };
    for (key, value) in expected {
        if !has_pair(&claims, key, value) {
            return Ok(Outcome::raised(
                Status::Error,
                "Query component that was part of the redirect_uri is missing",
            )
            .with_detail("missing", key.as_str()));
        }
    }
    Ok(Outcome::pass())
}

/// Run CHECK-QUERY-PART
///
/// For the code flow the parameters are looked up in the first
/// authorization response; otherwise in the arguments of the callback.
pub fn check_query_part(conv: &mut Conversation, expected: &[(String, String)]) -> CheckResult {
    let code_flow = match conv.authorization_request().and_then(|req| req.get("response_type").cloned()) {
        Some(value) => tokens(&value, "response_type")? == ["code"],
        None => false,
    };

    let claims = if code_flow {
        conv.protocol_responses(MessageType::AuthorizationResponse)
            .first()
            .map(|m| m.claims.clone())
    } else {
        conv.events
            .get(EventKind::HttpArgs)
            .into_iter()
            .rev()
            .find(|e| e.reference.as_deref() == Some("authz_cb"))
            .and_then(|e| match &e.data {
                EventData::Args(args) => Some(args.clone()),
                _ => None,
            })
    };
    let Some(claims) = claims else {
        return Ok(Outcome::raised(Status::Error, "Query parameters missing"));
    };

    for (key, value) in expected {
        if !has_pair(&claims, key, value) {
            return Ok(Outcome::raised(
                Status::Error,
                format!("The query component {}={} not part of the response", key, value),
            ));
        }
    }
    Ok(Outcome::pass())
}
