//! Checks on values that must agree across the messages of a conversation.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{claims_request, last_id_token, with_params, CheckFn, CheckResult, Params, NO_ID_TOKEN};
use crate::conversation::{Conversation, EventData, EventKind, Message, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, CheckError, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "check-idtoken-nonce",
            name: "ID Token Nonce",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "The ID Token carries the nonce of the authorization request",
            constructor: Constructor::Plain(check_idtoken_nonce),
        },
        CheckDef {
            id: "verify-nonce",
            name: "Nonce Echoed",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "The nonce of the redirect equals the nonce of the ID Token",
            constructor: Constructor::Plain(verify_nonce),
        },
        CheckDef {
            id: "verify-state",
            name: "State Echoed",
            category: CheckCategory::Consistency,
            severity: Status::Information,
            description: "The authorization response returns the state sent",
            constructor: Constructor::Plain(verify_state),
        },
        CheckDef {
            id: "verify-aud",
            name: "Audience Stable",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "The first two ID Tokens have the same audience",
            constructor: Constructor::Plain(verify_aud),
        },
        CheckDef {
            id: "verify-iss",
            name: "Issuer Matches",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Every ID Token is issued by the discovered issuer",
            constructor: Constructor::Plain(verify_iss),
        },
        CheckDef {
            id: "different_sub",
            name: "Pairwise sub",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Public and pairwise subject identifiers differ",
            constructor: Constructor::Plain(different_sub),
        },
        CheckDef {
            id: "verify-sub-value",
            name: "Requested sub",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "The ID Token has the sub value requested in the claims request",
            constructor: Constructor::Plain(verify_sub_value),
        },
        CheckDef {
            id: "verify-different-sub",
            name: "Different sub",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Two ID Tokens carry different sub values",
            constructor: Constructor::Plain(verify_different_sub),
        },
        CheckDef {
            id: "verify-id_token-userinfo-same-sub",
            name: "ID Token and UserInfo sub",
            category: CheckCategory::Consistency,
            severity: Status::Information,
            description: "ID Tokens and UserInfo name the same subject",
            constructor: Constructor::Plain(id_token_userinfo_same_sub),
        },
        CheckDef {
            id: "single-sign-on",
            name: "Single Sign-On",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Only one authentication took place",
            constructor: Constructor::Plain(single_sign_on),
        },
        CheckDef {
            id: "multiple-sign-on",
            name: "Multiple Sign-On",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Two separate authentications took place",
            constructor: Constructor::WithParams(build_multiple_sign_on),
        },
        CheckDef {
            id: "same-authn",
            name: "Same Authentication",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Two ID Tokens stem from one authentication",
            constructor: Constructor::Plain(same_authn),
        },
        CheckDef {
            id: "valid_code",
            name: "Valid Access Code",
            category: CheckCategory::Consistency,
            severity: Status::Error,
            description: "Exactly one unexpired access code was issued",
            constructor: Constructor::Plain(valid_code),
        },
    ]
}

/// Run CHECK-IDTOKEN-NONCE
pub fn check_idtoken_nonce(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let Some(nonce) = req.str_claim("nonce")? else {
        return Ok(Outcome::pass());
    };
    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::pass());
    };
    if idt.str_claim("nonce")? == Some(nonce) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Expected same nonce back as sent"))
    }
}

/// Run VERIFY-NONCE: the nonce in the redirect URL against the ID Token
pub fn verify_nonce(conv: &mut Conversation) -> CheckResult {
    let Some(url) = conv
        .events
        .get_data(EventKind::RedirectUrl)
        .into_iter()
        .filter_map(EventData::as_text)
        .next()
    else {
        return Ok(Outcome::pass());
    };
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    let req = Message::from_urlencoded(MessageType::AuthorizationRequest, query);
    let sent = req.str_claim("nonce")?.unwrap_or_default();

    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::raised(Status::Error, NO_ID_TOKEN));
    };
    let received = idt.str_claim("nonce")?.unwrap_or_default();
    if sent == received {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Expected same nonce back as sent"))
    }
}

/// Run VERIFY-STATE
pub fn verify_state(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let Some(resp) = conv.protocol_responses(MessageType::AuthorizationResponse).last().copied() else {
        return Ok(Outcome::pass());
    };
    if req.str_claim("state")? == resp.str_claim("state")? {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Information,
            "The state value returned not the same as sent",
        ))
    }
}

/// Run VERIFY-AUD
pub fn verify_aud(conv: &mut Conversation) -> CheckResult {
    let tokens = conv.id_tokens()?;
    let [first, second, ..] = tokens.as_slice() else {
        return Ok(Outcome::pass());
    };
    if first.get("aud") == second.get("aud") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Not the same aud in the ID Tokens"))
    }
}

/// Run VERIFY-ISS
pub fn verify_iss(conv: &mut Conversation) -> CheckResult {
    let Some(issuer) = conv.provider_info().get("issuer").and_then(Value::as_str) else {
        return Ok(Outcome::pass());
    };
    for idt in conv.id_tokens()? {
        if idt.str_claim("iss")? != Some(issuer) {
            return Ok(Outcome::raised(Status::Error, "Wrong iss value"));
        }
    }
    Ok(Outcome::pass())
}

/// Run DIFFERENT_SUB
///
/// Expects ID Tokens from a public and a pairwise client. Tokens repeated
/// for the same audience are weeded out before the subs are compared.
pub fn different_sub(conv: &mut Conversation) -> CheckResult {
    let tokens = conv.id_tokens()?;
    if tokens.len() < 2 {
        return Ok(Outcome::raised(Status::Error, "Too few ID Tokens"));
    }

    let first_aud = tokens[0].get("aud");
    let others: Vec<&Message> = tokens[1..].iter().filter(|t| t.get("aud") != first_aud).collect();
    let mut unique: Vec<&Message> = Vec::new();
    for token in others {
        if !unique.iter().any(|u| u.claims == token.claims) {
            unique.push(token);
        }
    }

    match unique.as_slice() {
        [] => Ok(Outcome::raised(Status::Error, "Seems the same ID token was returned")),
        [other] => {
            if tokens[0].get("sub") == other.get("sub") {
                Ok(Outcome::raised(Status::Error, "sub not changed between public and pairwise"))
            } else {
                Ok(Outcome::pass())
            }
        }
        _ => Ok(Outcome::raised(Status::Error, "Too many unique ID tokens")),
    }
}

/// Why no sub value could be found in the claims request.
fn requested_sub(req: &Message) -> Result<Result<Value, &'static str>, CheckError> {
    let Some(claims) = claims_request(req)? else {
        return Ok(Err("No claims request in the Authorization request"));
    };
    let Some(id_token) = claims.get("id_token") else {
        return Ok(Err("No id_token claims request"));
    };
    let Some(sub) = id_token.get("sub") else {
        return Ok(Err("No claims request for \"sub\" in id_token"));
    };
    match sub.get("value") {
        Some(value) => Ok(Ok(value.clone())),
        None => Ok(Err("Faulty claims request")),
    }
}

/// Run VERIFY-SUB-VALUE
pub fn verify_sub_value(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.protocol_requests(MessageType::AuthorizationRequest).last().map(|m| (*m).clone())
    else {
        return Ok(Outcome::raised(
            Status::Error,
            "No claims request in the Authorization request",
        ));
    };
    let expected = match requested_sub(&req)? {
        Ok(value) => value,
        Err(reason) => return Ok(Outcome::raised(Status::Error, reason)),
    };
    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::pass());
    };
    if idt.get("sub") == Some(&expected) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Unexpected sub value"))
    }
}

/// Run VERIFY-DIFFERENT-SUB
pub fn verify_different_sub(conv: &mut Conversation) -> CheckResult {
    let tokens = conv.id_tokens()?;
    let [first, second, ..] = tokens.as_slice() else {
        return Ok(Outcome::raised(Status::Error, "Not enough sub values"));
    };
    if first.get("sub") == second.get("sub") {
        Ok(Outcome::raised(Status::Error, "sub not changed"))
    } else {
        Ok(Outcome::pass())
    }
}

/// Run VERIFY-ID_TOKEN-USERINFO-SAME-SUB
pub fn id_token_userinfo_same_sub(conv: &mut Conversation) -> CheckResult {
    let Some(userinfo) = conv.protocol_responses(MessageType::UserInfo).last().map(|m| (*m).clone()) else {
        return Ok(Outcome::pass());
    };
    let sub = userinfo.get("sub");
    for idt in conv.id_tokens()? {
        if idt.get("sub") != sub {
            return Ok(Outcome::raised(
                Status::Information,
                "The sub value in the ID Token and UserInfo differ",
            ));
        }
    }
    Ok(Outcome::pass())
}

/// Run SINGLE-SIGN-ON
pub fn single_sign_on(conv: &mut Conversation) -> CheckResult {
    if conv.protocol_responses(MessageType::AuthorizationResponse).len() > 1 {
        Ok(Outcome::raised(
            Status::Error,
            "Multiple authentications when only one was expected",
        ))
    } else {
        Ok(Outcome::pass())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultipleSignOnParams {
    /// Status to raise when both tokens stem from one authentication
    #[serde(default)]
    pub status: Option<Status>,
}

fn build_multiple_sign_on(params: &Params) -> Result<CheckFn, String> {
    with_params(params, multiple_sign_on)
}

/// Run MULTIPLE-SIGN-ON
///
/// With four ID Tokens (code plus token responses of two authentications)
/// the pair compared is the first token and the first one carrying a
/// different nonce.
pub fn multiple_sign_on(conv: &mut Conversation, params: &MultipleSignOnParams) -> CheckResult {
    let tokens = conv.id_tokens()?;
    let pair = match tokens.as_slice() {
        [] => return Ok(Outcome::raised(params.status.unwrap_or(Status::Error), NO_ID_TOKEN)),
        [_] => {
            return Ok(Outcome::raised(
                Status::Error,
                "Only one authentication when more than one was expected",
            ));
        }
        [first, rest @ ..] if tokens.len() == 4 => {
            let nonce = first.get("nonce");
            match rest.iter().find(|t| t.get("nonce") != nonce) {
                Some(other) => (first, other),
                None => (first, &rest[0]),
            }
        }
        [first, second, ..] => (first, second),
    };
    debug!(tokens = tokens.len(), "comparing authentications");

    match (pair.0.get("auth_time"), pair.1.get("auth_time")) {
        (Some(a), Some(b)) if a == b => Ok(Outcome::raised(
            params.status.unwrap_or(Status::Error),
            "Not two separate authentications!",
        )),
        (Some(_), Some(_)) => Ok(Outcome::pass()),
        _ => Ok(Outcome::note(
            "No \"auth_time\" found in both ID tokens so it cannot be compared",
        )),
    }
}

/// Run SAME-AUTHN
pub fn same_authn(conv: &mut Conversation) -> CheckResult {
    let tokens = conv.id_tokens()?;
    let [first, second, ..] = tokens.as_slice() else {
        return Ok(Outcome::raised(
            Status::Error,
            format!("Expected more than one authentication found {}", tokens.len()),
        ));
    };
    if first.get("auth_time") == second.get("auth_time") && first.get("sub") == second.get("sub") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Not one authentication!"))
    }
}

/// Run VALID_CODE: exactly one grant was issued and it is still valid
pub fn valid_code(conv: &mut Conversation) -> CheckResult {
    let now = Utc::now().timestamp();
    let mut grants = conv.entity.grants.values();
    match (grants.next(), grants.next()) {
        (Some(grant), None) if grant.is_valid(now) => Ok(Outcome::pass()),
        _ => Ok(Outcome::raised(Status::Error, "No valid access code")),
    }
}
