//! Claim set checks for ID Tokens and UserInfo responses.
//!
//! What was asked for comes from the authorization request: the scopes
//! (mapped to claims through the standard scope table), the `claims`
//! request parameter and a request object if one was sent.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    claims_match, last_id_token, present, quoted, requested_claims, with_params, CheckFn, CheckResult, Params,
    NO_ID_TOKEN,
};
use crate::conversation::message::tokens;
use crate::conversation::{Conversation, EventKind, Message, MessageType};
use crate::data::scopes::claims_for_scopes;
use crate::engine::registry::{CheckDef, Constructor};
use crate::jose;
use crate::{CheckCategory, CheckError, Outcome, Status};

/// Get all claim checks
pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "verify-claims",
            name: "Requested Claims Returned",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "Claims in UserInfo or the ID Token match what was requested",
            constructor: Constructor::WithParams(build_verify_claims),
        },
        CheckDef {
            id: "verify-id-token",
            name: "ID Token Claims",
            category: CheckCategory::Claims,
            severity: Status::Critical,
            description: "Every ID Token holds the claims requested for it",
            constructor: Constructor::Plain(verify_id_token),
        },
        CheckDef {
            id: "verify-userinfo",
            name: "Essential UserInfo",
            category: CheckCategory::Claims,
            severity: Status::Error,
            description: "UserInfo holds the scope-derived and essential claims",
            constructor: Constructor::Plain(verify_userinfo),
        },
        CheckDef {
            id: "verify-scopes",
            name: "Scope Claims Returned",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "Claims implied by the requested scopes were returned",
            constructor: Constructor::Plain(verify_scopes),
        },
        CheckDef {
            id: "claims-check",
            name: "ID Token Claims Present",
            category: CheckCategory::Claims,
            severity: Status::Error,
            description: "Named claims are present in the last ID Token",
            constructor: Constructor::WithParams(build_claims_check),
        },
        CheckDef {
            id: "got_id_token_claims",
            name: "Claims In ID Token",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "Named claims made it into the ID Token",
            constructor: Constructor::WithParams(build_got_id_token_claims),
        },
        CheckDef {
            id: "got_userinfo_claims",
            name: "Claims In UserInfo",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "Named claims made it into the UserInfo response",
            constructor: Constructor::WithParams(build_got_userinfo_claims),
        },
        CheckDef {
            id: "got",
            name: "Attributes In Response",
            category: CheckCategory::Claims,
            severity: Status::Error,
            description: "Named attributes are present in a given protocol response",
            constructor: Constructor::WithParams(build_got),
        },
        CheckDef {
            id: "used-acr-value",
            name: "ACR Value Used",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "Reports the acr of the ID Token against the preferred values",
            constructor: Constructor::Plain(used_acr_value),
        },
        CheckDef {
            id: "auth_time-check",
            name: "auth_time Range",
            category: CheckCategory::Claims,
            severity: Status::Warning,
            description: "auth_time of the last ID Token lies in the expected range",
            constructor: Constructor::WithParams(build_auth_time_check),
        },
        CheckDef {
            id: "unpack-aggregated-claims",
            name: "Aggregated Claims",
            category: CheckCategory::Claims,
            severity: Status::Error,
            description: "Aggregated and distributed claim references resolve",
            constructor: Constructor::Plain(unpack_aggregated_claims),
        },
    ]
}

fn scopes(req: &Message) -> Result<Option<Vec<String>>, CheckError> {
    match req.get("scope") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => tokens(value, "scope").map(Some),
    }
}

fn response_type_is_id_token(req: &Message) -> Result<bool, CheckError> {
    match req.get("response_type") {
        None | Some(Value::Null) => Ok(false),
        Some(value) => Ok(tokens(value, "response_type")? == ["id_token"]),
    }
}

fn one_or_many(one: &str, many: &str, names: &[String]) -> String {
    match names {
        [single] => format!("{}: {}", one, single),
        _ => format!("{}: {}", many, quoted(names)),
    }
}

fn claim_names<'a>(claims: impl Iterator<Item = &'a String>) -> Value {
    Value::from(claims.cloned().collect::<Vec<_>>())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyClaimsParams {
    /// Look for the claims in UserInfo
    #[serde(default, deserialize_with = "present")]
    pub userinfo: bool,
    /// Look for the claims in the ID Token
    #[serde(default, deserialize_with = "present")]
    pub id_token: bool,
}

fn build_verify_claims(params: &Params) -> Result<CheckFn, String> {
    with_params(params, verify_claims)
}

/// Run VERIFY-CLAIMS
pub fn verify_claims(conv: &mut Conversation, params: &VerifyClaimsParams) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let mut outcome = Outcome::pass();

    if params.userinfo {
        if response_type_is_id_token(&req)? {
            // No UserInfo in this flow, the claims travel in the ID Token
            let claims = requested_claims(&req, "userinfo")?;
            if let Some(claims) = claims {
                idtoken_claims(conv, &claims, &mut outcome, "idtoken")?;
            }
        } else {
            userinfo_claims(conv, &req, &mut outcome)?;
        }
    }
    if params.id_token {
        if let Some(claims) = requested_claims(&req, "id_token")? {
            idtoken_claims(conv, &claims, &mut outcome, "idtoken")?;
        }
    }
    Ok(outcome)
}

/// Claims requested through a request object, if one was sent signed.
fn request_object_claims(req: &Message, section: &str) -> Result<Option<Map<String, Value>>, CheckError> {
    let Some(token) = req.str_claim("request")? else {
        return Ok(None);
    };
    let jose::Compact::Jws { .. } = jose::split_token(token)? else {
        return Ok(None);
    };
    let object = Message::with_claims(MessageType::AuthorizationRequest, jose::unverified_claims(token)?);
    requested_claims(&object, section)
}

fn userinfo_claims(conv: &Conversation, req: &Message, outcome: &mut Outcome) -> Result<(), CheckError> {
    let Some(scopes) = scopes(req)? else {
        return Ok(());
    };

    let mut expected: Map<String, Value> = claims_for_scopes(&scopes)
        .into_iter()
        .map(|claim| (claim.to_string(), Value::Null))
        .collect();
    for section in [request_object_claims(req, "userinfo")?, requested_claims(req, "userinfo")?]
        .into_iter()
        .flatten()
    {
        expected.extend(section);
    }
    debug!(claims = ?expected.keys().collect::<Vec<_>>(), "userinfo claims");

    let Some(userinfo) = conv.protocol_responses(MessageType::UserInfo).first().copied() else {
        return Ok(());
    };

    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    for (claim, spec) in &expected {
        match userinfo.get(claim) {
            None => missing.push(claim.clone()),
            Some(value) if !claims_match(value, spec) => mismatched.push(claim.clone()),
            Some(_) => {}
        }
    }
    let extra: Vec<String> = userinfo
        .claims
        .keys()
        .filter(|c| !expected.contains_key(*c))
        .cloned()
        .collect();

    if missing.is_empty() && extra.is_empty() && mismatched.is_empty() {
        return Ok(());
    }

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(one_or_many("Missing required claim", "Missing required claims", &missing));
    }
    if !extra.is_empty() {
        parts.push(match extra.as_slice() {
            [single] => format!("Unexpected {} claim in response", single),
            _ => format!("Unexpected claims in response: {}", quoted(&extra)),
        });
    }
    if !mismatched.is_empty() {
        parts.push(one_or_many(
            "Claim that didn't match request",
            "Claims that didn't match request",
            &mismatched,
        ));
    }

    outcome.escalate(Status::Warning, parts.join(", "));
    outcome.detail.insert(
        "userinfo".to_string(),
        serde_json::json!({
            "returned claims": claim_names(userinfo.claims.keys()),
            "expected claims": claim_names(expected.keys()),
        }),
    );
    Ok(())
}

fn idtoken_claims(
    conv: &Conversation,
    claims: &Map<String, Value>,
    outcome: &mut Outcome,
    key: &str,
) -> Result<(), CheckError> {
    debug!(claims = ?claims.keys().collect::<Vec<_>>(), "id_token claims");
    let Some(idt) = conv.id_tokens()?.into_iter().next() else {
        outcome.escalate(Status::Warning, NO_ID_TOKEN);
        return Ok(());
    };

    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    for (claim, spec) in claims {
        match idt.get(claim) {
            None => missing.push(claim.clone()),
            Some(value) if !claims_match(value, spec) => mismatched.push(claim.clone()),
            Some(_) => {}
        }
    }

    if missing.is_empty() && mismatched.is_empty() {
        return Ok(());
    }

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(one_or_many("Missing required claim", "Missing required claims", &missing));
    }
    if !mismatched.is_empty() {
        parts.push(one_or_many(
            "Claim that didn't match request",
            "Claims that didn't match request",
            &mismatched,
        ));
    }

    outcome.escalate(Status::Warning, parts.join(", "));
    outcome.detail.insert(
        key.to_string(),
        serde_json::json!({
            "returned claims": claim_names(idt.claims.keys()),
            "required claims": claim_names(claims.keys()),
        }),
    );
    Ok(())
}

/// Why an ID Token fails one individual claim request, if it does.
fn id_token_claim_problem(idt: &Message, claim: &str, spec: &Value, now: i64) -> Result<Option<String>, CheckError> {
    if claim == "max_age" {
        let max_age = spec
            .as_i64()
            .ok_or_else(|| CheckError::shape("claims.id_token.max_age", "an integer"))?;
        let Some(exp) = idt.get("exp") else {
            return Ok(None);
        };
        let exp = exp.as_i64().ok_or_else(|| CheckError::shape("exp", "an integer"))?;
        if exp > now + max_age {
            return Ok(Some(format!("exp too far in the future [{}]", exp - now)));
        }
        return Ok(None);
    }

    let value = idt.get(claim);
    let spec_map = match spec {
        Value::Null => {
            return Ok(value.is_none().then(|| format!("'{}' claim was supposed to be present", claim)));
        }
        Value::Object(map) => map,
        _ => return Err(CheckError::shape(format!("claims.id_token.{}", claim), "null or an object")),
    };

    if spec_map.get("values").is_some() || spec_map.get("value").is_some() {
        return Ok(match value {
            None => Some(format!("Missing value on '{}' claim", claim)),
            Some(v) if !claims_match(v, spec) => Some(format!("Wrong value on '{}'", claim)),
            Some(_) => None,
        });
    }
    if spec_map.get("essential") == Some(&Value::Bool(true)) && value.is_none() {
        return Ok(Some(format!("'{}' claim was expected to be present", claim)));
    }
    Ok(None)
}

/// Run VERIFY-ID-TOKEN: each ID Token against `claims.id_token`
pub fn verify_id_token(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let Some(requested) = requested_claims(&req, "id_token")? else {
        return Ok(Outcome::pass());
    };

    let now = Utc::now().timestamp();
    for idt in conv.id_tokens()? {
        for (claim, spec) in &requested {
            if let Some(problem) = id_token_claim_problem(&idt, claim, spec, now)? {
                return Ok(Outcome::raised(Status::Critical, problem));
            }
        }
    }
    Ok(Outcome::pass())
}

/// Run VERIFY-USERINFO: scope claims and essential claims are present
pub fn verify_userinfo(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let Some(userinfo) = conv.protocol_responses(MessageType::UserInfo).last().copied() else {
        return Ok(Outcome::pass());
    };

    let mut expected: Map<String, Value> = Map::new();
    // Legacy request shape: {"userinfo_claims": {"claims": {..}}}
    if let Some(Value::Object(legacy)) = req.get("userinfo_claims").and_then(|u| u.get("claims")) {
        expected.extend(legacy.clone());
    }
    if let Some(requested) = requested_claims(&req, "userinfo")? {
        expected.extend(requested);
    }
    for claim in claims_for_scopes(&scopes(&req)?.unwrap_or_default()) {
        expected.insert(claim.to_string(), serde_json::json!({"essential": true}));
    }

    let mut missing = Vec::new();
    for (claim, spec) in &expected {
        let Value::Object(spec_map) = spec else {
            continue;
        };
        let ok = match userinfo.get(claim) {
            None => spec_map.get("essential") != Some(&Value::Bool(true)) && !spec_map.contains_key("value"),
            Some(value) => claims_match(value, spec),
        };
        if !ok {
            missing.push(claim.clone());
        }
    }

    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Essential UserInfo missing").with_detail("missing", missing))
    }
}

/// Run VERIFY-SCOPES
pub fn verify_scopes(conv: &mut Conversation) -> CheckResult {
    let Some(req) = conv.authorization_request() else {
        return Ok(Outcome::pass());
    };
    let Some(scopes) = scopes(&req)? else {
        return Ok(Outcome::pass());
    };
    let claims = claims_for_scopes(&scopes);

    let container = if response_type_is_id_token(&req)? {
        // Everything should be in the ID Token
        match conv.protocol_responses(MessageType::AuthorizationResponse).last() {
            Some(resp) => resp.embedded_id_token()?,
            None => None,
        }
    } else {
        conv.protocol_responses(MessageType::UserInfo).last().map(|m| (*m).clone())
    };
    let Some(container) = container else {
        return Ok(Outcome::pass());
    };

    let missing: Vec<&str> = claims.into_iter().filter(|c| !container.contains(c)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Warning,
            format!(
                "The following claims were missing from the returned information: {}",
                quoted(&missing)
            ),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimsCheckParams {
    /// Claims that should be present in the ID Token
    #[serde(default)]
    pub id_token: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
}

fn build_claims_check(params: &Params) -> Result<CheckFn, String> {
    with_params(params, claims_check)
}

/// Run CLAIMS-CHECK
pub fn claims_check(conv: &mut Conversation, params: &ClaimsCheckParams) -> CheckResult {
    let Some(claims) = &params.id_token else {
        return Ok(Outcome::pass());
    };
    let status = if params.required { Status::Error } else { Status::Warning };

    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::raised(status, NO_ID_TOKEN));
    };

    let missing: Vec<&String> = claims.iter().filter(|c| !idt.contains(c)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(status, format!("Missing claims: {}", quoted(&missing))))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedClaimsParams {
    pub claims: Vec<String>,
}

fn build_got_id_token_claims(params: &Params) -> Result<CheckFn, String> {
    with_params(params, got_id_token_claims)
}

fn build_got_userinfo_claims(params: &Params) -> Result<CheckFn, String> {
    with_params(params, got_userinfo_claims)
}

/// Run GOT_ID_TOKEN_CLAIMS: against the first ID Token received
pub fn got_id_token_claims(conv: &mut Conversation, params: &ExpectedClaimsParams) -> CheckResult {
    let Some(idt) = conv.id_tokens()?.into_iter().next() else {
        return Ok(Outcome::raised(Status::Warning, NO_ID_TOKEN));
    };
    let missing: Vec<&String> = params.claims.iter().filter(|c| !idt.contains(c)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Warning,
            format!("The following claims didn't make it to the Id Token: {}", quoted(&missing)),
        ))
    }
}

/// Run GOT_USERINFO_CLAIMS: against the first UserInfo response
pub fn got_userinfo_claims(conv: &mut Conversation, params: &ExpectedClaimsParams) -> CheckResult {
    let Some(userinfo) = conv.protocol_responses(MessageType::UserInfo).first().copied() else {
        return Ok(Outcome::raised(Status::Warning, "No UserInfo response to get the claims from"));
    };
    let missing: Vec<&String> = params.claims.iter().filter(|c| !userinfo.contains(c)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Warning,
            format!("The following claims didn't make it to the UserInfo: {}", quoted(&missing)),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GotParams {
    /// Message type of the response, e.g. `AccessTokenResponse`
    #[serde(rename = "where")]
    pub location: String,
    /// Attributes expected in it
    pub what: Vec<String>,
}

fn build_got(params: &Params) -> Result<CheckFn, String> {
    let parsed: GotParams = super::parse_params(params)?;
    let msg_type = MessageType::parse(&parsed.location)
        .ok_or_else(|| format!("unknown response type '{}'", parsed.location))?;
    Ok(Box::new(move |conv| got(conv, msg_type, &parsed)))
}

/// Run GOT: attributes present in the first response of a given type
pub fn got(conv: &mut Conversation, msg_type: MessageType, params: &GotParams) -> CheckResult {
    let Some(response) = conv.protocol_responses(msg_type).first().copied() else {
        return Ok(Outcome::raised(Status::Error, format!("No {} received", params.location)));
    };
    let missing: Vec<String> = params
        .what
        .iter()
        .filter(|c| !response.contains(c))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Error,
            format!("The following attributes didn't make it to the {}", params.location),
        )
        .with_detail("missing", missing))
    }
}

/// Run USED-ACR-VALUE: reports the acr used; warns when not preferred
pub fn used_acr_value(conv: &mut Conversation) -> CheckResult {
    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::raised(Status::Warning, NO_ID_TOKEN));
    };
    let preferred = match conv.authorization_request() {
        Some(req) => match req.get("acr_values") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => tokens(value, "acr_values")?,
        },
        None => Vec::new(),
    };

    let Some(acr) = idt.str_claim("acr")? else {
        return Ok(Outcome::raised(Status::Warning, "No acr value present in the ID Token"));
    };

    let message = format!("Used acr value: {}, preferred: {}", acr, quoted(&preferred));
    if preferred.iter().any(|p| p == acr) {
        Ok(Outcome::note(message))
    } else {
        Ok(Outcome::raised(Status::Warning, message))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthTimeParams {
    /// Maximum authentication age requested, in seconds
    pub max_age: i64,
    /// Allowed clock skew in seconds
    #[serde(default)]
    pub skew: i64,
}

fn build_auth_time_check(params: &Params) -> Result<CheckFn, String> {
    let parsed: AuthTimeParams = super::parse_params(params)?;
    if parsed.max_age < 0 || parsed.skew < 0 {
        return Err("max_age and skew must not be negative".to_string());
    }
    Ok(Box::new(move |conv| auth_time_check(conv, &parsed)))
}

/// Run AUTH_TIME-CHECK
///
/// `T0 - max_age - skew <= auth_time <= now + skew`, where `T0` is when the
/// last authorization request was sent.
pub fn auth_time_check(conv: &mut Conversation, params: &AuthTimeParams) -> CheckResult {
    let Some(idt) = last_id_token(conv)? else {
        return Ok(Outcome::raised(Status::Error, NO_ID_TOKEN));
    };

    let auth_time = match idt.get("auth_time") {
        None | Some(Value::Null) => {
            return Ok(Outcome::raised(
                Status::Error,
                "There is no auth_time claim in the ID Token.",
            ));
        }
        Some(value) => value
            .as_f64()
            .map(|t| t as i64)
            .ok_or_else(|| CheckError::shape("auth_time", "a number"))?,
    };

    let sent = conv
        .events
        .when(EventKind::ProtocolRequest, MessageType::AuthorizationRequest)
        .last()
        .copied();
    let low = sent.map(|t| (t - params.max_age as f64) as i64 - params.skew);
    let high = Utc::now().timestamp() + params.skew;

    if auth_time > high || low.is_some_and(|low| auth_time < low) {
        let range = match low {
            Some(low) => format!("{} - {}", low, high),
            None => format!("? - {}", high),
        };
        return Ok(Outcome::raised(
            Status::Warning,
            format!("auth_time [{}] not in the expected range: {}", auth_time, range),
        ));
    }
    Ok(Outcome::pass())
}

/// Resolve the `_claim_names` references of a response against its
/// `_claim_sources`.
fn unpack(resp: &Message) -> Result<Vec<String>, String> {
    let names = match resp.get("_claim_names") {
        None => return Ok(Vec::new()),
        Some(Value::Object(names)) => names,
        Some(_) => return Err("_claim_names is not an object".to_string()),
    };
    let sources = match resp.get("_claim_sources") {
        Some(Value::Object(sources)) => sources,
        _ => return Err("_claim_sources missing".to_string()),
    };

    let mut unpacked = Vec::new();
    for (claim, source) in names {
        let source = source
            .as_str()
            .ok_or_else(|| format!("source of '{}' is not a string", claim))?;
        let spec = sources
            .get(source)
            .ok_or_else(|| format!("source '{}' of '{}' not defined", source, claim))?;

        if let Some(jwt) = spec.get("JWT") {
            let jwt = jwt.as_str().ok_or_else(|| format!("JWT of source '{}' is not a string", source))?;
            let claims = jose::unverified_claims(jwt).map_err(|e| format!("source '{}': {}", source, e))?;
            if !claims.contains_key(claim) {
                return Err(format!("'{}' not in aggregated source '{}'", claim, source));
            }
        } else if spec.get("endpoint").and_then(Value::as_str).is_none() {
            return Err(format!("source '{}' has neither JWT nor endpoint", source));
        }
        unpacked.push(claim.clone());
    }
    Ok(unpacked)
}

/// Run UNPACK-AGGREGATED-CLAIMS against the last protocol response
pub fn unpack_aggregated_claims(conv: &mut Conversation) -> CheckResult {
    let Some(resp) = conv.last_protocol_response() else {
        return Ok(Outcome::pass());
    };
    match unpack(resp) {
        Ok(claims) if claims.is_empty() => Ok(Outcome::pass()),
        Ok(claims) => Ok(Outcome::pass().with_detail("claims", claims)),
        Err(reason) => Ok(Outcome::raised(
            Status::Error,
            format!("Unable to unpack aggregated claims: {}", reason),
        )),
    }
}
