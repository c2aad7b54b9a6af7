//! Check catalog.
//!
//! Checks are organized by what they look at:
//! - Support: provider metadata covers what the request used
//! - Provider: discovery document and entity configuration
//! - Claims: claim sets of ID Tokens and UserInfo
//! - Responses: token endpoint, registration and login page
//! - Signing: JOSE headers of tokens
//! - Consistency: values that must agree across messages
//! - Flow: shape of the protocol flow
//! - Transport: HTTPS use and content types
//! - Keys: published and configured keys
//! - Generic: framework-level response checks, registered in the parent
//!   registry
//!
//! # Applicability
//!
//! A check whose data is absent from the conversation passes with an empty
//! outcome, unless that data is what the check exists to verify. Data of an
//! unexpected shape is returned as `CheckError` and the runner records a
//! critical failure for that check alone.

pub mod claims;
pub mod consistency;
pub mod flow;
pub mod generic;
pub mod keys;
pub mod provider;
pub mod responses;
pub mod signing;
pub mod support;
pub mod transport;

use serde::de::{DeserializeOwned, Deserializer, IgnoredAny};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::conversation::message::strings;
use crate::conversation::{Conversation, Message};
use crate::engine::registry::CheckDef;
use crate::{CheckError, Outcome};

/// Result of evaluating a check.
pub type CheckResult = Result<Outcome, CheckError>;

/// A check bound to its parameters, ready to run.
pub type CheckFn = Box<dyn Fn(&mut Conversation) -> CheckResult + Send + Sync>;

/// Per-invocation parameters as written in a flow.
pub type Params = Map<String, Value>;

pub(crate) const NO_ID_TOKEN: &str = "No response to get the ID Token from";

/// Every check of the OP catalog.
pub fn all_definitions() -> Vec<CheckDef> {
    let mut defs = Vec::new();
    defs.extend(support::definitions());
    defs.extend(provider::definitions());
    defs.extend(claims::definitions());
    defs.extend(responses::definitions());
    defs.extend(signing::definitions());
    defs.extend(consistency::definitions());
    defs.extend(flow::definitions());
    defs.extend(transport::definitions());
    defs.extend(keys::definitions());
    defs
}

/// Deserialize a parameter map into the check's parameter struct.
pub(crate) fn parse_params<P: DeserializeOwned>(params: &Params) -> Result<P, String> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| e.to_string())
}

/// Bind `check` to its parsed parameters.
pub(crate) fn with_params<P>(
    params: &Params,
    check: fn(&mut Conversation, &P) -> CheckResult,
) -> Result<CheckFn, String>
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    let parsed: P = parse_params(params)?;
    Ok(Box::new(move |conv| check(conv, &parsed)))
}

/// Deserialize a flag that is set by the mere presence of its key,
/// whatever the value (`{"id_token": null}` sets `id_token`).
pub(crate) fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

/// The last ID Token received, if any.
pub(crate) fn last_id_token(conv: &Conversation) -> Result<Option<Message>, CheckError> {
    Ok(conv.id_tokens()?.pop())
}

/// Whether a claim value satisfies an individual claim request
/// (`null`, `{"essential": ..}`, `{"value": ..}` or `{"values": [..]}`).
/// A list-valued claim matches `values` when every item does.
pub fn claims_match(value: &Value, spec: &Value) -> bool {
    let Value::Object(spec) = spec else {
        return true;
    };
    if let Some(expected) = spec.get("value") {
        if value != expected {
            return false;
        }
    }
    if let Some(Value::Array(allowed)) = spec.get("values") {
        let ok = match value {
            Value::Array(items) => items.iter().all(|item| allowed.contains(item)),
            single => allowed.contains(single),
        };
        if !ok {
            return false;
        }
    }
    true
}

/// The `claims` request parameter of a request, accepting both its JSON
/// object form and the JSON string form it has on the wire.
pub(crate) fn claims_request(req: &Message) -> Result<Option<Map<String, Value>>, CheckError> {
    match req.get("claims") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(s)) => match serde_json::from_str(s) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(CheckError::shape("claims", "a JSON object")),
            Err(e) => Err(CheckError::decode("claims", e)),
        },
        Some(_) => Err(CheckError::shape("claims", "a JSON object")),
    }
}

/// Member `section` (`id_token` or `userinfo`) of the claims request.
pub(crate) fn requested_claims(
    req: &Message,
    section: &str,
) -> Result<Option<Map<String, Value>>, CheckError> {
    match claims_request(req)?.and_then(|mut c| c.remove(section)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(CheckError::shape(format!("claims.{}", section), "a JSON object")),
    }
}

/// A provider metadata list, `None` when the OP does not advertise it.
pub(crate) fn provider_list(conv: &Conversation, key: &str) -> Result<Option<Vec<String>>, CheckError> {
    match conv.provider_info().get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => strings(value, key).map(Some),
    }
}

/// Format a list of names the way messages quote them: `['a', 'b']`.
pub(crate) fn quoted<S: AsRef<str>>(names: &[S]) -> String {
    let inner: Vec<String> = names.iter().map(|n| format!("'{}'", n.as_ref())).collect();
    format!("[{}]", inner.join(", "))
}
