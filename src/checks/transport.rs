//! HTTPS use and content types.

use serde::Deserialize;
use serde_json::Value;

use super::{quoted, with_params, CheckFn, CheckResult, Params};
use crate::conversation::{Conversation, ResponseEncoding};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "check_content_type_header",
            name: "Content-Type Header",
            category: CheckCategory::Transport,
            severity: Status::Error,
            description: "The response content type matches the expected encoding",
            constructor: Constructor::Plain(check_content_type_header),
        },
        CheckDef {
            id: "verify-op-endpoints-use-https",
            name: "Endpoints Use HTTPS",
            category: CheckCategory::Transport,
            severity: Status::Error,
            description: "Every advertised endpoint uses HTTPS",
            constructor: Constructor::Plain(endpoints_use_https),
        },
        CheckDef {
            id: "verify-https-usage",
            name: "Named Endpoints Use HTTPS",
            category: CheckCategory::Transport,
            severity: Status::Error,
            description: "The named endpoints use HTTPS",
            constructor: Constructor::WithParams(build_https_usage),
        },
    ]
}

fn is_https(value: &str) -> bool {
    value.starts_with("https://")
}

/// Run CHECK_CONTENT_TYPE_HEADER
///
/// JSON responses may be plain JSON or a JWT; everything else must be form
/// encoded. An unset encoding means JSON.
pub fn check_content_type_header(conv: &mut Conversation) -> CheckResult {
    let Some(response) = conv.last_http_response() else {
        return Ok(Outcome::pass());
    };
    let Some(content_type) = response.header("content-type") else {
        return Ok(Outcome::raised(Status::Error, "Wrong content type: None"));
    };

    let accepted: &[&str] = match conv.response_encoding.unwrap_or(ResponseEncoding::Json) {
        ResponseEncoding::Json => &["application/json", "application/jwt"],
        ResponseEncoding::Urlencoded => &["application/x-www-form-urlencoded"],
    };
    if accepted.iter().any(|ct| content_type.starts_with(ct)) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Error,
            format!("Wrong content type: {}", content_type),
        ))
    }
}

/// Run VERIFY-OP-ENDPOINTS-USE-HTTPS
pub fn endpoints_use_https(conv: &mut Conversation) -> CheckResult {
    let insecure: Vec<&String> = conv
        .provider_info()
        .iter()
        .filter(|(name, _)| name.ends_with("_endpoint"))
        .filter(|(_, value)| value.as_str().is_some_and(|v| !is_https(v)))
        .map(|(name, _)| name)
        .collect();

    if insecure.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Error,
            format!("These endpoint do not use HTTPS: {}", quoted(&insecure)),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpsUsageParams {
    /// Provider metadata names of the endpoints
    pub endpoints: Vec<String>,
}

fn build_https_usage(params: &Params) -> Result<CheckFn, String> {
    with_params(params, https_usage)
}

/// Run VERIFY-HTTPS-USAGE
pub fn https_usage(conv: &mut Conversation, params: &HttpsUsageParams) -> CheckResult {
    let info = conv.provider_info();
    let insecure: Vec<&String> = params
        .endpoints
        .iter()
        .filter(|name| matches!(info.get(name.as_str()), Some(Value::String(url)) if !is_https(url)))
        .collect();

    if insecure.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Error,
            format!("{} did not use HTTPS", quoted(&insecure)),
        ))
    }
}
