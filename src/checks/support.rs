//! Capability negotiation checks.
//!
//! Each check compares what the current request used against what the
//! provider advertises. Metadata the OP does not publish means "no
//! restriction" unless OpenID Connect Discovery defines a default; a request
//! that does not use the parameter passes.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use super::{provider_list, requested_claims, with_params, CheckFn, CheckResult, Params};
use crate::conversation::message::{strings, tokens};
use crate::conversation::{Conversation, Message, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, CheckError, Outcome, Status};

/// Get all capability negotiation checks
pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "check-response-type",
            name: "Response Type Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Requested response_type is one of response_types_supported",
            constructor: Constructor::Plain(check_response_type),
        },
        CheckDef {
            id: "verify-id_token_signing-algorithm-is-supported",
            name: "ID Token Signing Algorithms Advertised",
            category: CheckCategory::Support,
            severity: Status::Error,
            description: "Given algorithms appear in id_token_signing_alg_values_supported",
            constructor: Constructor::WithParams(build_signing_algorithms),
        },
        CheckDef {
            id: "check-acr-support",
            name: "ACR Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Some requested acr value is supported",
            constructor: Constructor::Plain(check_acr_support),
        },
        CheckDef {
            id: "check-scope-support",
            name: "Scope Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Requested scopes are among scopes_supported",
            constructor: Constructor::Plain(check_scope_support),
        },
        CheckDef {
            id: "check-userid-support",
            name: "Subject Type Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Requested subject_type is among subject_types_supported",
            constructor: Constructor::Plain(check_userid_support),
        },
        CheckDef {
            id: "check-signed-userinfo-support",
            name: "Signed UserInfo Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "userinfo_signed_response_alg is supported",
            constructor: Constructor::Plain(check_signed_userinfo_support),
        },
        CheckDef {
            id: "check-signed-idtoken-support",
            name: "Signed ID Token Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "id_token_signed_response_alg is supported",
            constructor: Constructor::Plain(check_signed_idtoken_support),
        },
        CheckDef {
            id: "check-signed-request_object-support",
            name: "Signed Request Object Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "request_object_signed_alg is supported",
            constructor: Constructor::Plain(check_signed_request_object_support),
        },
        CheckDef {
            id: "check-signed-userinfo-alg-support",
            name: "UserInfo Encryption alg Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "userinfo_encrypted_response_alg is supported",
            constructor: Constructor::Plain(check_userinfo_encryption_alg),
        },
        CheckDef {
            id: "check-encrypt-userinfo-enc-support",
            name: "UserInfo Encryption enc Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "userinfo_encrypted_response_enc is supported",
            constructor: Constructor::Plain(check_userinfo_encryption_enc),
        },
        CheckDef {
            id: "check-encrypt-idtoken-alg-support",
            name: "ID Token Encryption alg Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "id_token_encrypted_response_alg is supported",
            constructor: Constructor::Plain(check_idtoken_encryption_alg),
        },
        CheckDef {
            id: "check-encrypt-idtoken-enc-support",
            name: "ID Token Encryption enc Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "id_token_encrypted_response_enc is supported",
            constructor: Constructor::Plain(check_idtoken_encryption_enc),
        },
        CheckDef {
            id: "check-encrypt-request_object-alg-support",
            name: "Request Object Encryption alg Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "request_object_encryption_alg is supported",
            constructor: Constructor::Plain(check_request_object_encryption_alg),
        },
        CheckDef {
            id: "check-encrypt-request_object-enc-support",
            name: "Request Object Encryption enc Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "request_object_encryption_enc is supported",
            constructor: Constructor::Plain(check_request_object_encryption_enc),
        },
        CheckDef {
            id: "check-claims-support",
            name: "Claims Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Requested UserInfo claims are among claims_supported",
            constructor: Constructor::Plain(check_claims_support),
        },
        CheckDef {
            id: "check-id_token_signed_response_alg-support",
            name: "id_token_signed_response_alg Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "id_token_signed_response_alg is among id_token_signed_response_alg_supported",
            constructor: Constructor::Plain(check_id_token_signed_response_alg),
        },
        CheckDef {
            id: "check-request-parameter-supported-support",
            name: "Request Parameter Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "request_parameter_supported is not false",
            constructor: Constructor::Plain(check_request_parameter_supported),
        },
        CheckDef {
            id: "check-request_uri-parameter-supported-support",
            name: "Request URI Parameter Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "request_uri_parameter_supported is not false",
            constructor: Constructor::Plain(check_request_uri_parameter_supported),
        },
        CheckDef {
            id: "check-token-endpoint-auth-method",
            name: "Token Endpoint Authentication Method",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "The client authentication method used is supported",
            constructor: Constructor::Plain(check_token_endpoint_auth_method),
        },
        CheckDef {
            id: "check-response-mode",
            name: "Response Mode Support",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "Requested response_mode is among response_modes_supported",
            constructor: Constructor::Plain(check_response_mode),
        },
        CheckDef {
            id: "check-endpoint",
            name: "Endpoint Advertised",
            category: CheckCategory::Support,
            severity: Status::Critical,
            description: "The OP advertises the endpoint the current request goes to",
            constructor: Constructor::Plain(check_endpoint),
        },
    ]
}

/// Requested value of `parameter` in the current request, as tokens.
fn requested(conv: &Conversation, parameter: &str) -> Result<Option<Vec<String>>, CheckError> {
    match conv.request_args.get(parameter) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => tokens(value, parameter).map(Some),
    }
}

/// Pass unless the request used `parameter` with a value outside the
/// advertised `element`.
fn within(conv: &Conversation, parameter: &str, element: &str, message: &str) -> CheckResult {
    let Some(supported) = provider_list(conv, element)? else {
        return Ok(Outcome::pass());
    };
    let Some(used) = requested(conv, parameter)? else {
        return Ok(Outcome::pass());
    };

    let missing: Vec<&String> = used.iter().filter(|v| !supported.contains(v)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, message)
            .with_detail("requested", used.clone())
            .with_detail("supported", supported))
    }
}

/// Pass unless the boolean metadata `element` is present and not true.
fn not_false(conv: &Conversation, element: &str, message: &str) -> CheckResult {
    match conv.provider_info().get(element) {
        None => Ok(Outcome::pass()),
        Some(Value::Bool(true)) => Ok(Outcome::pass()),
        Some(Value::String(s)) if s == "true" => Ok(Outcome::pass()),
        Some(_) => Ok(Outcome::raised(Status::Critical, message)),
    }
}

/// Run CHECK-RESPONSE-TYPE: exact match against one advertised set
pub fn check_response_type(conv: &mut Conversation) -> CheckResult {
    let Some(used) = requested(conv, "response_type")? else {
        return Ok(Outcome::pass());
    };
    let used: BTreeSet<String> = used.into_iter().collect();

    let supported: Vec<BTreeSet<String>> = match provider_list(conv, "response_types_supported")? {
        Some(types) => types
            .iter()
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .collect(),
        None => vec![BTreeSet::from(["code".to_string()])],
    };

    if supported.contains(&used) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, "Response type not supported")
            .with_detail("requested", used.into_iter().collect::<Vec<_>>().join(" ")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningAlgorithmsParams {
    pub algs: Vec<String>,
}

fn build_signing_algorithms(params: &Params) -> Result<CheckFn, String> {
    with_params(params, verify_signing_algorithms)
}

/// Run VERIFY-ID_TOKEN_SIGNING-ALGORITHM-IS-SUPPORTED
pub fn verify_signing_algorithms(conv: &mut Conversation, params: &SigningAlgorithmsParams) -> CheckResult {
    let supported = provider_list(conv, "id_token_signing_alg_values_supported")?.unwrap_or_default();
    match params.algs.iter().find(|alg| !supported.contains(alg)) {
        Some(alg) => Ok(Outcome::raised(
            Status::Error,
            format!(
                "required algorithm {} is not in the list of supported algorithms",
                alg
            ),
        )),
        None => Ok(Outcome::pass()),
    }
}

/// Run CHECK-ACR-SUPPORT: at least one requested acr value is supported
pub fn check_acr_support(conv: &mut Conversation) -> CheckResult {
    let supported = match provider_list(conv, "acr_values_supported")? {
        Some(s) => s,
        None => match provider_list(conv, "acrs_supported")? {
            Some(s) => s,
            None => return Ok(Outcome::pass()),
        },
    };

    // {"idtoken_claims": {"claims": {"acr": {"values": ["2"]}}}}
    let values = conv
        .request_args
        .get("idtoken_claims")
        .and_then(|c| c.get("claims"))
        .and_then(|c| c.get("acr"))
        .and_then(|acr| acr.get("values"));
    let Some(values) = values else {
        return Ok(Outcome::pass());
    };

    let acrs = strings(values, "idtoken_claims.claims.acr.values")?;
    if acrs.iter().any(|acr| supported.contains(acr)) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, "acr value not supported"))
    }
}

pub fn check_scope_support(conv: &mut Conversation) -> CheckResult {
    within(conv, "scope", "scopes_supported", "Scope not supported")
}

pub fn check_userid_support(conv: &mut Conversation) -> CheckResult {
    within(conv, "subject_type", "subject_types_supported", "Subject type not supported")
}

pub fn check_signed_userinfo_support(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "userinfo_signed_response_alg",
        "userinfo_signing_alg_values_supported",
        "Signed UserInfo not supported",
    )
}

pub fn check_signed_idtoken_support(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "id_token_signed_response_alg",
        "id_token_signing_alg_values_supported",
        "Signed ID Token algorithm not supported",
    )
}

pub fn check_signed_request_object_support(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "request_object_signed_alg",
        "request_object_signing_alg_values_supported",
        "Signed request object algorithm not supported",
    )
}

pub fn check_userinfo_encryption_alg(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "userinfo_encrypted_response_alg",
        "userinfo_encryption_alg_values_supported",
        "UserInfo encryption alg algorithm not supported",
    )
}

pub fn check_userinfo_encryption_enc(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "userinfo_encrypted_response_enc",
        "userinfo_encryption_enc_values_supported",
        "UserInfo encryption enc algorithm not supported",
    )
}

pub fn check_idtoken_encryption_alg(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "id_token_encrypted_response_alg",
        "id_token_encryption_alg_values_supported",
        "ID Token encryption alg algorithm not supported",
    )
}

pub fn check_idtoken_encryption_enc(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "id_token_encrypted_response_enc",
        "id_token_encryption_enc_values_supported",
        "ID Token encryption enc method not supported",
    )
}

pub fn check_request_object_encryption_alg(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "request_object_encryption_alg",
        "request_object_encryption_alg_values_supported",
        "Request_object encryption alg algorithm not supported",
    )
}

pub fn check_request_object_encryption_enc(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "request_object_encryption_enc",
        "request_object_encryption_enc_values_supported",
        "Request_object encryption enc algorithm not supported",
    )
}

/// Run CHECK-CLAIMS-SUPPORT: claims requested for UserInfo are advertised
pub fn check_claims_support(conv: &mut Conversation) -> CheckResult {
    let Some(supported) = provider_list(conv, "claims_supported")? else {
        return Ok(Outcome::pass());
    };
    let request = Message::with_claims(MessageType::AuthorizationRequest, conv.request_args.clone());
    let Some(userinfo) = requested_claims(&request, "userinfo")? else {
        return Ok(Outcome::pass());
    };

    let missing: Vec<&String> = userinfo.keys().filter(|c| !supported.contains(c)).collect();
    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, "Claims not supported")
            .with_detail("unsupported", missing.into_iter().cloned().collect::<Vec<_>>()))
    }
}

pub fn check_id_token_signed_response_alg(conv: &mut Conversation) -> CheckResult {
    within(
        conv,
        "id_token_signed_response_alg",
        "id_token_signed_response_alg_supported",
        "id_token_signed_response_alg not supported",
    )
}

pub fn check_request_parameter_supported(conv: &mut Conversation) -> CheckResult {
    not_false(conv, "request_parameter_supported", "request parameter not supported")
}

pub fn check_request_uri_parameter_supported(conv: &mut Conversation) -> CheckResult {
    not_false(
        conv,
        "request_uri_parameter_supported",
        "request_uri parameter not supported",
    )
}

/// Run CHECK-TOKEN-ENDPOINT-AUTH-METHOD
///
/// The method comes from the registration request when registering,
/// otherwise from the flow step arguments.
pub fn check_token_endpoint_auth_method(conv: &mut Conversation) -> CheckResult {
    let used = if conv.request.as_deref() == Some("RegistrationRequest") {
        conv.request_args.get("token_endpoint_auth_method")
    } else {
        conv.args.get("authn_method")
    };
    let method = match used {
        None | Some(Value::Null) => return Ok(Outcome::pass()),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(CheckError::shape("token_endpoint_auth_method", "a string")),
    };

    let supported = provider_list(conv, "token_endpoint_auth_methods_supported")?
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| vec!["client_secret_basic".to_string()]);

    if supported.contains(&method) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Critical,
            format!("Client authentication method not supported: {}", method),
        ))
    }
}

/// Run CHECK-RESPONSE-MODE
pub fn check_response_mode(conv: &mut Conversation) -> CheckResult {
    let mode = match conv.request_args.get("response_mode") {
        None | Some(Value::Null) => return Ok(Outcome::pass()),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(CheckError::shape("response_mode", "a string")),
    };
    let supported = provider_list(conv, "response_modes_supported")?
        .unwrap_or_else(|| vec!["query".to_string(), "fragment".to_string()]);

    if supported.contains(&mode) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, "Response mode not supported"))
    }
}

/// Run CHECK-ENDPOINT: the current request has somewhere to go
pub fn check_endpoint(conv: &mut Conversation) -> CheckResult {
    let Some(request) = conv.request.as_deref() else {
        return Ok(Outcome::pass());
    };
    let Some(endpoint) = conv.entity.request2endpoint.get(request) else {
        return Ok(Outcome::pass());
    };

    if conv.provider_info().contains_key(endpoint) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Critical,
            format!("No '{}' endpoint provided", endpoint),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv(provider_info: Value, request_args: Value) -> Conversation {
        let mut conv = Conversation::new();
        conv.entity.provider_info = provider_info.as_object().cloned().unwrap_or_default();
        conv.request_args = request_args.as_object().cloned().unwrap_or_default();
        conv
    }

    #[test]
    fn test_response_type_mismatch() {
        let mut c = conv(
            json!({"response_types_supported": ["code"]}),
            json!({"response_type": ["code", "token"]}),
        );
        let outcome = check_response_type(&mut c).unwrap();
        assert_eq!(outcome.status, Status::Critical);
    }

    #[test]
    fn test_response_type_set_equality() {
        let mut c = conv(
            json!({"response_types_supported": ["code", "id_token token", "code id_token"]}),
            json!({"response_type": "token id_token"}),
        );
        assert!(check_response_type(&mut c).unwrap().is_pass());
    }

    #[test]
    fn test_response_type_default_is_code() {
        let mut c = conv(json!({}), json!({"response_type": ["code"]}));
        assert!(check_response_type(&mut c).unwrap().is_pass());
        let mut c = conv(json!({}), json!({"response_type": ["id_token"]}));
        assert_eq!(check_response_type(&mut c).unwrap().status, Status::Critical);
    }

    #[test]
    fn test_scope_support() {
        let mut c = conv(
            json!({"scopes_supported": ["openid", "email"]}),
            json!({"scope": "openid email"}),
        );
        assert!(check_scope_support(&mut c).unwrap().is_pass());
        let mut c = conv(
            json!({"scopes_supported": ["openid"]}),
            json!({"scope": ["openid", "phone"]}),
        );
        assert_eq!(check_scope_support(&mut c).unwrap().status, Status::Critical);
    }

    #[test]
    fn test_missing_metadata_passes() {
        let mut c = conv(json!({}), json!({"userinfo_signed_response_alg": "RS256"}));
        assert!(check_signed_userinfo_support(&mut c).unwrap().is_pass());
    }

    #[test]
    fn test_acr_support() {
        let args = json!({"idtoken_claims": {"claims": {"acr": {"values": ["1", "2"]}}}});
        let mut c = conv(json!({"acr_values_supported": ["2"]}), args.clone());
        assert!(check_acr_support(&mut c).unwrap().is_pass());
        let mut c = conv(json!({"acrs_supported": ["3"]}), args);
        assert_eq!(check_acr_support(&mut c).unwrap().status, Status::Critical);
    }

    #[test]
    fn test_claims_support() {
        let mut c = conv(
            json!({"claims_supported": ["sub", "email"]}),
            json!({"claims": {"userinfo": {"email": null, "phone_number": null}}}),
        );
        let outcome = check_claims_support(&mut c).unwrap();
        assert_eq!(outcome.status, Status::Critical);
        assert_eq!(outcome.detail["unsupported"], json!(["phone_number"]));
    }

    #[test]
    fn test_request_parameter_supported() {
        let mut c = conv(json!({"request_parameter_supported": "true"}), json!({}));
        assert!(check_request_parameter_supported(&mut c).unwrap().is_pass());
        let mut c = conv(json!({"request_parameter_supported": false}), json!({}));
        assert_eq!(check_request_parameter_supported(&mut c).unwrap().status, Status::Critical);
    }

    #[test]
    fn test_token_endpoint_auth_method_default() {
        let mut c = conv(json!({}), json!({}));
        c.args.insert("authn_method".into(), json!("client_secret_post"));
        assert_eq!(check_token_endpoint_auth_method(&mut c).unwrap().status, Status::Critical);

        c.args.insert("authn_method".into(), json!("client_secret_basic"));
        assert!(check_token_endpoint_auth_method(&mut c).unwrap().is_pass());
    }

    #[test]
    fn test_token_endpoint_auth_method_registration() {
        let mut c = conv(
            json!({"token_endpoint_auth_methods_supported": ["private_key_jwt"]}),
            json!({"token_endpoint_auth_method": "private_key_jwt"}),
        );
        c.request = Some("RegistrationRequest".to_string());
        assert!(check_token_endpoint_auth_method(&mut c).unwrap().is_pass());
    }

    #[test]
    fn test_response_mode_default() {
        let mut c = conv(json!({}), json!({"response_mode": "form_post"}));
        assert_eq!(check_response_mode(&mut c).unwrap().status, Status::Critical);
        let mut c = conv(json!({}), json!({"response_mode": "fragment"}));
        assert!(check_response_mode(&mut c).unwrap().is_pass());
    }

    #[test]
    fn test_endpoint() {
        let mut c = conv(json!({"token_endpoint": "https://op/token"}), json!({}));
        c.request = Some("AccessTokenRequest".to_string());
        assert!(check_endpoint(&mut c).unwrap().is_pass());
        c.request = Some("UserInfoRequest".to_string());
        let outcome = check_endpoint(&mut c).unwrap();
        assert_eq!(outcome.status, Status::Critical);
        assert_eq!(outcome.message.as_deref(), Some("No 'userinfo_endpoint' endpoint provided"));
    }

    #[test]
    fn test_signing_algorithms_params() {
        let params = json!({"algs": ["RS256", "ES256"]}).as_object().cloned().unwrap();
        let check = build_signing_algorithms(&params).ok().unwrap();
        let mut c = conv(json!({"id_token_signing_alg_values_supported": ["RS256"]}), json!({}));
        let outcome = check(&mut c).unwrap();
        assert_eq!(outcome.status, Status::Error);
        assert!(outcome.message.unwrap().contains("ES256"));

        let bad = json!({"alg": "RS256"}).as_object().cloned().unwrap();
        assert!(build_signing_algorithms(&bad).is_err());
    }
}
