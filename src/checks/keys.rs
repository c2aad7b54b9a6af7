//! Published and configured key checks.
//!
//! `verify-base64url` and `bare-keys` fetch the OP's `jwks_uri` through the
//! conversation's fetcher; they are the only checks that do I/O.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{with_params, CheckFn, CheckResult, Params};
use crate::conversation::{Conversation, EventData, EventKind};
use crate::engine::registry::{CheckDef, Constructor};
use crate::jose::{self, Jwk};
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "check-keys",
            name: "RSA Signing Key",
            category: CheckCategory::Keys,
            severity: Status::Critical,
            description: "The client holds an RSA key usable for signing",
            constructor: Constructor::Plain(check_keys),
        },
        CheckDef {
            id: "verify-base64url",
            name: "Key Members base64url",
            category: CheckCategory::Keys,
            severity: Status::Warning,
            description: "Key members of the published JWK Set are base64url encoded",
            constructor: Constructor::WithParams(build_verify_base64url),
        },
        CheckDef {
            id: "bare-keys",
            name: "Bare Keys",
            category: CheckCategory::Keys,
            severity: Status::Warning,
            description: "Published keys carry their bare key material",
            constructor: Constructor::Plain(bare_keys),
        },
        CheckDef {
            id: "new-signing-keys",
            name: "Signing Key Rollover",
            category: CheckCategory::Keys,
            severity: Status::Warning,
            description: "The OP published a new signing key",
            constructor: Constructor::Plain(new_signing_keys),
        },
        CheckDef {
            id: "new-encryption-keys",
            name: "Encryption Key Rollover",
            category: CheckCategory::Keys,
            severity: Status::Warning,
            description: "The OP published a new encryption key",
            constructor: Constructor::Plain(new_encryption_keys),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Members holding the key material, per key type.
fn bare_members(kty: &str) -> &'static [&'static str] {
    match kty {
        "RSA" => &["e", "n"],
        "EC" => &["x", "y"],
        _ => &[],
    }
}

/// Run CHECK-KEYS
pub fn check_keys(conv: &mut Conversation) -> CheckResult {
    let has_key = conv
        .entity
        .keys
        .iter()
        .any(|k| k.kty == "RSA" && k.usable_for("sig"));
    if has_key {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Critical, "No RSA key for signing provided"))
    }
}

/// Fetch and parse the published key set. `Ok(None)` when the OP publishes
/// no `jwks_uri`; `Err` carries the failure message.
fn load_jwks(conv: &Conversation) -> Result<Option<(String, Value)>, String> {
    let Some(uri) = conv.provider_info().get("jwks_uri").and_then(Value::as_str) else {
        return Ok(None);
    };
    let failed = || format!("Could not load JWK Set from {}", uri);

    let response = conv.fetch(uri).map_err(|e| {
        warn!(uri, error = %e, "fetching key set failed");
        failed()
    })?;
    if response.status != 200 {
        warn!(uri, status = response.status, "fetching key set failed");
        return Err(failed());
    }
    let jwks: Value = serde_json::from_str(&response.body).map_err(|e| {
        warn!(uri, error = %e, "key set is not JSON");
        failed()
    })?;
    debug!(uri, "fetched key set");
    Ok(Some((uri.to_string(), jwks)))
}

fn parse_keys(uri: &str, jwks: &Value) -> Result<Vec<Jwk>, String> {
    serde_json::from_value::<JwkSet>(jwks.clone())
        .map(|set| set.keys)
        .map_err(|e| format!("Could not parse JWK Set from {}: {}", uri, e))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Base64UrlParams {
    /// Status raised on offending keys and fetch failures
    #[serde(default = "default_err_status")]
    pub err_status: Status,
}

fn default_err_status() -> Status {
    Status::Warning
}

impl Default for Base64UrlParams {
    fn default() -> Self {
        Base64UrlParams {
            err_status: default_err_status(),
        }
    }
}

fn build_verify_base64url(params: &Params) -> Result<CheckFn, String> {
    with_params(params, verify_base64url)
}

/// Problems with the encoding of one key's members, or the missing member
/// error when the key is not bare.
fn key_encoding_problems(key: &Jwk) -> Result<Vec<String>, String> {
    let mut problems = Vec::new();
    for member in bare_members(&key.kty) {
        let value = match key.params.get(*member) {
            Some(Value::String(value)) => value,
            _ => return Err(format!("Missing bare key info on {} key", key.kty)),
        };
        if !jose::is_base64url(value) {
            problems.push(match &key.kid {
                Some(kid) => format!("'{}' not base64url encoded in key with kid '{}'", member, kid),
                None => format!("'{}' not base64url encoded in {} key", member, key.kty),
            });
        }
    }
    Ok(problems)
}

/// Run VERIFY-BASE64URL
pub fn verify_base64url(conv: &mut Conversation, params: &Base64UrlParams) -> CheckResult {
    let (uri, jwks) = match load_jwks(conv) {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return Ok(Outcome::pass()),
        Err(message) => return Ok(Outcome::raised(params.err_status, message)),
    };
    let keys = match parse_keys(&uri, &jwks) {
        Ok(keys) => keys,
        Err(message) => return Ok(Outcome::raised(params.err_status, message)),
    };

    let mut problems = Vec::new();
    for key in &keys {
        match key_encoding_problems(key) {
            Ok(found) => problems.extend(found),
            Err(message) => return Ok(Outcome::raised(params.err_status, message)),
        }
    }

    if problems.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(params.err_status, problems.join("\n")))
    }
}

/// Run BARE-KEYS; the fetched key set is added to the log
pub fn bare_keys(conv: &mut Conversation) -> CheckResult {
    let (uri, jwks) = match load_jwks(conv) {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return Ok(Outcome::pass()),
        Err(message) => return Ok(Outcome::raised(Status::Warning, message)),
    };
    conv.events
        .store(EventKind::Jwks, EventData::Json(jwks.clone()), "bare-keys");

    let keys = match parse_keys(&uri, &jwks) {
        Ok(keys) => keys,
        Err(message) => return Ok(Outcome::raised(Status::Warning, message)),
    };
    for key in &keys {
        let bare = bare_members(&key.kty)
            .iter()
            .all(|member| key.params.contains_key(*member));
        if !bare {
            return Ok(Outcome::raised(
                Status::Warning,
                format!("Missing bare key info on {} key", key.kty),
            ));
        }
    }
    Ok(Outcome::pass())
}

/// Whether the newer bundle holds a key for `usage` absent from the older one.
fn rolled_over(conv: &Conversation, usage: &str) -> bool {
    let [old, new, ..] = conv.key_bundles.as_slice() else {
        return false;
    };
    new.iter()
        .filter(|k| k.usable_for(usage))
        .any(|k| !old.iter().filter(|o| o.usable_for(usage)).any(|o| o.same_material(k)))
}

pub fn new_signing_keys(conv: &mut Conversation) -> CheckResult {
    if rolled_over(conv, "sig") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Warning,
            "Did not detect any change in signing keys",
        ))
    }
}

pub fn new_encryption_keys(conv: &mut Conversation) -> CheckResult {
    if rolled_over(conv, "enc") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Warning,
            "Did not detect any change in encryption keys",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, HttpResponse, KeySetFetcher};
    use serde_json::json;

    struct StaticFetcher(Result<HttpResponse, String>);

    impl KeySetFetcher for StaticFetcher {
        fn fetch(&self, _url: &str) -> Result<HttpResponse, FetchError> {
            self.0.clone().map_err(|message| FetchError::RequestFailed { message })
        }
    }

    fn serving(status: u16, body: Value) -> Conversation {
        let response = HttpResponse {
            status,
            body: body.to_string(),
            ..HttpResponse::default()
        };
        let mut conv = Conversation::new().with_fetcher(StaticFetcher(Ok(response)));
        conv.entity
            .provider_info
            .insert("jwks_uri".to_string(), json!("https://op/jwks"));
        conv
    }

    fn jwk(value: Value) -> Jwk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_check_keys() {
        let mut conv = Conversation::new();
        assert_eq!(check_keys(&mut conv).unwrap().status, Status::Critical);
        conv.entity.keys.push(jwk(json!({"kty": "RSA", "use": "enc", "n": "x", "e": "AQAB"})));
        assert_eq!(check_keys(&mut conv).unwrap().status, Status::Critical);
        conv.entity.keys.push(jwk(json!({"kty": "RSA", "n": "x", "e": "AQAB"})));
        assert!(check_keys(&mut conv).unwrap().is_pass());
    }

    #[test]
    fn test_base64url_names_kid() {
        let mut conv = serving(
            200,
            json!({"keys": [
                {"kty": "RSA", "kid": "k1", "n": "a+b/c", "e": "AQAB"},
                {"kty": "EC", "crv": "P-256", "x": "abcd", "y": "efgh"}
            ]}),
        );
        let outcome = verify_base64url(&mut conv, &Base64UrlParams::default()).unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert_eq!(
            outcome.message.as_deref(),
            Some("'n' not base64url encoded in key with kid 'k1'")
        );
    }

    #[test]
    fn test_base64url_err_status_param() {
        let params: Base64UrlParams =
            crate::checks::parse_params(&json!({"err_status": "error"}).as_object().cloned().unwrap()).unwrap();
        assert_eq!(params.err_status, Status::Error);

        let mut conv = serving(200, json!({"keys": [{"kty": "EC", "x": "a=b", "y": "abcd"}]}));
        let outcome = verify_base64url(&mut conv, &params).unwrap();
        assert_eq!(outcome.status, Status::Error);
        assert_eq!(outcome.message.as_deref(), Some("'x' not base64url encoded in EC key"));
    }

    #[test]
    fn test_base64url_fetch_failure() {
        let mut conv = serving(404, json!({}));
        let outcome = verify_base64url(&mut conv, &Base64UrlParams::default()).unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("Could not load JWK Set from https://op/jwks")
        );

        let mut conv = Conversation::new().with_fetcher(StaticFetcher(Err("refused".to_string())));
        conv.entity
            .provider_info
            .insert("jwks_uri".to_string(), json!("https://op/jwks"));
        assert_eq!(
            verify_base64url(&mut conv, &Base64UrlParams::default()).unwrap().status,
            Status::Warning
        );
    }

    #[test]
    fn test_base64url_missing_member() {
        let mut conv = serving(200, json!({"keys": [{"kty": "RSA", "e": "AQAB"}]}));
        let outcome = verify_base64url(&mut conv, &Base64UrlParams::default()).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("Missing bare key info on RSA key"));
    }

    #[test]
    fn test_bare_keys_stores_jwks() {
        let mut conv = serving(200, json!({"keys": [{"kty": "RSA", "n": "abc", "e": "AQAB"}]}));
        assert!(bare_keys(&mut conv).unwrap().is_pass());
        assert!(conv.events.last_item(EventKind::Jwks).is_some());
    }

    #[test]
    fn test_key_rollover() {
        let mut conv = Conversation::new();
        let old = jwk(json!({"kty": "RSA", "use": "sig", "kid": "a", "n": "n1", "e": "AQAB"}));
        let renamed = jwk(json!({"kty": "RSA", "use": "sig", "kid": "b", "n": "n1", "e": "AQAB"}));
        conv.key_bundles = vec![vec![old.clone()], vec![renamed]];
        assert_eq!(new_signing_keys(&mut conv).unwrap().status, Status::Warning);

        let fresh = jwk(json!({"kty": "RSA", "use": "sig", "n": "n2", "e": "AQAB"}));
        conv.key_bundles = vec![vec![old], vec![fresh]];
        assert!(new_signing_keys(&mut conv).unwrap().is_pass());
        assert_eq!(new_encryption_keys(&mut conv).unwrap().status, Status::Warning);
    }
}
