//! Provider metadata and entity configuration checks.

use super::{provider_list, quoted, CheckResult};
use crate::conversation::Conversation;
use crate::data::algorithms::{self, MTI};
use crate::engine::registry::{CheckDef, Constructor};
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "providerinfo-has-jwks_uri",
            name: "Provider Publishes jwks_uri",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "The discovery document holds jwks_uri",
            constructor: Constructor::Plain(has_jwks_uri),
        },
        CheckDef {
            id: "providerinfo-has-claims_supported",
            name: "Provider Publishes claims_supported",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "The discovery document holds claims_supported",
            constructor: Constructor::Plain(has_claims_supported),
        },
        CheckDef {
            id: "verify-op-has-registration-endpoint",
            name: "Registration Endpoint",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "The discovery document holds registration_endpoint",
            constructor: Constructor::Plain(has_registration_endpoint),
        },
        CheckDef {
            id: "verify-mti-enc-sig-algorithms",
            name: "Mandatory Algorithms Advertised",
            category: CheckCategory::Provider,
            severity: Status::Information,
            description: "Every mandatory-to-implement algorithm is advertised",
            constructor: Constructor::Plain(verify_mti_algorithms),
        },
        CheckDef {
            id: "check-enc-sig-algorithms",
            name: "Registered Algorithms Only",
            category: CheckCategory::Provider,
            severity: Status::Information,
            description: "Advertised JWS and JWE algorithms are IANA registered",
            constructor: Constructor::Plain(check_registered_algorithms),
        },
        CheckDef {
            id: "support-discovery",
            name: "Discovery Configured",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "An endpoint for provider discovery is configured",
            constructor: Constructor::Plain(support_discovery),
        },
        CheckDef {
            id: "sub-claim-configured",
            name: "Subject Configured",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "The test configuration names the expected sub",
            constructor: Constructor::Plain(sub_claim_configured),
        },
        CheckDef {
            id: "check-provider-info",
            name: "Provider Information",
            category: CheckCategory::Provider,
            severity: Status::Error,
            description: "Provider information is sound",
            constructor: Constructor::Plain(check_provider_info),
        },
    ]
}

fn require(conv: &Conversation, element: &str, message: &str) -> CheckResult {
    if conv.provider_info().contains_key(element) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, message))
    }
}

pub fn has_jwks_uri(conv: &mut Conversation) -> CheckResult {
    require(conv, "jwks_uri", "No 'jwks_uri' location provided")
}

pub fn has_claims_supported(conv: &mut Conversation) -> CheckResult {
    require(
        conv,
        "claims_supported",
        "No 'claims_supported' discovery metadata value provided",
    )
}

pub fn has_registration_endpoint(conv: &mut Conversation) -> CheckResult {
    require(conv, "registration_endpoint", "No registration endpoint")
}

/// Run VERIFY-MTI-ENC-SIG-ALGORITHMS
pub fn verify_mti_algorithms(conv: &mut Conversation) -> CheckResult {
    let mut missing = Vec::new();
    for (element, algs) in MTI {
        let advertised = provider_list(conv, element)?.unwrap_or_default();
        for alg in *algs {
            let name = format!("{}:{}", element, alg);
            if !advertised.iter().any(|a| a == *alg) && !missing.contains(&name) {
                missing.push(name);
            }
        }
    }

    if missing.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Information,
            format!("The following MTI algorithms were missing :{}", quoted(&missing)),
        ))
    }
}

/// Advertised values of `<kind>_<suffix>` for every kind, minus the
/// registered ones. Order of first appearance, no duplicates.
fn unregistered(
    conv: &Conversation,
    kinds: &[&str],
    suffix: &str,
    registered: fn(&str) -> bool,
) -> Result<Vec<String>, crate::CheckError> {
    let mut unknown: Vec<String> = Vec::new();
    for kind in kinds {
        let element = format!("{}_{}", kind, suffix);
        for alg in provider_list(conv, &element)?.unwrap_or_default() {
            if !registered(&alg) && !unknown.contains(&alg) {
                unknown.push(alg);
            }
        }
    }
    Ok(unknown)
}

/// Run CHECK-ENC-SIG-ALGORITHMS
pub fn check_registered_algorithms(conv: &mut Conversation) -> CheckResult {
    let jws = unregistered(
        conv,
        &["id_token", "userinfo", "request_object", "token_endpoint_auth"],
        "signing_alg_values_supported",
        algorithms::is_registered_jws,
    )?;
    let jwe_alg = unregistered(
        conv,
        &["id_token", "userinfo", "request_object"],
        "encryption_alg_values_supported",
        algorithms::is_registered_jwe_alg,
    )?;
    let jwe_enc = unregistered(
        conv,
        &["id_token", "userinfo", "request_object"],
        "encryption_enc_values_supported",
        algorithms::is_registered_jwe_enc,
    )?;

    let mut parts = Vec::new();
    if !jws.is_empty() {
        parts.push(format!("JWS algorithms:{}", quoted(&jws)));
    }
    if !jwe_alg.is_empty() {
        parts.push(format!("JWE alg algorithms:{}", quoted(&jwe_alg)));
    }
    if !jwe_enc.is_empty() {
        parts.push(format!("JWE enc algorithms:{}", quoted(&jwe_enc)));
    }

    if parts.is_empty() {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Information,
            format!("Used algorithms that are not registered: {}", parts.join(", ")),
        ))
    }
}

pub fn support_discovery(conv: &mut Conversation) -> CheckResult {
    if conv.entity_config.contains_key("srv_discovery_url") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "OP does not support discovery"))
    }
}

pub fn sub_claim_configured(conv: &mut Conversation) -> CheckResult {
    if conv.entity_config.contains_key("sub") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "sub claim not configured"))
    }
}

// Placeholder hook; schema validation happens when the document is parsed.
pub fn check_provider_info(_conv: &mut Conversation) -> CheckResult {
    Ok(Outcome::pass())
}
