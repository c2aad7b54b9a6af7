//! JOSE header checks on ID Tokens and UserInfo responses.
//!
//! Only headers are inspected. Signatures are not verified and encrypted
//! payloads are not decrypted; a JWE token contributes its header alone.

use serde::Deserialize;
use serde_json::Value;

use super::{last_id_token, with_params, CheckFn, CheckResult, Params, NO_ID_TOKEN};
use crate::conversation::{Conversation, EventData, EventKind, Message, MessageType};
use crate::engine::registry::{CheckDef, Constructor};
use crate::jose;
use crate::{CheckCategory, Outcome, Status};

pub fn definitions() -> Vec<CheckDef> {
    vec![
        CheckDef {
            id: "asym-signed-userinfo",
            name: "UserInfo Signed (RSA)",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "UserInfo is signed with an RSA algorithm",
            constructor: Constructor::Plain(asym_signed_userinfo),
        },
        CheckDef {
            id: "sym-signed-idtoken",
            name: "ID Token Signed (HMAC)",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token is signed with an HMAC algorithm",
            constructor: Constructor::Plain(sym_signed_idtoken),
        },
        CheckDef {
            id: "es-signed-idtoken",
            name: "ID Token Signed (ECDSA)",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token is signed with an ECDSA algorithm",
            constructor: Constructor::Plain(es_signed_idtoken),
        },
        CheckDef {
            id: "encrypted-userinfo",
            name: "UserInfo Encrypted",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "UserInfo is encrypted with an RSA key transport",
            constructor: Constructor::Plain(encrypted_userinfo),
        },
        CheckDef {
            id: "encrypted-idtoken",
            name: "ID Token Encrypted",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token is encrypted with an RSA key transport",
            constructor: Constructor::Plain(encrypted_idtoken),
        },
        CheckDef {
            id: "signed-encrypted-idtoken",
            name: "ID Token Signed And Encrypted",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token uses the expected signing and encryption algorithms",
            constructor: Constructor::WithParams(build_signed_encrypted),
        },
        CheckDef {
            id: "verify-signed-idtoken-has-kid",
            name: "Signed ID Token Has kid",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "An RSA-signed ID Token names its key",
            constructor: Constructor::Plain(signed_idtoken_has_kid),
        },
        CheckDef {
            id: "verify-idtoken-is-signed",
            name: "ID Token Is Signed",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token is signed, optionally with a given algorithm",
            constructor: Constructor::WithParams(build_idtoken_is_signed),
        },
        CheckDef {
            id: "unsigned-idtoken",
            name: "ID Token Unsigned",
            category: CheckCategory::Signing,
            severity: Status::Error,
            description: "The ID Token uses alg none",
            constructor: Constructor::Plain(unsigned_idtoken),
        },
        CheckDef {
            id: "is-idtoken-signed",
            name: "ID Token Signature Report",
            category: CheckCategory::Signing,
            severity: Status::Information,
            description: "Reports the signing algorithm of the ID Token",
            constructor: Constructor::Plain(is_idtoken_signed),
        },
        CheckDef {
            id: "compare-idtoken-received-with-check_id-response",
            name: "ID Token Matches check_id",
            category: CheckCategory::Signing,
            severity: Status::Critical,
            description: "The decoded ID Token equals the check_id response",
            constructor: Constructor::Plain(compare_idtoken_with_check_id),
        },
    ]
}

fn alg_starts_with(alg: Option<&str>, prefix: &str) -> bool {
    alg.is_some_and(|a| a.starts_with(prefix))
}

/// The ID Token to look at, or the outcome to return when there is none.
fn id_token_or_escalate(conv: &Conversation) -> Result<Result<Message, Outcome>, crate::CheckError> {
    Ok(last_id_token(conv)?.ok_or_else(|| Outcome::raised(Status::Error, NO_ID_TOKEN)))
}

fn first_userinfo(conv: &Conversation) -> Option<&Message> {
    conv.protocol_responses(MessageType::UserInfo).first().copied()
}

/// Run ASYM-SIGNED-USERINFO
pub fn asym_signed_userinfo(conv: &mut Conversation) -> CheckResult {
    let Some(userinfo) = first_userinfo(conv) else {
        return Ok(Outcome::pass());
    };
    if alg_starts_with(userinfo.jws_alg(), "RS") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "UserInfo was not signed"))
    }
}

fn idtoken_signed_with(conv: &Conversation, prefix: &str) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    if alg_starts_with(idt.jws_alg(), prefix) {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Incorrect signature type"))
    }
}

pub fn sym_signed_idtoken(conv: &mut Conversation) -> CheckResult {
    idtoken_signed_with(conv, "HS")
}

pub fn es_signed_idtoken(conv: &mut Conversation) -> CheckResult {
    idtoken_signed_with(conv, "ES")
}

/// Run ENCRYPTED-USERINFO
pub fn encrypted_userinfo(conv: &mut Conversation) -> CheckResult {
    let Some(userinfo) = first_userinfo(conv) else {
        return Ok(Outcome::pass());
    };
    if alg_starts_with(userinfo.jwe_alg(), "RSA") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "UserInfo was not encrypted"))
    }
}

/// Run ENCRYPTED-IDTOKEN
pub fn encrypted_idtoken(conv: &mut Conversation) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    if alg_starts_with(idt.jwe_alg(), "RSA") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "ID Token was not encrypted"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedEncryptedParams {
    pub enc_alg: String,
    pub enc_enc: String,
    pub sign_alg: String,
}

fn build_signed_encrypted(params: &Params) -> Result<CheckFn, String> {
    with_params(params, signed_encrypted_idtoken)
}

/// Run SIGNED-ENCRYPTED-IDTOKEN
pub fn signed_encrypted_idtoken(conv: &mut Conversation, params: &SignedEncryptedParams) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    let ok = idt.jwe_alg() == Some(params.enc_alg.as_str())
        && idt.jwe_enc() == Some(params.enc_enc.as_str())
        && idt.jws_alg() == Some(params.sign_alg.as_str());
    if ok {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "ID Token was not signed and encrypted"))
    }
}

/// Run VERIFY-SIGNED-IDTOKEN-HAS-KID
pub fn signed_idtoken_has_kid(conv: &mut Conversation) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    let Some(header) = &idt.jws_header else {
        return Ok(Outcome::pass());
    };
    // Applies to RSA signatures on tokens that are not also encrypted
    if header.contains_key("enc") || !alg_starts_with(idt.jws_alg(), "RS") {
        return Ok(Outcome::pass());
    }
    if header.contains_key("kid") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Error,
            format!("Signed ID Token has no kid: header={}", Value::Object(header.clone())),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedParams {
    /// Expected signing algorithm; any algorithm but `none` when unset
    #[serde(default)]
    pub alg: Option<String>,
}

fn build_idtoken_is_signed(params: &Params) -> Result<CheckFn, String> {
    with_params(params, idtoken_is_signed)
}

/// Run VERIFY-IDTOKEN-IS-SIGNED
pub fn idtoken_is_signed(conv: &mut Conversation, params: &SignedParams) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    let alg = idt.jws_alg();
    let ok = match (&params.alg, alg) {
        (_, None) | (_, Some("none")) => false,
        (Some(expected), Some(alg)) => expected == alg,
        (None, Some(_)) => true,
    };
    match alg {
        Some(alg) if ok => Ok(Outcome::note(format!("Signature algorithm='{}'", alg))),
        _ => Ok(Outcome::raised(
            Status::Error,
            "ID Token unsigned or signed with the wrong algorithm",
        )),
    }
}

/// Run UNSIGNED-IDTOKEN
pub fn unsigned_idtoken(conv: &mut Conversation) -> CheckResult {
    let idt = match id_token_or_escalate(conv)? {
        Ok(idt) => idt,
        Err(outcome) => return Ok(outcome),
    };
    if idt.jws_alg() == Some("none") {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(Status::Error, "Unsigned ID Token"))
    }
}

/// Run IS-IDTOKEN-SIGNED
pub fn is_idtoken_signed(conv: &mut Conversation) -> CheckResult {
    let idt = match last_id_token(conv)? {
        Some(idt) => idt,
        None => return Ok(Outcome::raised(Status::Information, NO_ID_TOKEN)),
    };
    match idt.jws_alg() {
        Some(alg) if alg != "none" => Ok(Outcome::note(format!("ID Token signed using alg={}", alg))),
        _ => Ok(Outcome::note("ID Token not signed")),
    }
}

/// Run COMPARE-IDTOKEN-RECEIVED-WITH-CHECK_ID-RESPONSE
///
/// Decodes the compact ID Token of the first authorization response and
/// compares its claims with what the check_id endpoint returned (the last
/// raw response).
pub fn compare_idtoken_with_check_id(conv: &mut Conversation) -> CheckResult {
    let Some(authz) = conv.protocol_responses(MessageType::AuthorizationResponse).first().copied() else {
        return Ok(Outcome::pass());
    };
    let Some(token) = authz.str_claim("id_token")? else {
        return Ok(Outcome::pass());
    };
    let decoded = jose::unverified_claims(token)?;

    let returned = match conv.events.last_item(EventKind::Response) {
        Some(EventData::Message(msg)) => msg.claims.clone(),
        Some(EventData::Json(Value::Object(map))) => map.clone(),
        Some(EventData::Text(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(Outcome::pass()),
        },
        _ => return Ok(Outcome::pass()),
    };

    if decoded == returned {
        Ok(Outcome::pass())
    } else {
        Ok(Outcome::raised(
            Status::Critical,
            "My deserialization of the IDToken differs from what the checkID response returned",
        ))
    }
}
