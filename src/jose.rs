//! JOSE helpers.
//!
//! Unverified decoding of compact JWS/JWE serializations and base64url
//! inspection of JWK members. Signature verification and decryption belong
//! to the protocol library that produced the conversation.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// base64url decoder that accepts input with or without padding and
/// non-zero trailing bits in the last symbol.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, thiserror::Error)]
pub enum JoseError {
    #[error("expected 3 (JWS) or 5 (JWE) segments, found {0}")]
    Segments(usize),

    #[error("invalid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("segment is not a JSON object")]
    NotAnObject,
}

/// Compact token split into its segments.
#[derive(Debug, Clone, PartialEq)]
pub enum Compact<'a> {
    Jws {
        header: &'a str,
        payload: &'a str,
        signature: &'a str,
    },
    Jwe {
        header: &'a str,
    },
}

pub fn split_token(token: &str) -> Result<Compact<'_>, JoseError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    match parts[..] {
        [header, payload, signature] => Ok(Compact::Jws {
            header,
            payload,
            signature,
        }),
        [header, _, _, _, _] => Ok(Compact::Jwe { header }),
        _ => Err(JoseError::Segments(parts.len())),
    }
}

pub fn decode_segment(segment: &str) -> Result<Vec<u8>, JoseError> {
    Ok(URL_SAFE_LENIENT.decode(segment)?)
}

/// Decode a segment holding a JSON object (header or claims).
pub fn decode_object(segment: &str) -> Result<Map<String, Value>, JoseError> {
    match serde_json::from_slice(&decode_segment(segment)?)? {
        Value::Object(map) => Ok(map),
        _ => Err(JoseError::NotAnObject),
    }
}

/// Payload claims of a compact JWS, without verifying the signature.
pub fn unverified_claims(token: &str) -> Result<Map<String, Value>, JoseError> {
    match split_token(token)? {
        Compact::Jws { payload, .. } => decode_object(payload),
        Compact::Jwe { .. } => Err(JoseError::Segments(5)),
    }
}

/// True when `value` is strict base64url: no `+`, `/` or `=` and decodable.
pub fn is_base64url(value: &str) -> bool {
    if value.contains(['+', '/', '=']) {
        return false;
    }
    URL_SAFE_LENIENT.decode(value).is_ok()
}

/// A JSON Web Key as held in a key bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Jwk {
    /// Same key type and key material, whatever the kid says.
    pub fn same_material(&self, other: &Jwk) -> bool {
        if self.kty != other.kty {
            return false;
        }
        let material = |k: &Jwk| -> Map<String, Value> {
            k.params
                .iter()
                .filter(|(name, _)| !matches!(name.as_str(), "alg" | "key_ops" | "x5c" | "x5t"))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        };
        material(self) == material(other)
    }

    /// Whether the key may be used for `usage` ("sig" or "enc").
    /// A key without a `use` member serves both.
    pub fn usable_for(&self, usage: &str) -> bool {
        self.key_use.as_deref().map_or(true, |u| u == usage)
    }
}
