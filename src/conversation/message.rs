//! Protocol messages as recorded in a conversation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jose::{self, Compact};
use crate::CheckError;

/// OAuth2 / OpenID Connect message types a conversation can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[serde(alias = "AuthorizationRequest")]
    AuthorizationRequest,
    #[serde(alias = "AuthorizationResponse")]
    AuthorizationResponse,
    #[serde(alias = "AuthorizationErrorResponse")]
    AuthorizationErrorResponse,
    #[serde(alias = "ErrorResponse")]
    ErrorResponse,
    #[serde(alias = "AccessTokenRequest")]
    AccessTokenRequest,
    #[serde(alias = "AccessTokenResponse")]
    AccessTokenResponse,
    #[serde(alias = "IdToken")]
    IdToken,
    #[serde(alias = "UserInfo", alias = "OpenIDSchema", alias = "userinfo")]
    UserInfo,
    #[serde(alias = "RegistrationRequest")]
    RegistrationRequest,
    #[serde(alias = "RegistrationResponse")]
    RegistrationResponse,
    #[serde(alias = "ProviderConfiguration", alias = "ProviderConfigurationResponse")]
    ProviderConfiguration,
    #[default]
    #[serde(other)]
    Other,
}

impl MessageType {
    /// Parse a message type by its wire or class name.
    pub fn parse(name: &str) -> Option<MessageType> {
        serde_json::from_value(Value::String(name.to_string()))
            .ok()
            .filter(|t| *t != MessageType::Other)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::AuthorizationRequest => "AuthorizationRequest",
            MessageType::AuthorizationResponse => "AuthorizationResponse",
            MessageType::AuthorizationErrorResponse => "AuthorizationErrorResponse",
            MessageType::ErrorResponse => "ErrorResponse",
            MessageType::AccessTokenRequest => "AccessTokenRequest",
            MessageType::AccessTokenResponse => "AccessTokenResponse",
            MessageType::IdToken => "IdToken",
            MessageType::UserInfo => "UserInfo",
            MessageType::RegistrationRequest => "RegistrationRequest",
            MessageType::RegistrationResponse => "RegistrationResponse",
            MessageType::ProviderConfiguration => "ProviderConfiguration",
            MessageType::Other => "Message",
        };
        write!(f, "{}", name)
    }
}

/// A parsed protocol message: its claims plus the JOSE headers it arrived with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(default)]
    pub claims: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jws_header: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwe_header: Option<Map<String, Value>>,
    /// Parsed form of the `id_token` claim, when the message carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<Box<Message>>,
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Message {
            msg_type,
            ..Message::default()
        }
    }

    pub fn with_claims(msg_type: MessageType, claims: Map<String, Value>) -> Self {
        Message {
            msg_type,
            claims,
            ..Message::default()
        }
    }

    /// Build a message from a compact token without verifying it.
    ///
    /// An encrypted token only yields its JWE header; the claims stay empty.
    pub fn from_jwt(msg_type: MessageType, token: &str) -> Result<Self, CheckError> {
        match jose::split_token(token)? {
            Compact::Jws { header, payload, .. } => Ok(Message {
                msg_type,
                claims: jose::decode_object(payload)?,
                jws_header: Some(jose::decode_object(header)?),
                ..Message::default()
            }),
            Compact::Jwe { header } => Ok(Message {
                msg_type,
                jwe_header: Some(jose::decode_object(header)?),
                ..Message::default()
            }),
        }
    }

    /// Build a message from an `application/x-www-form-urlencoded` string.
    pub fn from_urlencoded(msg_type: MessageType, query: &str) -> Self {
        let claims = url::form_urlencoded::parse(query.trim_start_matches(['?', '#']).as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        Message::with_claims(msg_type, claims)
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }

    pub fn contains(&self, claim: &str) -> bool {
        self.claims.contains_key(claim)
    }

    /// A claim that must be a string when present.
    pub fn str_claim(&self, claim: &str) -> Result<Option<&str>, CheckError> {
        match self.claims.get(claim) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(CheckError::shape(claim, "a string")),
        }
    }

    pub fn is_error(&self) -> bool {
        self.contains("error")
            || matches!(
                self.msg_type,
                MessageType::ErrorResponse | MessageType::AuthorizationErrorResponse
            )
    }

    /// `alg` of the JWS header, if the message was signed.
    pub fn jws_alg(&self) -> Option<&str> {
        header_str(self.jws_header.as_ref(), "alg")
    }

    pub fn jwe_alg(&self) -> Option<&str> {
        header_str(self.jwe_header.as_ref(), "alg")
    }

    pub fn jwe_enc(&self) -> Option<&str> {
        header_str(self.jwe_header.as_ref(), "enc")
    }

    /// The ID Token carried by this message, parsed.
    ///
    /// Prefers the already parsed token; otherwise decodes the compact
    /// `id_token` claim without verification.
    pub fn embedded_id_token(&self) -> Result<Option<Message>, CheckError> {
        if let Some(idt) = &self.id_token {
            return Ok(Some((**idt).clone()));
        }
        match self.str_claim("id_token")? {
            Some(token) => Message::from_jwt(MessageType::IdToken, token).map(Some),
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.claims.keys().cloned().collect()
    }
}

fn header_str<'a>(header: Option<&'a Map<String, Value>>, name: &str) -> Option<&'a str> {
    header.and_then(|h| h.get(name)).and_then(Value::as_str)
}

/// String items of a list-valued claim. A bare string counts as one item.
pub fn strings(value: &Value, what: &str) -> Result<Vec<String>, CheckError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(CheckError::shape(what, "a list of strings")),
            })
            .collect(),
        _ => Err(CheckError::shape(what, "a string or a list of strings")),
    }
}

/// Space-separated tokens (`scope`, `response_type`) given as a string or a list.
pub fn tokens(value: &Value, what: &str) -> Result<Vec<String>, CheckError> {
    Ok(strings(value, what)?
        .iter()
        .flat_map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .collect())
}
