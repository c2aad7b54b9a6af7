//! Builder for recorded conversations.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oidc_op_checks::conversation::{EventData, EventKind, Message, MessageType};
use oidc_op_checks::fetch::HttpResponse;
use oidc_op_checks::Conversation;
use serde_json::{Map, Value};

use super::FakeFetcher;

pub const ISSUER: &str = "https://op.example.com";
pub const JWKS_URI: &str = "https://op.example.com/jwks";

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Compact JWS with the given header and claims and a dummy signature.
pub fn jwt(header: Value, claims: Value) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode("signature")
    )
}

/// ID Token claims for the test issuer, merged with `extra`.
pub fn id_token_claims(extra: Value) -> Value {
    let mut claims = object(serde_json::json!({
        "iss": ISSUER,
        "sub": "alice",
        "aud": "client-1",
        "exp": 4_000_000_000_i64,
        "iat": 1_700_000_000_i64,
    }));
    claims.extend(object(extra));
    Value::Object(claims)
}

/// Builds a conversation the way a test flow would have recorded it.
pub struct ConversationBuilder {
    conv: Conversation,
}

impl Default for ConversationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationBuilder {
    pub fn new() -> Self {
        ConversationBuilder {
            conv: Conversation::new().with_fetcher(FakeFetcher::new()),
        }
    }

    pub fn provider(mut self, info: Value) -> Self {
        self.conv.entity.provider_info = object(info);
        self
    }

    pub fn request_args(mut self, args: Value) -> Self {
        self.conv.request_args = object(args);
        self
    }

    pub fn fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.conv = self.conv.with_fetcher(fetcher);
        self
    }

    pub fn authorization_request(mut self, claims: Value) -> Self {
        self.conv.events.push(
            EventKind::ProtocolRequest,
            EventData::Message(Message::with_claims(MessageType::AuthorizationRequest, object(claims))),
        );
        self
    }

    pub fn response(mut self, msg_type: MessageType, claims: Value) -> Self {
        self.conv.events.push(
            EventKind::ProtocolResponse,
            EventData::Message(Message::with_claims(msg_type, object(claims))),
        );
        self
    }

    /// Log an RS256-signed ID Token as a protocol response.
    pub fn id_token(mut self, claims: Value) -> Self {
        let token = jwt(serde_json::json!({"alg": "RS256", "kid": "sig-1"}), claims);
        let idt = Message::from_jwt(MessageType::IdToken, &token).unwrap();
        self.conv
            .events
            .push(EventKind::ProtocolResponse, EventData::Message(idt));
        self
    }

    pub fn http_response(mut self, status: u16, content_type: &str, body: &str) -> Self {
        let mut response = HttpResponse {
            status,
            body: body.to_string(),
            ..HttpResponse::default()
        };
        response
            .headers
            .insert("content-type".to_string(), content_type.to_string());
        self.conv
            .events
            .push(EventKind::HttpResponse, EventData::Http(response));
        self
    }

    pub fn build(self) -> Conversation {
        self.conv
    }
}
