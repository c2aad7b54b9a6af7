//! Per-run conversation context.
//!
//! A `Conversation` is everything the checks may look at: the event log of
//! the run, the client entity that talked to the OP, and the bits of state
//! earlier flow steps left behind. It is created once per run, usually by
//! deserializing a recorded run, and handed to every check in turn.

pub mod events;
pub mod message;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fetch::{FetchError, HttpClient, HttpResponse, KeySetFetcher};
use crate::jose::Jwk;
use crate::{CheckError, Error, Result};

pub use events::{Event, EventData, EventKind, EventLog};
pub use message::{Message, MessageType};

/// A grant obtained from the OP, keyed by state in `Entity::grants`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Grant {
    pub code: Option<String>,
    /// Expiry of the code, seconds since the epoch
    pub expires_at: Option<i64>,
}

impl Grant {
    /// A grant is valid while it holds a code that has not expired.
    pub fn is_valid(&self, now: i64) -> bool {
        self.code.is_some() && self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// The client (relying party) that ran the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub redirect_uris: Vec<String>,
    pub client_secret: Option<String>,
    /// Discovery document of the OP
    pub provider_info: Map<String, Value>,
    /// Keys the client holds
    pub keys: Vec<Jwk>,
    pub grants: BTreeMap<String, Grant>,
    /// Request kind to the provider metadata name of its endpoint
    pub request2endpoint: BTreeMap<String, String>,
}

fn default_request2endpoint() -> BTreeMap<String, String> {
    [
        ("AuthorizationRequest", "authorization_endpoint"),
        ("AccessTokenRequest", "token_endpoint"),
        ("RefreshAccessTokenRequest", "token_endpoint"),
        ("UserInfoRequest", "userinfo_endpoint"),
        ("RegistrationRequest", "registration_endpoint"),
        ("CheckSessionRequest", "check_session_iframe"),
        ("EndSessionRequest", "end_session_endpoint"),
        ("ResourceRequest", "resource_endpoint"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for Entity {
    fn default() -> Self {
        Entity {
            redirect_uris: Vec::new(),
            client_secret: None,
            provider_info: Map::new(),
            keys: Vec::new(),
            grants: BTreeMap::new(),
            request2endpoint: default_request2endpoint(),
        }
    }
}

/// How the response under test is expected to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEncoding {
    Json,
    Urlencoded,
}

/// Key-set fetcher held by a conversation. Not part of the recorded state.
pub struct Fetcher(Box<dyn KeySetFetcher + Send + Sync>);

impl Default for Fetcher {
    fn default() -> Self {
        Fetcher(Box::new(HttpClient::new()))
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fetcher")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversation {
    pub events: EventLog,
    pub entity: Entity,
    /// Test configuration of the entity (`sub`, `srv_discovery_url`, ...)
    pub entity_config: Map<String, Value>,
    /// Name of the request kind the current flow step sends
    pub request: Option<String>,
    /// Arguments of the current request
    pub request_args: Map<String, Value>,
    /// Arguments of the current flow step (`authn_method`, ...)
    pub args: Map<String, Value>,
    pub response_encoding: Option<ResponseEncoding>,
    /// Body of the last login page shown
    pub login_page: Option<String>,
    /// Query component added to the redirect URI
    pub query_component: Option<String>,
    /// URL the user agent is currently at
    pub position: Option<String>,
    /// Redirect URL carrying an implicit-flow response
    pub info: Option<String>,
    /// Key sets published by the OP before and after a rollover
    pub key_bundles: Vec<Vec<Jwk>>,
    #[serde(skip)]
    fetcher: Fetcher,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a recorded conversation.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse {
            context: "conversation".to_string(),
            message: e.to_string(),
        })
    }

    /// Load a recorded conversation from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            context: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    /// Replace the key-set fetcher.
    pub fn with_fetcher(mut self, fetcher: impl KeySetFetcher + Send + Sync + 'static) -> Self {
        self.fetcher = Fetcher(Box::new(fetcher));
        self
    }

    pub fn fetch(&self, url: &str) -> std::result::Result<HttpResponse, FetchError> {
        self.fetcher.0.fetch(url)
    }

    pub fn provider_info(&self) -> &Map<String, Value> {
        &self.entity.provider_info
    }

    /// Protocol responses of one message type, oldest first.
    pub fn protocol_responses(&self, msg_type: MessageType) -> Vec<&Message> {
        self.messages(EventKind::ProtocolResponse, msg_type)
    }

    pub fn protocol_requests(&self, msg_type: MessageType) -> Vec<&Message> {
        self.messages(EventKind::ProtocolRequest, msg_type)
    }

    fn messages(&self, kind: EventKind, msg_type: MessageType) -> Vec<&Message> {
        self.events
            .get_data(kind)
            .into_iter()
            .filter_map(EventData::as_message)
            .filter(|m| m.msg_type == msg_type)
            .collect()
    }

    /// The last protocol response, whatever its type.
    pub fn last_protocol_response(&self) -> Option<&Message> {
        self.events
            .last_item(EventKind::ProtocolResponse)
            .and_then(EventData::as_message)
    }

    pub fn last_http_response(&self) -> Option<&HttpResponse> {
        self.events
            .last_item(EventKind::HttpResponse)
            .and_then(EventData::as_http)
    }

    /// The authorization request that started the flow.
    ///
    /// The last logged authorization request wins; a run that only recorded
    /// the redirect falls back to the query of the first redirect URL.
    pub fn authorization_request(&self) -> Option<Message> {
        if let Some(req) = self.protocol_requests(MessageType::AuthorizationRequest).last() {
            return Some((*req).clone());
        }
        self.events
            .get_data(EventKind::RedirectUrl)
            .into_iter()
            .filter_map(EventData::as_text)
            .next()
            .and_then(|url| url.split_once('?'))
            .map(|(_, query)| Message::from_urlencoded(MessageType::AuthorizationRequest, query))
    }

    /// Every ID Token received, in log order.
    ///
    /// Collects ID Token responses and the ID Tokens embedded in
    /// authorization and access token responses.
    pub fn id_tokens(&self) -> std::result::Result<Vec<Message>, CheckError> {
        let mut tokens = Vec::new();
        for msg in self
            .events
            .get_data(EventKind::ProtocolResponse)
            .into_iter()
            .filter_map(EventData::as_message)
        {
            match msg.msg_type {
                MessageType::IdToken => tokens.push(msg.clone()),
                MessageType::AuthorizationResponse | MessageType::AccessTokenResponse => {
                    if let Some(idt) = msg.embedded_id_token()? {
                        tokens.push(idt);
                    }
                }
                _ => {}
            }
        }
        Ok(tokens)
    }
}
