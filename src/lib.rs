//! oidc-op-checks library
//!
//! Conformance checks for OpenID Connect Providers.
//!
//! This library provides the verification side of an OP conformance harness:
//! - A catalog of independent checks over a recorded conversation
//!   (capability negotiation, claim sets, JOSE headers, cross-message
//!   consistency, prompt=none flow shapes, transport hygiene, published keys)
//! - A registry resolving check identifiers, with a parent registry of
//!   generic response checks
//! - A runner that evaluates a flow of checks and accumulates a report
//!
//! # Example
//!
//! ```no_run
//! use oidc_op_checks::{run_flow, Conversation, Flow, RunConfig};
//!
//! let conv = Conversation::load("conversation.json").expect("load conversation");
//! let flow = Flow::from_json(r#"[{"id": "verify-state"}, {"id": "check-idtoken-nonce"}]"#)
//!     .expect("flow");
//! let (report, _conv) = run_flow(conv, &flow, RunConfig::default()).expect("run");
//! println!("Worst status: {}", report.worst_status());
//! ```

pub mod checks;
pub mod cli;
pub mod conversation;
pub mod data;
pub mod engine;
pub mod fetch;
pub mod jose;
pub mod version;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// Re-exports for public API
pub use conversation::Conversation;
pub use engine::orchestrator::{CheckOrchestrator, Flow, FlowStep, OrchestratorConfig};
pub use engine::registry::{CheckDef, Registry};
pub use engine::result::{Report, ResultSummary};

/// Severity of a check outcome, in ascending order.
///
/// `Interaction` means a human has to resolve a page nobody scripted; it
/// ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    #[serde(alias = "OK")]
    Ok,
    #[serde(alias = "INFORMATION", alias = "info")]
    Information,
    #[serde(alias = "WARNING")]
    Warning,
    #[serde(alias = "ERROR")]
    Error,
    #[serde(alias = "CRITICAL")]
    Critical,
    #[serde(alias = "INTERACTION")]
    Interaction,
}

impl Status {
    /// Statuses that do not count against the OP.
    pub fn is_pass(self) -> bool {
        self <= Status::Information
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Information => write!(f, "INFORMATION"),
            Status::Warning => write!(f, "WARNING"),
            Status::Error => write!(f, "ERROR"),
            Status::Critical => write!(f, "CRITICAL"),
            Status::Interaction => write!(f, "INTERACTION"),
        }
    }
}

/// Result of evaluating one check against a conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl Outcome {
    /// Passing outcome with nothing to report.
    pub fn pass() -> Self {
        Outcome::default()
    }

    /// Passing outcome carrying an informative message.
    pub fn note(message: impl Into<String>) -> Self {
        Outcome {
            message: Some(message.into()),
            ..Outcome::default()
        }
    }

    /// Outcome raised to `status` with a message.
    pub fn raised(status: Status, message: impl Into<String>) -> Self {
        Outcome {
            status,
            message: Some(message.into()),
            detail: Map::new(),
        }
    }

    /// Raise the status to at least `status`. Never lowers it.
    pub fn escalate(&mut self, status: Status, message: impl Into<String>) {
        if status > self.status {
            self.status = status;
        }
        self.message = Some(message.into());
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status.is_pass()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.status, message),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Check category for grouping related checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    /// Provider metadata covers what the request used
    Support,
    /// Discovery document and entity configuration
    Provider,
    /// Claim sets in ID Tokens and UserInfo
    Claims,
    /// Token endpoint, registration and login page responses
    Responses,
    /// JOSE header properties of tokens
    Signing,
    /// Values that must agree across messages
    Consistency,
    /// Shape of the protocol flow
    Flow,
    /// HTTPS use and content types
    Transport,
    /// Published and configured keys
    Keys,
    /// Framework-level response checks
    Generic,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 10] = [
        CheckCategory::Support,
        CheckCategory::Provider,
        CheckCategory::Claims,
        CheckCategory::Responses,
        CheckCategory::Signing,
        CheckCategory::Consistency,
        CheckCategory::Flow,
        CheckCategory::Transport,
        CheckCategory::Keys,
        CheckCategory::Generic,
    ];
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckCategory::Support => write!(f, "Support"),
            CheckCategory::Provider => write!(f, "Provider"),
            CheckCategory::Claims => write!(f, "Claims"),
            CheckCategory::Responses => write!(f, "Responses"),
            CheckCategory::Signing => write!(f, "Signing"),
            CheckCategory::Consistency => write!(f, "Consistency"),
            CheckCategory::Flow => write!(f, "Flow"),
            CheckCategory::Transport => write!(f, "Transport"),
            CheckCategory::Keys => write!(f, "Keys"),
            CheckCategory::Generic => write!(f, "Generic"),
        }
    }
}

/// Error types for configuring and running checks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No registry in the chain knows the identifier
    #[error("unknown check: {id}")]
    UnknownCheck { id: String },

    /// Parameters rejected while constructing a check
    #[error("invalid parameters for {id}: {reason}")]
    InvalidParams { id: String, reason: String },

    #[error("I/O error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error(transparent)]
    Fetch(#[from] fetch::FetchError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Data inside the conversation had a shape the check did not anticipate.
///
/// The runner records this as a critical failure of that single check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckError {
    #[error("unexpected value for '{what}': expected {expected}")]
    Shape { what: String, expected: &'static str },

    #[error("cannot decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl CheckError {
    pub fn shape(what: impl Into<String>, expected: &'static str) -> Self {
        CheckError::Shape {
            what: what.into(),
            expected,
        }
    }

    pub fn decode(what: impl Into<String>, message: impl fmt::Display) -> Self {
        CheckError::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

impl From<jose::JoseError> for CheckError {
    fn from(e: jose::JoseError) -> Self {
        CheckError::decode("token", e)
    }
}

/// Configuration for running a flow of checks.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Stop after the first outcome at `Error` or above
    pub fail_fast: bool,
    /// Identifiers to leave out of the flow
    pub skip_checks: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            fail_fast: false,
            skip_checks: Vec::new(),
        }
    }
}

/// Run a flow of checks against a conversation.
///
/// Every identifier in the flow is resolved and its parameters validated
/// before the first check runs, so a misconfigured flow fails without
/// touching the conversation. The conversation is handed back with
/// whatever the checks stored in its event log.
///
/// # Example
///
/// ```no_run
/// use oidc_op_checks::{run_flow, Conversation, Flow, RunConfig};
///
/// let flow = Flow::from_json(r#"{"check-response-type": {}}"#).unwrap();
/// match run_flow(Conversation::default(), &flow, RunConfig::default()) {
///     Ok((report, _)) => println!("{} checks", report.summary().total),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub fn run_flow(
    mut conversation: Conversation,
    flow: &Flow,
    config: RunConfig,
) -> Result<(Report, Conversation)> {
    let orch_config = OrchestratorConfig {
        fail_fast: config.fail_fast,
        stop_on_interaction: true,
    };

    let orchestrator = CheckOrchestrator::new(orch_config, Registry::standard());

    let report = if config.skip_checks.is_empty() {
        orchestrator.run(&mut conversation, flow)?
    } else {
        orchestrator.run(&mut conversation, &flow.excluding(&config.skip_checks))?
    };

    Ok((report, conversation))
}
