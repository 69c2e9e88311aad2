//! Error taxonomy shared across the substrate.

use serde::{Deserialize, Serialize};

/// Code carried by a `<SystemError>` payload.
///
/// Routing failures, missing targets, and permission misses all carry the
/// same generic `Routing` wire message; a handler cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemErrorCode {
    Routing,
    Validation,
    Timeout,
    Budget,
}

impl SystemErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Budget => "budget",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "routing" => Some(Self::Routing),
            "validation" => Some(Self::Validation),
            "timeout" => Some(Self::Timeout),
            "budget" => Some(Self::Budget),
            _ => None,
        }
    }

    /// Canned, non-revealing message for this code.
    pub fn generic_message(&self) -> &'static str {
        match self {
            Self::Routing => "Message could not be routed",
            Self::Validation => "Message could not be processed",
            Self::Timeout => "Handler deadline exceeded",
            Self::Budget => "Thread budget exhausted",
        }
    }

    /// Whether the thread stays alive for retry after this error.
    pub fn retry_allowed(&self) -> bool {
        !matches!(self, Self::Budget)
    }
}

/// Error returned by a handler.
///
/// The pump never surfaces the message externally; it is logged with the
/// thread UUID and listener name and replaced by a generic `<SystemError>`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self::Failed(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self::Failed(s.to_string())
    }
}

/// Registration failures. Synchronous, returned to the controller; the
/// registry is left unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegisterError {
    #[error("Listener name must not be empty")]
    EmptyName,
    #[error("Listener already registered: {name}")]
    DuplicateName { name: String },
    #[error("Listener '{name}' requires a non-empty description")]
    MissingDescription { name: String },
    #[error("Root tag already registered: {root_tag}")]
    RootTagCollision { root_tag: String },
    #[error("Broadcast listeners sharing '{root_tag}' must have identical payload structure")]
    BroadcastShapeMismatch { root_tag: String },
    #[error("Agent listeners may not broadcast: {name}")]
    AgentBroadcast { name: String },
    #[error("Broadcast listener '{name}' needs a dot-segmented name")]
    BroadcastWithoutGroup { name: String },
    #[error("Listener '{listener}' declares unknown peer: {peer}")]
    UnknownPeer { listener: String, peer: String },
}
