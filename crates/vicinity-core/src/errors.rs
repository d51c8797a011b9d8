use std::time::Duration;

use serde_json::{json, Value};

use crate::protocol::InboundKind;

/// Errors produced while routing one inbound event.
///
/// Every variant maps to a wire `error{code, message, details?}` event sent to
/// the originating connection. Only [`RouteError::Auth`] also closes it.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("register before sending {event}")]
    NotRegistered { event: &'static str },
    #[error("rate limit exceeded for {class}")]
    RateLimited { class: &'static str, retry_after: Duration },
    #[error("vehicle {0} is not connected")]
    TargetOffline(String),
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("no pending connect request from {requester} to {target}")]
    NoPendingRequest { requester: String, target: String },
    #[error("vehicle registered from another connection")]
    SessionReplaced,
}

impl RouteError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_failed",
            Self::NotRegistered { .. } => "not_registered",
            Self::RateLimited { .. } => "rate_limited",
            Self::TargetOffline(_) => "target_offline",
            Self::UnknownEvent(_) => "unknown_event",
            Self::NoPendingRequest { .. } => "no_pending_request",
            Self::SessionReplaced => "session_replaced",
        }
    }

    /// Structured details attached to the wire error, if any.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::RateLimited { class, retry_after } => Some(json!({
                "eventClass": class,
                "retryAfterMs": u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            })),
            Self::UnknownEvent(_) => Some(json!({
                "knownEvents": InboundKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>(),
            })),
            Self::TargetOffline(target) => Some(json!({ "targetId": target })),
            _ => None,
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
