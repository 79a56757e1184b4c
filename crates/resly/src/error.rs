//! Service layer errors.
//!
//! [`ServiceError`] covers configuration mistakes raised synchronously to
//! the application (bad patterns, wrong state), request-state violations
//! (double reply, late events), and wrapped lower-layer failures.
//! Handler callbacks return it; a [`ServiceError::Protocol`] bubbles to
//! the gateway as-is, anything else becomes `system.internalError`.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ServiceError::PatternInvalid`] | `SERVICE_PATTERN_INVALID` | No |
//! | [`ServiceError::PatternConflict`] | `SERVICE_PATTERN_CONFLICT` | No |
//! | [`ServiceError::GroupInvalid`] | `SERVICE_GROUP_INVALID` | No |
//! | [`ServiceError::InvalidState`] | `SERVICE_INVALID_STATE` | No |
//! | [`ServiceError::InvalidArgument`] | `SERVICE_INVALID_ARGUMENT` | No |
//! | [`ServiceError::NoMatchingPattern`] | `SERVICE_NO_MATCHING_PATTERN` | No |
//! | [`ServiceError::DoubleReply`] | `SERVICE_DOUBLE_REPLY` | No |
//! | [`ServiceError::EventAfterResponse`] | `SERVICE_EVENT_AFTER_RESPONSE` | No |
//! | [`ServiceError::WrongResourceType`] | `SERVICE_WRONG_RESOURCE_TYPE` | No |
//! | [`ServiceError::WrongRequestKind`] | `SERVICE_WRONG_REQUEST_KIND` | No |
//! | [`ServiceError::Protocol`] | `SERVICE_PROTOCOL` | No |
//! | [`ServiceError::Conn`] | `SERVICE_CONN` | Yes |
//! | [`ServiceError::Serialize`] | `SERVICE_SERIALIZE` | No |

use crate::conn::ConnError;
use crate::request::RequestKind;
use crate::service::ServiceState;
use resly_proto::{ErrorCode, ResError};
use thiserror::Error;

/// Service layer error.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A pattern contains an invalid token.
    #[error("invalid pattern '{pattern}': {reason}")]
    PatternInvalid {
        /// The offending pattern, with the service prefix merged in.
        pattern: String,
        /// What made the pattern invalid.
        reason: String,
    },

    /// A pattern collides with an already registered sibling.
    #[error("pattern conflict: '{pattern}' collides with a registered pattern")]
    PatternConflict {
        /// The offending pattern, with the service prefix merged in.
        pattern: String,
    },

    /// A group label references a parameter the pattern does not declare,
    /// or is otherwise malformed.
    #[error("invalid group '{group}': {reason}")]
    GroupInvalid {
        /// The offending group label.
        group: String,
        /// What made the label invalid.
        reason: String,
    },

    /// The operation is not allowed in the service's current state.
    #[error("{operation} requires a {required} service, but the service is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the operation requires.
        required: &'static str,
        /// The state the service was in.
        state: ServiceState,
    },

    /// A malformed argument, e.g. a connection id containing `.`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource name did not resolve to any registered pattern.
    #[error("no matching pattern for resource '{0}'")]
    NoMatchingPattern(String),

    /// A second terminal response was attempted on a request.
    #[error("response already sent for request on '{0}'")]
    DoubleReply(String),

    /// An event was emitted through a request after its response.
    #[error("event emitted after the response on '{0}'")]
    EventAfterResponse(String),

    /// An event requires a resource type the handler does not declare.
    #[error("resource '{rid}' is not declared as a {expected} resource")]
    WrongResourceType {
        /// The resource the event targeted.
        rid: String,
        /// The resource type the event requires.
        expected: &'static str,
    },

    /// A response or event method was called on the wrong request kind.
    #[error("{operation} is not valid for a {kind} request")]
    WrongRequestKind {
        /// The rejected method.
        operation: &'static str,
        /// The kind of the request it was called on.
        kind: RequestKind,
    },

    /// A protocol error, replied to the gateway verbatim.
    #[error(transparent)]
    Protocol(#[from] ResError),

    /// A bus connection failure.
    #[error("connection error: {0}")]
    Conn(#[from] ConnError),

    /// A JSON serialization failure.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ErrorCode for ServiceError {
    fn code(&self) -> &'static str {
        match self {
            Self::PatternInvalid { .. } => "SERVICE_PATTERN_INVALID",
            Self::PatternConflict { .. } => "SERVICE_PATTERN_CONFLICT",
            Self::GroupInvalid { .. } => "SERVICE_GROUP_INVALID",
            Self::InvalidState { .. } => "SERVICE_INVALID_STATE",
            Self::InvalidArgument(_) => "SERVICE_INVALID_ARGUMENT",
            Self::NoMatchingPattern(_) => "SERVICE_NO_MATCHING_PATTERN",
            Self::DoubleReply(_) => "SERVICE_DOUBLE_REPLY",
            Self::EventAfterResponse(_) => "SERVICE_EVENT_AFTER_RESPONSE",
            Self::WrongResourceType { .. } => "SERVICE_WRONG_RESOURCE_TYPE",
            Self::WrongRequestKind { .. } => "SERVICE_WRONG_REQUEST_KIND",
            Self::Protocol(_) => "SERVICE_PROTOCOL",
            Self::Conn(_) => "SERVICE_CONN",
            Self::Serialize(_) => "SERVICE_SERIALIZE",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Connection failures may clear on reconnect; everything else needs
        // a code or configuration change.
        matches!(self, Self::Conn(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resly_proto::assert_error_codes;

    fn all_variants() -> Vec<ServiceError> {
        vec![
            ServiceError::PatternInvalid {
                pattern: "a..b".into(),
                reason: "empty token".into(),
            },
            ServiceError::PatternConflict { pattern: "a.$x".into() },
            ServiceError::GroupInvalid {
                group: "${nope}".into(),
                reason: "unknown parameter".into(),
            },
            ServiceError::InvalidState {
                operation: "set_query_duration",
                required: "stopped",
                state: ServiceState::Started,
            },
            ServiceError::InvalidArgument("cid contains '.'".into()),
            ServiceError::NoMatchingPattern("x.y".into()),
            ServiceError::DoubleReply("x.y".into()),
            ServiceError::EventAfterResponse("x.y".into()),
            ServiceError::WrongResourceType { rid: "x.y".into(), expected: "model" },
            ServiceError::WrongRequestKind {
                operation: "model",
                kind: RequestKind::Call,
            },
            ServiceError::Protocol(ResError::not_found()),
            ServiceError::Conn(ConnError::Closed),
            ServiceError::Serialize(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "SERVICE_");
    }

    #[test]
    fn only_conn_errors_recoverable() {
        for err in all_variants() {
            assert_eq!(err.is_recoverable(), matches!(err, ServiceError::Conn(_)));
        }
    }

    #[test]
    fn protocol_error_passthrough() {
        let err = ServiceError::from(ResError::invalid_params());
        match err {
            ServiceError::Protocol(res) => assert_eq!(res, ResError::invalid_params()),
            other => panic!("expected Protocol variant, got {other}"),
        }
    }
}
