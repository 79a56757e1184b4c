//! Protocol errors and the unified error-code interface.
//!
//! Two layers live here and they are deliberately distinct:
//!
//! 1. [`ResError`]: the **wire** error of the RES-Service protocol. It is
//!    data: a dotted code such as `system.notFound`, a human message, and
//!    optional structured data. It travels inside the reply envelope
//!    `{"error": {...}}` and is what a gateway ultimately shows a client.
//! 2. [`ErrorCode`]: the **Rust** error interface every error enum in this
//!    workspace implements, providing a stable UPPER_SNAKE_CASE code and
//!    recoverability info for logging and retry logic.
//!
//! # Standard codes
//!
//! | Constructor | Code | Default message |
//! |-------------|------|-----------------|
//! | [`ResError::access_denied`] | `system.accessDenied` | Access denied |
//! | [`ResError::not_found`] | `system.notFound` | Not found |
//! | [`ResError::method_not_found`] | `system.methodNotFound` | Method not found |
//! | [`ResError::invalid_params`] | `system.invalidParams` | Invalid parameters |
//! | [`ResError::invalid_query`] | `system.invalidQuery` | Invalid query |
//! | [`ResError::internal_error`] | `system.internalError` | Internal error |
//! | [`ResError::timeout`] | `system.timeout` | Request timeout |
//!
//! Application errors use arbitrary dotted codes, e.g. `shop.outOfStock`.
//!
//! # Example
//!
//! ```
//! use resly_proto::ResError;
//!
//! let err = ResError::not_found();
//! assert_eq!(err.code, resly_proto::CODE_NOT_FOUND);
//!
//! let custom = ResError::new("shop.outOfStock", "Out of stock")
//!     .with_data(serde_json::json!({ "sku": "X-1" }));
//! assert!(custom.data.is_some());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Code for an access denied error.
pub const CODE_ACCESS_DENIED: &str = "system.accessDenied";
/// Code for a resource not found error.
pub const CODE_NOT_FOUND: &str = "system.notFound";
/// Code for a method not found error.
pub const CODE_METHOD_NOT_FOUND: &str = "system.methodNotFound";
/// Code for invalid request parameters.
pub const CODE_INVALID_PARAMS: &str = "system.invalidParams";
/// Code for an invalid query.
pub const CODE_INVALID_QUERY: &str = "system.invalidQuery";
/// Code for an internal service error.
pub const CODE_INTERNAL_ERROR: &str = "system.internalError";
/// Code for a request timeout.
pub const CODE_TIMEOUT: &str = "system.timeout";

/// A RES protocol error.
///
/// Sent to the gateway inside the reply envelope `{"error": {...}}`.
/// Handlers may return these directly to produce a protocol error reply;
/// any other handler failure is converted to `system.internalError` by the
/// service (the original failure is logged, not leaked onto the bus).
///
/// # Example
///
/// ```
/// use resly_proto::ResError;
///
/// let err = ResError::invalid_params().with_message("missing field 'name'");
/// let json = serde_json::to_value(&err).unwrap();
/// assert_eq!(json["code"], "system.invalidParams");
/// assert_eq!(json["message"], "missing field 'name'");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ResError {
    /// Dotted error code, e.g. `system.notFound` or `shop.outOfStock`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResError {
    /// Creates an error with an application-defined code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Replaces the message, keeping the code.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attaches structured error data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `system.accessDenied` with the standard message.
    #[must_use]
    pub fn access_denied() -> Self {
        Self::new(CODE_ACCESS_DENIED, "Access denied")
    }

    /// `system.notFound` with the standard message.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(CODE_NOT_FOUND, "Not found")
    }

    /// `system.methodNotFound` with the standard message.
    #[must_use]
    pub fn method_not_found() -> Self {
        Self::new(CODE_METHOD_NOT_FOUND, "Method not found")
    }

    /// `system.invalidParams` with the standard message.
    #[must_use]
    pub fn invalid_params() -> Self {
        Self::new(CODE_INVALID_PARAMS, "Invalid parameters")
    }

    /// `system.invalidQuery` with the standard message.
    #[must_use]
    pub fn invalid_query() -> Self {
        Self::new(CODE_INVALID_QUERY, "Invalid query")
    }

    /// `system.internalError` with the standard message.
    #[must_use]
    pub fn internal_error() -> Self {
        Self::new(CODE_INTERNAL_ERROR, "Internal error")
    }

    /// `system.timeout` with the standard message.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(CODE_TIMEOUT, "Request timeout")
    }

    /// Returns `true` if the code is in the reserved `system.` namespace.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.code.starts_with("system.")
    }
}

/// Unified error code interface for workspace errors.
///
/// Implement this trait for all Rust error enums to enable:
///
/// - Consistent error code format across crates
/// - Standardized logging and monitoring
/// - Retry decisions based on recoverability
///
/// Codes are UPPER_SNAKE_CASE, prefixed per layer (`PROTO_`, `CONN_`,
/// `SERVICE_`), and stable once defined.
///
/// # Example
///
/// ```
/// use resly_proto::ErrorCode;
///
/// #[derive(Debug)]
/// enum MyError {
///     NotFound,
///     Timeout,
/// }
///
/// impl ErrorCode for MyError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::NotFound => "MY_NOT_FOUND",
///             Self::Timeout => "MY_TIMEOUT",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::Timeout)
///     }
/// }
///
/// assert_eq!(MyError::Timeout.code(), "MY_TIMEOUT");
/// assert!(MyError::Timeout.is_recoverable());
/// ```
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows workspace conventions.
///
/// # Panics
///
/// Panics with a descriptive message if the code is empty, is not
/// UPPER_SNAKE_CASE, or does not start with the expected prefix.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates multiple error codes at once.
///
/// Use this to verify all variants of an error enum.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

/// Checks if a string is UPPER_SNAKE_CASE.
fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes() {
        assert_eq!(ResError::access_denied().code, CODE_ACCESS_DENIED);
        assert_eq!(ResError::not_found().code, CODE_NOT_FOUND);
        assert_eq!(ResError::method_not_found().code, CODE_METHOD_NOT_FOUND);
        assert_eq!(ResError::invalid_params().code, CODE_INVALID_PARAMS);
        assert_eq!(ResError::invalid_query().code, CODE_INVALID_QUERY);
        assert_eq!(ResError::internal_error().code, CODE_INTERNAL_ERROR);
        assert_eq!(ResError::timeout().code, CODE_TIMEOUT);
    }

    #[test]
    fn serialize_without_data() {
        let err = ResError::not_found();
        let json = serde_json::to_value(&err).expect("error should serialize");
        assert_eq!(
            json,
            serde_json::json!({"code": "system.notFound", "message": "Not found"})
        );
    }

    #[test]
    fn serialize_with_data() {
        let err = ResError::new("shop.outOfStock", "Out of stock")
            .with_data(serde_json::json!({"sku": 7}));
        let json = serde_json::to_value(&err).expect("error should serialize");
        assert_eq!(json["data"]["sku"], 7);
    }

    #[test]
    fn deserialize_roundtrip() {
        let raw = r#"{"code":"system.timeout","message":"Request timeout"}"#;
        let err: ResError = serde_json::from_str(raw).expect("error should deserialize");
        assert_eq!(err, ResError::timeout());
        assert!(err.data.is_none());
    }

    #[test]
    fn is_system_namespace() {
        assert!(ResError::not_found().is_system());
        assert!(!ResError::new("shop.outOfStock", "Out of stock").is_system());
    }

    #[test]
    fn with_message_keeps_code() {
        let err = ResError::invalid_params().with_message("missing 'id'");
        assert_eq!(err.code, CODE_INVALID_PARAMS);
        assert_eq!(err.message, "missing 'id'");
    }

    #[test]
    fn is_upper_snake_case_valid() {
        assert!(is_upper_snake_case("HELLO"));
        assert!(is_upper_snake_case("HELLO_WORLD"));
        assert!(is_upper_snake_case("CODE_123"));
    }

    #[test]
    fn is_upper_snake_case_invalid() {
        assert!(!is_upper_snake_case(""));
        assert!(!is_upper_snake_case("hello"));
        assert!(!is_upper_snake_case("_HELLO"));
        assert!(!is_upper_snake_case("HELLO_"));
        assert!(!is_upper_snake_case("HELLO__WORLD"));
    }
}
