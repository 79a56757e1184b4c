//! Reply envelopes and resource references.
//!
//! Every request gets exactly one reply on the message's reply subject.
//! The reply is one of three envelopes:
//!
//! ```text
//! {"result": <value>}            success
//! {"resource": {"rid": "..."}}   resource response (call/auth)
//! {"error": {"code": ...}}       protocol error
//! ```
//!
//! A service may additionally send the raw pre-reply `timeout:"<ms>"`
//! advisory on the same subject to extend the gateway's wait.

use crate::ResError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

/// A reference to a resource, serialized as `{"rid": "..."}`.
///
/// Used as the resource reply envelope member and as a value inside
/// collections and models.
///
/// # Example
///
/// ```
/// use resly_proto::Ref;
///
/// let r = Ref::new("library.book.42");
/// assert!(r.is_valid());
/// assert_eq!(
///     serde_json::to_value(&r).unwrap(),
///     serde_json::json!({"rid": "library.book.42"})
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref(pub String);

impl Ref {
    /// Creates a reference to the named resource.
    #[must_use]
    pub fn new(rid: impl Into<String>) -> Self {
        Self(rid.into())
    }

    /// Returns the referenced resource name.
    #[must_use]
    pub fn rid(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the reference names a well-formed resource:
    /// non-empty dot-separated tokens before an optional `?query` part,
    /// with no wildcard or whitespace characters.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let name = self.0.split('?').next().unwrap_or("");
        !name.is_empty()
            && name.split('.').all(|tok| {
                !tok.is_empty() && !tok.contains(['*', '>', ' ', '\t', '\n'])
            })
    }
}

impl Serialize for Ref {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            rid: &'a str,
        }
        Wire { rid: &self.0 }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ref {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            rid: String,
        }
        let wire = Wire::deserialize(deserializer)?;
        if wire.rid.is_empty() {
            return Err(D::Error::custom("empty rid"));
        }
        Ok(Self(wire.rid))
    }
}

/// One reply envelope, externally tagged the way the protocol expects.
///
/// ```
/// use resly_proto::{Reply, Ref};
///
/// let reply = Reply::Result(serde_json::Value::Null);
/// assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"result":null}"#);
///
/// let reply = Reply::Resource(Ref::new("library.book.42"));
/// assert_eq!(
///     serde_json::to_string(&reply).unwrap(),
///     r#"{"resource":{"rid":"library.book.42"}}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    /// Successful result value.
    Result(Value),
    /// Reference to a resource.
    Resource(Ref),
    /// Protocol error.
    Error(ResError),
}

impl Reply {
    /// Serializes the envelope to its wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Encodes the raw `timeout:"<ms>"` pre-reply advisory.
///
/// This is not JSON; the gateway parses the literal prefix.
///
/// ```
/// use resly_proto::timeout_preamble;
/// use std::time::Duration;
///
/// assert_eq!(timeout_preamble(Duration::from_secs(12)), b"timeout:\"12000\"");
/// ```
#[must_use]
pub fn timeout_preamble(duration: Duration) -> Vec<u8> {
    format!("timeout:\"{}\"", duration.as_millis()).into_bytes()
}
