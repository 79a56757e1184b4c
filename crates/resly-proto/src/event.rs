//! Event payloads.
//!
//! Every resource event is published on `event.<resource>.<name>` with a
//! payload determined by its kind:
//!
//! | Event | Payload |
//! |-------|---------|
//! | `change` | `{"values": {field: value-or-delete-action}}` |
//! | `add` | `{"value": v, "idx": n}` |
//! | `remove` | `{"idx": n}` |
//! | `create` | `{"data": v}` |
//! | `delete` | `{}` |
//! | `query` | `{"subject": s}` |
//! | custom | arbitrary JSON |
//!
//! Connection token events go on `conn.<cid>.token` with
//! [`TokenPayload`], and a system reset goes on `system.reset` with
//! [`ResetPayload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A field value inside a change event.
///
/// [`ChangeValue::Delete`] is the delete-action sentinel; it serializes to
/// the literal `{"action":"delete"}`, instructing the gateway to drop the
/// field from its cached model.
///
/// # Example
///
/// ```
/// use resly_proto::ChangeValue;
///
/// let v = ChangeValue::from(serde_json::json!(7));
/// assert_eq!(serde_json::to_string(&v).unwrap(), "7");
///
/// let del = ChangeValue::Delete;
/// assert_eq!(serde_json::to_string(&del).unwrap(), r#"{"action":"delete"}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    /// New value for the field.
    Value(Value),
    /// Delete-action sentinel removing the field.
    Delete,
}

impl Serialize for ChangeValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Delete => {
                #[derive(Serialize)]
                struct Action {
                    action: &'static str,
                }
                Action { action: "delete" }.serialize(serializer)
            }
        }
    }
}

impl From<Value> for ChangeValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Payload of a `change` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangePayload {
    /// Changed fields mapped to their new values or the delete action.
    pub values: HashMap<String, ChangeValue>,
}

/// Payload of an `add` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddPayload {
    /// The added value.
    pub value: Value,
    /// Zero-based insertion position.
    pub idx: usize,
}

/// Payload of a `remove` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovePayload {
    /// Zero-based removal position.
    pub idx: usize,
}

/// Payload of a `create` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePayload {
    /// The created resource's data.
    pub data: Value,
}

/// Payload of a `delete` event. Serializes to the empty object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {}

/// Payload of a `query` event, referencing the transient subject on which
/// the service answers query requests for a bounded window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPayload {
    /// Transient subject to send query requests to.
    pub subject: String,
}

/// Payload of a query request arriving on a transient query subject.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequestPayload {
    /// Query to enumerate events for.
    #[serde(default)]
    pub query: String,
}

/// One event inside a query response, `{"event": name, "data": payload}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEntry {
    /// Event name, e.g. `change`, `add`, `remove`.
    pub event: String,
    /// Event payload, omitted when the event carries none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result payload of a query response, `{"events": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResultPayload {
    /// Events that occurred within the query window, in order.
    pub events: Vec<EventEntry>,
}

/// Payload of a connection token event on `conn.<cid>.token`.
///
/// A `null` token clears the connection's token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// The access token, or `null` to clear it.
    pub token: Value,
}

/// Payload of a `system.reset` event.
///
/// Instructs gateways to invalidate cached state for matching patterns.
/// Empty lists are allowed on the wire; the service suppresses the event
/// entirely when both are empty at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPayload {
    /// Resource patterns whose data may have changed.
    pub resources: Vec<String>,
    /// Patterns whose access permissions may have changed.
    pub access: Vec<String>,
}

impl ResetPayload {
    /// Returns `true` if both pattern lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.access.is_empty()
    }
}

/// Result payload of a get response for a model resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPayload {
    /// The model's fields.
    pub model: Value,
}

/// Result payload of a get response for a collection resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionPayload {
    /// The collection's values, in order.
    pub collection: Value,
}
