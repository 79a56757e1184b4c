//! Inbound requests and the reply state machine.
//!
//! One [`Request`] value exists per inbound message. It moves through
//! three states:
//!
//! ```text
//! Received ──► Handling ──► Responded (terminal)
//!                 │  ▲
//!                 └──┘  pre-response events
//! ```
//!
//! Exactly one terminal response is allowed; the second terminal call
//! returns [`ServiceError::DoubleReply`] synchronously, and the reply
//! latch is thread-safe so a handler may hand the request to another
//! worker before responding. Events may be emitted any number of times
//! before the response, never after it, and never on get requests.
//!
//! Responses are checked against the request kind at call time; calling
//! [`Request::model`] on a call request is a
//! [`ServiceError::WrongRequestKind`], mirroring how the capability
//! record gates dispatch before a handler ever runs.

use crate::error::ServiceError;
use crate::resource::Resource;
use resly_proto::{
    ChangeValue, CollectionPayload, ModelPayload, Ref, Reply, RequestMeta, ResError,
    TokenPayload,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The kind of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Access request: may the connection read or call the resource?
    Access,
    /// Get request: fetch the resource's model or collection.
    Get,
    /// Call request: invoke a method on the resource.
    Call,
    /// Auth request: authenticate the connection.
    Auth,
    /// Create request: a call with the reserved method `new`.
    New,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Get => write!(f, "get"),
            Self::Call => write!(f, "call"),
            Self::Auth => write!(f, "auth"),
            Self::New => write!(f, "new"),
        }
    }
}

/// An inbound request: decoded message, matched resource, and the reply
/// builder enforcing exactly one terminal response.
pub struct Request {
    kind: RequestKind,
    resource: Resource,
    method: Option<String>,
    meta: RequestMeta,
    reply_to: String,
    replied: AtomicBool,
}

impl Request {
    pub(crate) fn new(
        kind: RequestKind,
        resource: Resource,
        method: Option<String>,
        meta: RequestMeta,
        reply_to: String,
    ) -> Self {
        Self {
            kind,
            resource,
            method,
            meta,
            reply_to,
            replied: AtomicBool::new(false),
        }
    }

    /// The request kind.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The resource name the request targets.
    #[must_use]
    pub fn rid(&self) -> &str {
        self.resource.rid()
    }

    /// The matched resource, carrying the event emitters.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The called method, for call and auth requests.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Connection id of the requesting client.
    #[must_use]
    pub fn cid(&self) -> &str {
        &self.meta.cid
    }

    /// Raw request parameters; `Null` when the client sent none.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.meta.params
    }

    /// Raw access token; `Null` when the connection carries none.
    #[must_use]
    pub fn token(&self) -> &Value {
        &self.meta.token
    }

    /// Query part of the resource id, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.meta.query
    }

    /// HTTP headers forwarded by the gateway, when present.
    #[must_use]
    pub fn header(&self) -> Option<&HashMap<String, Vec<String>>> {
        self.meta.header.as_ref()
    }

    /// HTTP host forwarded by the gateway, when present.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.meta.host.as_deref()
    }

    /// Client network address, when present.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.meta.remote_addr.as_deref()
    }

    /// Client HTTP request URI, when present.
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.meta.uri.as_deref()
    }

    /// A parameter captured from the resource name by the pattern.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.resource.path_param(name)
    }

    /// Decodes the request parameters into a concrete type.
    ///
    /// # Errors
    ///
    /// A decode failure maps to `system.invalidParams`, so `?` inside a
    /// handler turns bad parameters into the proper protocol reply.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(self.meta.params.clone()).map_err(|e| {
            ServiceError::Protocol(ResError::invalid_params().with_message(e.to_string()))
        })
    }

    /// Decodes the access token into a concrete type.
    ///
    /// # Errors
    ///
    /// A decode failure maps to `system.accessDenied`: a token the
    /// service cannot read grants nothing.
    pub fn parse_token<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(self.meta.token.clone())
            .map_err(|_| ServiceError::Protocol(ResError::access_denied()))
    }

    pub(crate) fn replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Terminal responses
    // ------------------------------------------------------------------

    /// Replies `{"result":null}` to a call or auth request.
    pub fn ok(&self) -> Result<(), ServiceError> {
        self.require_kind("ok", &[RequestKind::Call, RequestKind::Auth])?;
        self.send_reply(Reply::Result(Value::Null))
    }

    /// Replies `{"result": value}` to a call or auth request.
    pub fn ok_value(&self, value: Value) -> Result<(), ServiceError> {
        self.require_kind("ok_value", &[RequestKind::Call, RequestKind::Auth])?;
        self.send_reply(Reply::Result(value))
    }

    /// Replies with a protocol error.
    pub fn error(&self, err: ResError) -> Result<(), ServiceError> {
        self.send_reply(Reply::Error(err))
    }

    /// Replies `system.notFound`.
    pub fn not_found(&self) -> Result<(), ServiceError> {
        self.error(ResError::not_found())
    }

    /// Replies `system.methodNotFound`.
    pub fn method_not_found(&self) -> Result<(), ServiceError> {
        self.error(ResError::method_not_found())
    }

    /// Replies `system.invalidParams`, with the standard message when
    /// `message` is `None`.
    pub fn invalid_params(&self, message: Option<&str>) -> Result<(), ServiceError> {
        let mut err = ResError::invalid_params();
        if let Some(message) = message {
            err = err.with_message(message);
        }
        self.error(err)
    }

    /// Replies `system.invalidQuery`, with the standard message when
    /// `message` is `None`.
    pub fn invalid_query(&self, message: Option<&str>) -> Result<(), ServiceError> {
        let mut err = ResError::invalid_query();
        if let Some(message) = message {
            err = err.with_message(message);
        }
        self.error(err)
    }

    /// Grants an access request read access and the given call methods
    /// (`"*"` for all, `""` for none).
    pub fn access(&self, get: bool, call: &str) -> Result<(), ServiceError> {
        self.require_kind("access", &[RequestKind::Access])?;
        let mut result = serde_json::Map::new();
        result.insert("get".to_string(), Value::Bool(get));
        if !call.is_empty() {
            result.insert("call".to_string(), Value::String(call.to_string()));
        }
        self.send_reply(Reply::Result(Value::Object(result)))
    }

    /// Grants full access: get and every call method.
    pub fn access_granted(&self) -> Result<(), ServiceError> {
        self.access(true, "*")
    }

    /// Denies an access request.
    pub fn access_denied(&self) -> Result<(), ServiceError> {
        self.require_kind("access_denied", &[RequestKind::Access])?;
        self.error(ResError::access_denied())
    }

    /// Replies to a get request with a model.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] when the handler declares the
    /// resource a collection.
    pub fn model(&self, model: Value) -> Result<(), ServiceError> {
        self.require_kind("model", &[RequestKind::Get])?;
        if self.resource.handler().resource_type() == crate::ResourceType::Collection {
            return Err(ServiceError::WrongResourceType {
                rid: self.rid().to_string(),
                expected: "model",
            });
        }
        let payload = serde_json::to_value(ModelPayload { model })?;
        self.send_reply(Reply::Result(payload))
    }

    /// Replies to a get request with a collection.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] when the handler declares the
    /// resource a model.
    pub fn collection(&self, collection: Value) -> Result<(), ServiceError> {
        self.require_kind("collection", &[RequestKind::Get])?;
        if self.resource.handler().resource_type() == crate::ResourceType::Model {
            return Err(ServiceError::WrongResourceType {
                rid: self.rid().to_string(),
                expected: "collection",
            });
        }
        let payload = serde_json::to_value(CollectionPayload { collection })?;
        self.send_reply(Reply::Result(payload))
    }

    /// Replies to a call or auth request with a resource reference,
    /// `{"resource": {"rid": ...}}`.
    pub fn resource_ref(&self, re: Ref) -> Result<(), ServiceError> {
        self.require_kind("resource_ref", &[RequestKind::Call, RequestKind::Auth])?;
        self.require_valid_ref(&re)?;
        self.send_reply(Reply::Resource(re))
    }

    /// Replies to a create (`call` method `new`) request with the
    /// reference of the created resource, in the legacy
    /// `{"result": {"rid": ...}}` envelope.
    pub fn new_resource(&self, re: Ref) -> Result<(), ServiceError> {
        self.require_kind("new_resource", &[RequestKind::New])?;
        self.require_valid_ref(&re)?;
        let payload = serde_json::to_value(&re)?;
        self.send_reply(Reply::Result(payload))
    }

    /// Sends the advisory `timeout:"<ms>"` preamble, extending the
    /// gateway's wait for the terminal response. Not itself a response.
    ///
    /// # Errors
    ///
    /// [`ServiceError::DoubleReply`] when the response is already sent.
    pub fn timeout(&self, duration: Duration) -> Result<(), ServiceError> {
        if self.replied() {
            return Err(ServiceError::DoubleReply(self.rid().to_string()));
        }
        self.resource
            .service()
            .publish(&self.reply_to, resly_proto::timeout_preamble(duration))
    }

    // ------------------------------------------------------------------
    // Pre-response events
    // ------------------------------------------------------------------

    /// Emits a change event ahead of the response. See
    /// [`Resource::change_event`].
    pub fn change_event(&self, values: HashMap<String, ChangeValue>) -> Result<(), ServiceError> {
        self.require_event("change_event")?;
        self.resource.change_event(values)
    }

    /// Emits an add event ahead of the response. See
    /// [`Resource::add_event`].
    pub fn add_event(&self, value: Value, idx: usize) -> Result<(), ServiceError> {
        self.require_event("add_event")?;
        self.resource.add_event(value, idx)
    }

    /// Emits a remove event ahead of the response. See
    /// [`Resource::remove_event`].
    pub fn remove_event(&self, idx: usize) -> Result<(), ServiceError> {
        self.require_event("remove_event")?;
        self.resource.remove_event(idx)
    }

    /// Emits a create event ahead of the response. See
    /// [`Resource::create_event`].
    pub fn create_event(&self, data: Value) -> Result<(), ServiceError> {
        self.require_event("create_event")?;
        self.resource.create_event(data)
    }

    /// Emits a delete event ahead of the response. See
    /// [`Resource::delete_event`].
    pub fn delete_event(&self) -> Result<(), ServiceError> {
        self.require_event("delete_event")?;
        self.resource.delete_event()
    }

    /// Emits a custom event ahead of the response. See
    /// [`Resource::custom_event`].
    pub fn custom_event(&self, name: &str, payload: Value) -> Result<(), ServiceError> {
        self.require_event("custom_event")?;
        self.resource.custom_event(name, payload)
    }

    /// Opens a query-event window ahead of the response. See
    /// [`Resource::query_event`].
    pub fn query_event<F>(&self, cb: F) -> Result<(), ServiceError>
    where
        F: Fn(&mut crate::QueryRequest) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.require_event("query_event")?;
        self.resource.query_event(cb)
    }

    /// Sets or clears (with `Null`) the requesting connection's token.
    /// Only auth handlers may do this; other handlers go through
    /// [`Service::token_event`](crate::Service::token_event).
    pub fn token_event(&self, token: Value) -> Result<(), ServiceError> {
        self.require_kind("token_event", &[RequestKind::Auth])?;
        let subject = format!("conn.{}.token", self.cid());
        let payload = serde_json::to_vec(&TokenPayload { token })?;
        self.resource.service().publish(&subject, payload)
    }

    // ------------------------------------------------------------------

    fn require_valid_ref(&self, re: &Ref) -> Result<(), ServiceError> {
        if re.is_valid() {
            Ok(())
        } else {
            Err(ServiceError::InvalidArgument(format!(
                "invalid resource reference '{}'",
                re.rid()
            )))
        }
    }

    fn require_kind(
        &self,
        operation: &'static str,
        allowed: &[RequestKind],
    ) -> Result<(), ServiceError> {
        if allowed.contains(&self.kind) {
            Ok(())
        } else {
            Err(ServiceError::WrongRequestKind { operation, kind: self.kind })
        }
    }

    fn require_event(&self, operation: &'static str) -> Result<(), ServiceError> {
        if self.kind == RequestKind::Get {
            return Err(ServiceError::WrongRequestKind { operation, kind: self.kind });
        }
        if self.replied() {
            return Err(ServiceError::EventAfterResponse(self.rid().to_string()));
        }
        Ok(())
    }

    fn send_reply(&self, reply: Reply) -> Result<(), ServiceError> {
        // Serialize before taking the latch: a serialization failure
        // leaves the request unanswered so the engine can still reply.
        let bytes = reply.to_bytes()?;
        if self.replied.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::DoubleReply(self.rid().to_string()));
        }
        self.resource.service().publish(&self.reply_to, bytes)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("rid", &self.rid())
            .field("method", &self.method)
            .field("cid", &self.meta.cid)
            .field("replied", &self.replied())
            .finish()
    }
}
