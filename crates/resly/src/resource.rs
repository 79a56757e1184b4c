//! Resource references and event emitters.
//!
//! A [`Resource`] is a resolved resource name: the name itself, the
//! parameters captured by the router, and the matched handler. It exposes
//! the event side of the protocol (change, add, remove, create, delete,
//! custom and query events) without any response methods, so it can be
//! used both inside a request and out-of-band through
//! [`Service::with`](crate::Service::with).
//!
//! Events are published immediately, on `event.<name>.<event>`. Ordering
//! against other work on the same resource is guaranteed by the
//! per-resource queue the caller is running on, not by buffering.
//!
//! A bus publish failure is logged and swallowed: events are best-effort
//! and gateways recover through `system.reset`. Validation failures (a
//! change event on a collection, a reserved custom event name) and apply
//! hook failures are returned to the caller.

use crate::error::ServiceError;
use crate::handler::{Handler, ResourceType};
use crate::query::QueryRequest;
use crate::router::Match;
use crate::service::Service;
use resly_proto::{
    AddPayload, ChangePayload, ChangeValue, CreatePayload, DeletePayload, RemovePayload,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Event names with protocol-defined meaning; custom events must not use
/// them.
const RESERVED_EVENTS: &[&str] = &[
    "change", "add", "remove", "create", "delete", "patch", "query", "reaccess", "unsubscribe",
];

/// A resolved resource: name, captured parameters and handler.
#[derive(Clone)]
pub struct Resource {
    service: Service,
    rid: String,
    query: String,
    params: HashMap<String, String>,
    handler: Arc<Handler>,
    group: Option<String>,
    pattern: String,
}

impl Resource {
    pub(crate) fn from_match(service: Service, rid: String, query: String, m: Match) -> Self {
        Self {
            service,
            rid,
            query,
            params: m.params,
            handler: m.handler,
            group: m.group,
            pattern: m.pattern,
        }
    }

    /// The resource name, without any query part.
    #[must_use]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    /// The query part of the resource id, without the leading `?`.
    /// Empty for non-query resources.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The canonical pattern the name matched.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// A parameter captured from the resource name.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All captured parameters.
    #[must_use]
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// The owning service.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub(crate) fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    /// The serialization key: the resolved group label when the handler
    /// declares one, otherwise the resource name.
    pub(crate) fn work_key(&self) -> &str {
        match &self.group {
            Some(group) if !group.is_empty() => group,
            _ => &self.rid,
        }
    }

    /// Emits a change event, `{"values": {...}}`, on this model.
    ///
    /// Use [`ChangeValue::Delete`] as a value to drop a field. An empty
    /// change set emits nothing. When the handler declares an
    /// `apply_change` hook, the hook runs first; a hook reporting an
    /// empty revert set marks the change a no-op and suppresses the
    /// event.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] when the handler declares the
    /// resource a collection; any error the apply hook returns.
    pub fn change_event(&self, values: HashMap<String, ChangeValue>) -> Result<(), ServiceError> {
        if self.handler.resource_type() == ResourceType::Collection {
            return Err(self.wrong_type("model"));
        }
        if values.is_empty() {
            return Ok(());
        }
        if let Some(hook) = self.handler.apply_change_handler() {
            let reverted = hook(self, &values)?;
            if reverted.is_empty() {
                return Ok(());
            }
        }
        self.publish_event("change", &serde_json::to_vec(&ChangePayload { values })?);
        Ok(())
    }

    /// Emits an add event, `{"value": v, "idx": n}`, on this collection.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] when the handler declares the
    /// resource a model; any error the apply hook returns.
    pub fn add_event(&self, value: Value, idx: usize) -> Result<(), ServiceError> {
        if self.handler.resource_type() == ResourceType::Model {
            return Err(self.wrong_type("collection"));
        }
        if let Some(hook) = self.handler.apply_add_handler() {
            hook(self, &value, idx)?;
        }
        self.publish_event("add", &serde_json::to_vec(&AddPayload { value, idx })?);
        Ok(())
    }

    /// Emits a remove event, `{"idx": n}`, on this collection.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Resource::add_event`].
    pub fn remove_event(&self, idx: usize) -> Result<(), ServiceError> {
        if self.handler.resource_type() == ResourceType::Model {
            return Err(self.wrong_type("collection"));
        }
        if let Some(hook) = self.handler.apply_remove_handler() {
            hook(self, idx)?;
        }
        self.publish_event("remove", &serde_json::to_vec(&RemovePayload { idx })?);
        Ok(())
    }

    /// Emits a create event, `{"data": v}`, marking this resource as
    /// brought into existence.
    pub fn create_event(&self, data: Value) -> Result<(), ServiceError> {
        if let Some(hook) = self.handler.apply_create_handler() {
            hook(self, &data)?;
        }
        self.publish_event("create", &serde_json::to_vec(&CreatePayload { data })?);
        Ok(())
    }

    /// Emits a delete event, `{}`, marking this resource as gone.
    pub fn delete_event(&self) -> Result<(), ServiceError> {
        if let Some(hook) = self.handler.apply_delete_handler() {
            hook(self)?;
        }
        self.publish_event("delete", &serde_json::to_vec(&DeletePayload {})?);
        Ok(())
    }

    /// Emits a custom event with an arbitrary payload.
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidArgument`] when the name is malformed or
    /// reserved by the protocol; any error the apply hook returns.
    pub fn custom_event(&self, name: &str, payload: Value) -> Result<(), ServiceError> {
        if !crate::router::is_valid_token(name) {
            return Err(ServiceError::InvalidArgument(format!(
                "invalid event name '{name}'"
            )));
        }
        if RESERVED_EVENTS.contains(&name) {
            return Err(ServiceError::InvalidArgument(format!(
                "event name '{name}' is reserved by the protocol"
            )));
        }
        if let Some(hook) = self.handler.apply_custom_handler() {
            hook(self, name, &payload)?;
        }
        self.publish_event(name, &serde_json::to_vec(&payload)?);
        Ok(())
    }

    /// Opens a query-event window: publishes a `query` event referencing
    /// a transient subject and answers query requests on it with the
    /// events `cb` enumerates, until the service's query duration
    /// expires.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Conn`] when the service is not serving.
    pub fn query_event<F>(&self, cb: F) -> Result<(), ServiceError>
    where
        F: Fn(&mut QueryRequest) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.service.open_query(self, Arc::new(cb))
    }

    /// Publishes on `event.<rid>.<name>`, logging failures. Events are
    /// best-effort; gateways resynchronize through `system.reset`.
    fn publish_event(&self, name: &str, payload: &[u8]) {
        let subject = format!("event.{}.{}", self.rid, name);
        if let Err(e) = self.service.publish(&subject, payload.to_vec()) {
            warn!("dropping event '{}': {}", subject, e);
        }
    }

    fn wrong_type(&self, expected: &'static str) -> ServiceError {
        ServiceError::WrongResourceType { rid: self.rid.clone(), expected }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("rid", &self.rid)
            .field("query", &self.query)
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish()
    }
}
