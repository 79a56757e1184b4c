//! Query-event buffer.
//!
//! A query event invites the gateway to re-ask the service, on a
//! short-lived subject, which events a given query saw. The flow:
//!
//! ```text
//! handler ── query_event(cb) ──► service
//!   1. subscribe transient subject
//!   2. publish event.<rid>.query {"subject": s}
//!   3. retain (subject → cb) for the query duration
//!
//! gateway ── {"query": "..."} on s ──► cb enumerates events
//!   reply {"result": {"events": [...]}}
//!
//! duration elapses ──► unsubscribe, drop cb
//! ```
//!
//! Expiration tears the subscription down before the callback is
//! released, so a query message can never reach a dropped callback.
//! Inbound query requests are scheduled on the resource's serialized
//! queue, keeping them ordered against the resource's other work.

use crate::conn::Subscription;
use crate::error::ServiceError;
use crate::handler::ResourceType;
use crate::resource::Resource;
use parking_lot::Mutex;
use resly_proto::{AddPayload, ChangePayload, ChangeValue, EventEntry, RemovePayload};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback enumerating the events a query saw.
pub(crate) type QueryFn = Arc<dyn Fn(&mut QueryRequest) -> Result<(), ServiceError> + Send + Sync>;

/// A query request arriving on a transient query subject.
///
/// The handler-supplied callback inspects [`QueryRequest::query`] and
/// records, in order, the events that apply to it. Returning a
/// [`ServiceError::Protocol`] replies that error instead (e.g.
/// `system.notFound` when the queried resource is gone).
pub struct QueryRequest {
    rid: String,
    query: String,
    resource_type: ResourceType,
    events: Vec<EventEntry>,
}

impl QueryRequest {
    pub(crate) fn new(rid: String, query: String, resource_type: ResourceType) -> Self {
        Self { rid, query, resource_type, events: Vec::new() }
    }

    /// The queried resource's name.
    #[must_use]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    /// The query to enumerate events for.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Records a change event for this query.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] on a collection resource.
    pub fn change_event(&mut self, values: HashMap<String, ChangeValue>) -> Result<(), ServiceError> {
        if self.resource_type == ResourceType::Collection {
            return Err(self.wrong_type("model"));
        }
        if values.is_empty() {
            return Ok(());
        }
        self.push("change", serde_json::to_value(ChangePayload { values })?);
        Ok(())
    }

    /// Records an add event for this query.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] on a model resource.
    pub fn add_event(&mut self, value: Value, idx: usize) -> Result<(), ServiceError> {
        if self.resource_type == ResourceType::Model {
            return Err(self.wrong_type("collection"));
        }
        self.push("add", serde_json::to_value(AddPayload { value, idx })?);
        Ok(())
    }

    /// Records a remove event for this query.
    ///
    /// # Errors
    ///
    /// [`ServiceError::WrongResourceType`] on a model resource.
    pub fn remove_event(&mut self, idx: usize) -> Result<(), ServiceError> {
        if self.resource_type == ResourceType::Model {
            return Err(self.wrong_type("collection"));
        }
        self.push("remove", serde_json::to_value(RemovePayload { idx })?);
        Ok(())
    }

    pub(crate) fn into_events(self) -> Vec<EventEntry> {
        self.events
    }

    fn push(&mut self, event: &str, data: Value) {
        self.events.push(EventEntry { event: event.to_string(), data: Some(data) });
    }

    fn wrong_type(&self, expected: &'static str) -> ServiceError {
        ServiceError::WrongResourceType { rid: self.rid.clone(), expected }
    }
}

struct QueryEntry {
    resource: Resource,
    cb: QueryFn,
    sub: Box<dyn Subscription>,
}

/// Live query-event windows, keyed by their transient subject.
pub(crate) struct QueryRegistry {
    entries: Mutex<HashMap<String, QueryEntry>>,
}

impl QueryRegistry {
    pub(crate) fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn insert(
        &self,
        subject: String,
        resource: Resource,
        cb: QueryFn,
        sub: Box<dyn Subscription>,
    ) {
        self.entries.lock().insert(subject, QueryEntry { resource, cb, sub });
    }

    /// Resolves an inbound subject to its query window, if one is open.
    pub(crate) fn lookup(&self, subject: &str) -> Option<(Resource, QueryFn)> {
        let entries = self.entries.lock();
        let entry = entries.get(subject)?;
        Some((entry.resource.clone(), Arc::clone(&entry.cb)))
    }

    /// Closes one window: unsubscribes, then drops the callback.
    pub(crate) fn expire(&self, subject: &str) {
        let entry = self.entries.lock().remove(subject);
        if let Some(entry) = entry {
            debug!("query window on '{}' expired for '{}'", subject, entry.resource.rid());
            if let Err(e) = entry.sub.unsubscribe() {
                warn!("failed to unsubscribe query subject '{}': {}", subject, e);
            }
        }
    }

    /// Closes every window. Used at shutdown.
    pub(crate) fn clear(&self) {
        let entries: Vec<(String, QueryEntry)> = self.entries.lock().drain().collect();
        for (subject, entry) in entries {
            if let Err(e) = entry.sub.unsubscribe() {
                warn!("failed to unsubscribe query subject '{}': {}", subject, e);
            }
        }
    }

    /// Number of open windows.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
