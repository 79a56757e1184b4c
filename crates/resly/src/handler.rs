//! Handler capability model.
//!
//! A [`Handler`] is an explicit capability record: a value listing the
//! request kinds a resource supports and, for call and auth, a map of
//! method name to callback. The dispatcher checks the record before any
//! callback runs, so a missing capability is answered without touching
//! application code:
//!
//! | Request | Required capability | If absent |
//! |---------|--------------------|-----------|
//! | access  | [`Handler::access`] | granted (or denied, if configured) |
//! | get     | [`Handler::get`] | `system.notFound` |
//! | call    | [`Handler::call`] method | `system.methodNotFound` |
//! | auth    | [`Handler::auth`] method | `system.methodNotFound` |
//! | call `new` | [`Handler::on_new`] | `system.methodNotFound` |
//!
//! Method names are matched case-insensitively. The method name `new` is
//! reserved for the `on_new` capability and cannot be registered as a
//! plain call method.
//!
//! # Example
//!
//! ```
//! use resly::Handler;
//!
//! let handler = Handler::new()
//!     .model()
//!     .access(|r| r.access_granted())
//!     .get(|r| r.model(serde_json::json!({ "name": "resly" })))
//!     .call("rename", |r| {
//!         // mutate, emit a change event, then reply
//!         r.ok()
//!     });
//! ```

use crate::error::ServiceError;
use crate::request::Request;
use crate::resource::Resource;
use crate::router;
use resly_proto::ChangeValue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with an inbound request.
pub type RequestHandler = Arc<dyn Fn(&Request) -> Result<(), ServiceError> + Send + Sync>;

/// Hook applying a change event to the application's store.
///
/// Returns the reverted values (old value per changed field). An empty
/// revert set marks the change as a no-op and suppresses the event.
pub type ApplyChangeHandler = Arc<
    dyn Fn(&Resource, &HashMap<String, ChangeValue>) -> Result<HashMap<String, Value>, ServiceError>
        + Send
        + Sync,
>;

/// Hook applying an add event to the application's store.
pub type ApplyAddHandler =
    Arc<dyn Fn(&Resource, &Value, usize) -> Result<(), ServiceError> + Send + Sync>;

/// Hook applying a remove event to the application's store.
pub type ApplyRemoveHandler =
    Arc<dyn Fn(&Resource, usize) -> Result<(), ServiceError> + Send + Sync>;

/// Hook applying a create event to the application's store.
pub type ApplyCreateHandler =
    Arc<dyn Fn(&Resource, &Value) -> Result<(), ServiceError> + Send + Sync>;

/// Hook applying a delete event to the application's store.
pub type ApplyDeleteHandler = Arc<dyn Fn(&Resource) -> Result<(), ServiceError> + Send + Sync>;

/// Hook applying a custom event to the application's store.
pub type ApplyCustomHandler =
    Arc<dyn Fn(&Resource, &str, &Value) -> Result<(), ServiceError> + Send + Sync>;

/// Declared type of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceType {
    /// Type not declared; both model and collection responses are allowed.
    #[default]
    Unspecified,
    /// A model: named fields, mutated through change events.
    Model,
    /// A collection: ordered values, mutated through add/remove events.
    Collection,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Model => write!(f, "model"),
            Self::Collection => write!(f, "collection"),
        }
    }
}

/// Capability record for one registered pattern.
///
/// Built with chained methods; registered with
/// [`Service::handle`](crate::Service::handle). Registering the same call
/// or auth method twice keeps the last callback.
#[derive(Clone, Default)]
pub struct Handler {
    resource_type: ResourceType,
    access: Option<RequestHandler>,
    get: Option<RequestHandler>,
    calls: HashMap<String, RequestHandler>,
    auths: HashMap<String, RequestHandler>,
    new: Option<RequestHandler>,
    apply_change: Option<ApplyChangeHandler>,
    apply_add: Option<ApplyAddHandler>,
    apply_remove: Option<ApplyRemoveHandler>,
    apply_create: Option<ApplyCreateHandler>,
    apply_delete: Option<ApplyDeleteHandler>,
    apply_custom: Option<ApplyCustomHandler>,
    group: Option<String>,
}

impl Handler {
    /// Creates an empty capability record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the resource a model.
    #[must_use]
    pub fn model(mut self) -> Self {
        self.resource_type = ResourceType::Model;
        self
    }

    /// Declares the resource a collection.
    #[must_use]
    pub fn collection(mut self) -> Self {
        self.resource_type = ResourceType::Collection;
        self
    }

    /// Declares the access capability.
    #[must_use]
    pub fn access<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.access = Some(Arc::new(f));
        self
    }

    /// Declares the get capability.
    #[must_use]
    pub fn get<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(f));
        self
    }

    /// Declares a call method.
    #[must_use]
    pub fn call<F>(mut self, method: &str, f: F) -> Self
    where
        F: Fn(&Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.calls.insert(method.to_ascii_lowercase(), Arc::new(f));
        self
    }

    /// Declares an auth method.
    #[must_use]
    pub fn auth<F>(mut self, method: &str, f: F) -> Self
    where
        F: Fn(&Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.auths.insert(method.to_ascii_lowercase(), Arc::new(f));
        self
    }

    /// Declares the new capability, handling `call` requests with the
    /// reserved method `new` to create resources via RPC.
    #[must_use]
    pub fn on_new<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.new = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before a change event is published.
    #[must_use]
    pub fn apply_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource, &HashMap<String, ChangeValue>) -> Result<HashMap<String, Value>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.apply_change = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before an add event is published.
    #[must_use]
    pub fn apply_add<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource, &Value, usize) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.apply_add = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before a remove event is published.
    #[must_use]
    pub fn apply_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource, usize) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.apply_remove = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before a create event is published.
    #[must_use]
    pub fn apply_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource, &Value) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.apply_create = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before a delete event is published.
    #[must_use]
    pub fn apply_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.apply_delete = Some(Arc::new(f));
        self
    }

    /// Installs the hook run before a custom event is published.
    #[must_use]
    pub fn apply_custom<F>(mut self, f: F) -> Self
    where
        F: Fn(&Resource, &str, &Value) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.apply_custom = Some(Arc::new(f));
        self
    }

    /// Sets the serialization group label.
    ///
    /// When non-empty, work for all resources resolving to the same label
    /// (after `${param}` substitution) is serialized on one queue instead
    /// of one queue per resource name.
    #[must_use]
    pub fn group(mut self, label: &str) -> Self {
        self.group = Some(label.to_string());
        self
    }

    /// Returns the declared resource type.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub(crate) fn has_access(&self) -> bool {
        self.access.is_some()
    }

    pub(crate) fn has_get(&self) -> bool {
        self.get.is_some()
    }

    pub(crate) fn has_call(&self) -> bool {
        !self.calls.is_empty() || self.new.is_some()
    }

    pub(crate) fn has_auth(&self) -> bool {
        !self.auths.is_empty()
    }

    pub(crate) fn access_handler(&self) -> Option<&RequestHandler> {
        self.access.as_ref()
    }

    pub(crate) fn get_handler(&self) -> Option<&RequestHandler> {
        self.get.as_ref()
    }

    pub(crate) fn call_handler(&self, method: &str) -> Option<&RequestHandler> {
        self.calls.get(&method.to_ascii_lowercase())
    }

    pub(crate) fn auth_handler(&self, method: &str) -> Option<&RequestHandler> {
        self.auths.get(&method.to_ascii_lowercase())
    }

    pub(crate) fn new_handler(&self) -> Option<&RequestHandler> {
        self.new.as_ref()
    }

    pub(crate) fn apply_change_handler(&self) -> Option<&ApplyChangeHandler> {
        self.apply_change.as_ref()
    }

    pub(crate) fn apply_add_handler(&self) -> Option<&ApplyAddHandler> {
        self.apply_add.as_ref()
    }

    pub(crate) fn apply_remove_handler(&self) -> Option<&ApplyRemoveHandler> {
        self.apply_remove.as_ref()
    }

    pub(crate) fn apply_create_handler(&self) -> Option<&ApplyCreateHandler> {
        self.apply_create.as_ref()
    }

    pub(crate) fn apply_delete_handler(&self) -> Option<&ApplyDeleteHandler> {
        self.apply_delete.as_ref()
    }

    pub(crate) fn apply_custom_handler(&self) -> Option<&ApplyCustomHandler> {
        self.apply_custom.as_ref()
    }

    pub(crate) fn group_label(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }

    /// Checks declared method names. Called at registration, before the
    /// handler enters the router.
    pub(crate) fn validate(&self) -> Result<(), ServiceError> {
        for method in self.calls.keys() {
            if method == "new" {
                return Err(ServiceError::InvalidArgument(
                    "call method 'new' is reserved; declare it with on_new".into(),
                ));
            }
            if !router::is_valid_token(method) {
                return Err(ServiceError::InvalidArgument(format!(
                    "invalid call method name '{method}'"
                )));
            }
        }
        for method in self.auths.keys() {
            if !router::is_valid_token(method) {
                return Err(ServiceError::InvalidArgument(format!(
                    "invalid auth method name '{method}'"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut calls: Vec<&str> = self.calls.keys().map(String::as_str).collect();
        calls.sort_unstable();
        let mut auths: Vec<&str> = self.auths.keys().map(String::as_str).collect();
        auths.sort_unstable();
        f.debug_struct("Handler")
            .field("resource_type", &self.resource_type)
            .field("access", &self.access.is_some())
            .field("get", &self.get.is_some())
            .field("calls", &calls)
            .field("auths", &auths)
            .field("new", &self.new.is_some())
            .field("group", &self.group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_capabilities() {
        let handler = Handler::new();
        assert_eq!(handler.resource_type(), ResourceType::Unspecified);
        assert!(!handler.has_access());
        assert!(!handler.has_get());
        assert!(!handler.has_call());
        assert!(!handler.has_auth());
    }

    #[test]
    fn capability_flags() {
        let handler = Handler::new()
            .model()
            .access(|r| r.access_granted())
            .get(|r| r.model(serde_json::json!({})))
            .call("set", |r| r.ok());

        assert_eq!(handler.resource_type(), ResourceType::Model);
        assert!(handler.has_access());
        assert!(handler.has_get());
        assert!(handler.has_call());
        assert!(!handler.has_auth());
    }

    #[test]
    fn call_methods_match_case_insensitively() {
        let handler = Handler::new().call("Set", |r| r.ok());
        assert!(handler.call_handler("set").is_some());
        assert!(handler.call_handler("SET").is_some());
        assert!(handler.call_handler("get").is_none());
    }

    #[test]
    fn new_capability_counts_as_call() {
        let handler = Handler::new().on_new(|r| r.ok());
        assert!(handler.has_call());
        assert!(handler.new_handler().is_some());
        assert!(handler.call_handler("new").is_none());
    }

    #[test]
    fn reserved_new_method_rejected() {
        let handler = Handler::new().call("new", |r| r.ok());
        assert!(handler.validate().is_err());
    }

    #[test]
    fn invalid_method_name_rejected() {
        let handler = Handler::new().call("bad.method", |r| r.ok());
        assert!(handler.validate().is_err());
    }

    #[test]
    fn empty_group_label_ignored() {
        let handler = Handler::new().group("");
        assert!(handler.group_label().is_none());

        let handler = Handler::new().group("lib");
        assert_eq!(handler.group_label(), Some("lib"));
    }

    #[test]
    fn auth_methods_are_separate_from_call_methods() {
        let handler = Handler::new().auth("login", |r| r.ok());
        assert!(handler.auth_handler("login").is_some());
        assert!(handler.call_handler("login").is_none());
        assert!(handler.has_auth());
        assert!(!handler.has_call());
    }
}
