//! Service lifecycle and request dispatch.
//!
//! # Architecture
//!
//! ```text
//!                        ┌───────────────────────────────┐
//!  bus ── Msg ──────────►│        message loop           │
//!                        │  subject → router lookup      │
//!                        │  key = group | resource name  │
//!                        │        │                      │
//!                        │        ▼                      │
//!                        │  per-resource work queue      │
//!                        │        │ worker (blocking)    │
//!                        │        ▼                      │
//!                        │  Request → handler callback   │
//!                        │  events… then one reply       │──► bus
//!                        └───────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──serve()──► Starting ──► Started ──shutdown()──► Stopping ──► Stopped
//! ```
//!
//! Configuration setters and handler registration require `Stopped`.
//! Operations requiring `Started` after shutdown are silent no-ops.
//! Serving again after a shutdown is allowed; registrations survive.
//!
//! # Subscription topology
//!
//! One bus subscription per request type per registered pattern
//! (parameters rendered as `*`): `get.P` and `access.P` verbatim,
//! `call.P.>` and `auth.P.>` to cover the trailing method token. A
//! pattern ending in `>` already covers its methods. Explicit
//! [`Service::set_owned_resources`] lists override the derived topology
//! and the reset lists alike.

use crate::conn::{Conn, ConnError, Msg, MsgSender, Subscription};
use crate::error::ServiceError;
use crate::handler::Handler;
use crate::query::{QueryFn, QueryRegistry, QueryRequest};
use crate::queue::{Task, WorkQueues};
use crate::request::{Request, RequestKind};
use crate::resource::Resource;
use crate::router::Router;
use parking_lot::{Mutex, RwLock};
use resly_proto::{
    QueryPayload, QueryRequestPayload, QueryResultPayload, Reply, RequestMeta, ResError,
    ResetPayload, TokenPayload,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default lifetime of a query-event window.
pub const DEFAULT_QUERY_DURATION: Duration = Duration::from_secs(3);

/// Service state.
///
/// Transitions are monotonic within one serving cycle and return to
/// `Stopped` only through a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// Not serving. Configuration may be changed.
    #[default]
    Stopped,
    /// `serve` is setting up subscriptions.
    Starting,
    /// Serving requests.
    Started,
    /// `shutdown` is draining work.
    Stopping,
}

impl ServiceState {
    /// Returns `true` when configuration changes are allowed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns `true` when the service accepts bus requests.
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

struct Options {
    query_duration: Duration,
    owned: Option<(Vec<String>, Vec<String>)>,
    default_access_denied: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            query_duration: DEFAULT_QUERY_DURATION,
            owned: None,
            default_access_denied: false,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    state: ServiceState,
    conn: Option<Arc<dyn Conn>>,
    subs: Vec<Box<dyn Subscription>>,
    msg_tx: Option<MsgSender>,
    handle: Option<tokio::runtime::Handle>,
    reset: Option<Vec<u8>>,
}

pub(crate) struct ServiceInner {
    prefix: String,
    router: RwLock<Router>,
    opts: Mutex<Options>,
    lifecycle: Mutex<Lifecycle>,
    queues: WorkQueues,
    queries: QueryRegistry,
}

struct Topology {
    reset: ResetPayload,
    subjects: Vec<String>,
}

/// A RES service: resources registered under patterns, served over a bus
/// connection.
///
/// `Service` is a cheap cloneable handle; clones share one service.
///
/// # Example
///
/// ```no_run
/// use resly::{Handler, Service};
///
/// # async fn run(conn: resly::testing::MockConn) -> Result<(), resly::ServiceError> {
/// let service = Service::new("library");
/// service.handle(
///     "book.$id",
///     Handler::new()
///         .model()
///         .access(|r| r.access_granted())
///         .get(|r| {
///             let id = r.path_param("id").unwrap_or_default().to_string();
///             r.model(serde_json::json!({ "id": id }))
///         }),
/// )?;
/// service.serve(conn).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Creates a stopped service. All registered patterns are prefixed
    /// with `prefix` (dot-joined) when it is non-empty.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            inner: Arc::new(ServiceInner {
                router: RwLock::new(Router::new(prefix.clone())),
                prefix,
                opts: Mutex::new(Options::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                queues: WorkQueues::new(),
                queries: QueryRegistry::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ServiceInner>) -> Self {
        Self { inner }
    }

    /// The service-wide pattern prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.inner.lifecycle.lock().state
    }

    /// Registers a handler under a pattern. Requires a stopped service.
    ///
    /// # Errors
    ///
    /// State errors, plus everything [`Router::register`] rejects.
    pub fn handle(&self, pattern: &str, handler: Handler) -> Result<(), ServiceError> {
        self.require_stopped("handle")?;
        self.inner.router.write().register(pattern, handler)
    }

    /// Sets how long a query-event window stays open. Requires a stopped
    /// service. Default: 3 seconds.
    pub fn set_query_duration(&self, duration: Duration) -> Result<(), ServiceError> {
        self.require_stopped("set_query_duration")?;
        self.inner.opts.lock().query_duration = duration;
        Ok(())
    }

    /// Overrides the derived reset pattern lists, and with them the
    /// subscription topology. Requires a stopped service.
    pub fn set_owned_resources(
        &self,
        resources: Vec<String>,
        access: Vec<String>,
    ) -> Result<(), ServiceError> {
        self.require_stopped("set_owned_resources")?;
        self.inner.opts.lock().owned = Some((resources, access));
        Ok(())
    }

    /// Makes access requests without an access handler deny instead of
    /// grant. Requires a stopped service.
    pub fn set_default_access_denied(&self, denied: bool) -> Result<(), ServiceError> {
        self.require_stopped("set_default_access_denied")?;
        self.inner.opts.lock().default_access_denied = denied;
        Ok(())
    }

    /// Starts serving over a bus connection.
    ///
    /// Subscribes the request subjects, publishes the initial
    /// `system.reset` (unless both reset lists are empty), installs the
    /// reconnect handler, and returns. Request processing continues in
    /// the background until [`Service::shutdown`].
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidState`] unless the service is stopped;
    /// [`ServiceError::Conn`] when a subscription fails. On error the
    /// service returns to `Stopped`.
    pub async fn serve<C: Conn + 'static>(&self, conn: C) -> Result<(), ServiceError> {
        {
            let mut lc = self.inner.lifecycle.lock();
            if lc.state != ServiceState::Stopped {
                return Err(ServiceError::InvalidState {
                    operation: "serve",
                    required: "stopped",
                    state: lc.state,
                });
            }
            lc.state = ServiceState::Starting;
        }
        match self.start(Arc::new(conn)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.lifecycle.lock().state = ServiceState::Stopped;
                Err(e)
            }
        }
    }

    fn start(&self, conn: Arc<dyn Conn>) -> Result<(), ServiceError> {
        let topology = self.compute_topology();
        let reset_payload = if topology.reset.is_empty() {
            None
        } else {
            Some(serde_json::to_vec(&topology.reset)?)
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs: Vec<Box<dyn Subscription>> = Vec::new();
        for subject in &topology.subjects {
            match conn.subscribe(subject, tx.clone()) {
                Ok(sub) => subs.push(sub),
                Err(e) => {
                    for sub in &subs {
                        let _ = sub.unsubscribe();
                    }
                    return Err(e.into());
                }
            }
        }

        let handle = tokio::runtime::Handle::current();
        {
            let mut lc = self.inner.lifecycle.lock();
            lc.conn = Some(Arc::clone(&conn));
            lc.subs = subs;
            lc.msg_tx = Some(tx.clone());
            lc.handle = Some(handle.clone());
            lc.reset = reset_payload.clone();
            lc.state = ServiceState::Started;
        }
        self.inner.queues.activate(handle.clone());

        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            debug!("message loop started");
            while let Some(msg) = rx.recv().await {
                dispatch(&inner, msg);
            }
            debug!("message loop stopped");
        });
        drop(tx);

        if let Some(bytes) = reset_payload {
            if let Err(e) = conn.publish("system.reset", bytes) {
                warn!("failed to publish initial system.reset: {}", e);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        conn.set_reconnect_handler(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let (conn, reset) = {
                let lc = inner.lifecycle.lock();
                (lc.conn.clone(), lc.reset.clone())
            };
            if let (Some(conn), Some(bytes)) = (conn, reset) {
                info!("connection restored, resending system.reset");
                if let Err(e) = conn.publish("system.reset", bytes) {
                    warn!("failed to publish system.reset after reconnect: {}", e);
                }
            }
        }));

        info!("service '{}' started ({} subscriptions)", self.inner.prefix, topology.subjects.len());
        Ok(())
    }

    /// Stops the service: tears down every subscription, runs queued
    /// work to completion, closes open query windows, and returns to
    /// `Stopped`. A no-op unless the service is started.
    ///
    /// Must not be called from inside a handler; a handler waiting for
    /// its own queue to drain never finishes.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let (subs, msg_tx) = {
            let mut lc = self.inner.lifecycle.lock();
            if lc.state != ServiceState::Started {
                return Ok(());
            }
            lc.state = ServiceState::Stopping;
            self.inner.queues.deactivate();
            (std::mem::take(&mut lc.subs), lc.msg_tx.take())
        };
        drop(msg_tx);

        for sub in subs {
            if let Err(e) = sub.unsubscribe() {
                warn!("failed to unsubscribe '{}': {}", sub.subject(), e);
            }
        }

        debug!("draining {} work queues", self.inner.queues.active());
        self.inner.queues.drain().await;
        self.inner.queries.clear();

        {
            let mut lc = self.inner.lifecycle.lock();
            lc.conn = None;
            lc.handle = None;
            lc.reset = None;
            lc.state = ServiceState::Stopped;
        }
        info!("service '{}' stopped", self.inner.prefix);
        Ok(())
    }

    /// Publishes a `system.reset`, invalidating gateway caches for the
    /// given patterns. A silent no-op when the service is not serving or
    /// both lists are empty.
    pub fn reset(&self, resources: Vec<String>, access: Vec<String>) -> Result<(), ServiceError> {
        let payload = ResetPayload { resources, access };
        if payload.is_empty() {
            return Ok(());
        }
        let Some(conn) = self.conn() else {
            debug!("system.reset dropped: service not serving");
            return Ok(());
        };
        conn.publish("system.reset", serde_json::to_vec(&payload)?)
            .map_err(Into::into)
    }

    /// Sets or clears (with `Null`) a connection's access token, on
    /// `conn.<cid>.token`. A silent no-op when the service is not
    /// serving.
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidArgument`] when the connection id is empty
    /// or contains `.`, `*` or `>`.
    pub fn token_event(&self, cid: &str, token: Value) -> Result<(), ServiceError> {
        if cid.is_empty() || cid.contains(['.', '*', '>']) {
            return Err(ServiceError::InvalidArgument(format!(
                "invalid connection id '{cid}'"
            )));
        }
        let Some(conn) = self.conn() else {
            debug!("token event for '{}' dropped: service not serving", cid);
            return Ok(());
        };
        let payload = serde_json::to_vec(&TokenPayload { token })?;
        conn.publish(&format!("conn.{cid}.token"), payload)
            .map_err(Into::into)
    }

    /// Schedules out-of-band work on a resource's serialized queue. The
    /// callback receives a [`Resource`] exposing the event emitters.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NoMatchingPattern`] when the name resolves to no
    /// registered pattern; [`ServiceError::InvalidState`] when the
    /// service is not started.
    pub fn with<F>(&self, rid: &str, cb: F) -> Result<(), ServiceError>
    where
        F: FnOnce(Resource) + Send + 'static,
    {
        let resource = self.resource(rid)?;
        self.with_resource(resource, cb)
    }

    /// Like [`Service::with`], for an already resolved resource.
    pub fn with_resource<F>(&self, resource: Resource, cb: F) -> Result<(), ServiceError>
    where
        F: FnOnce(Resource) + Send + 'static,
    {
        let key = resource.work_key().to_string();
        self.schedule(&key, Box::new(move || cb(resource)))
    }

    /// Schedules work on a group's serialized queue. The callback
    /// receives the service and may resolve resources itself.
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidState`] when the service is not started.
    pub fn with_group<F>(&self, group: &str, cb: F) -> Result<(), ServiceError>
    where
        F: FnOnce(Service) + Send + 'static,
    {
        let service = self.clone();
        self.schedule(group, Box::new(move || cb(service)))
    }

    fn resource(&self, rid: &str) -> Result<Resource, ServiceError> {
        let (name, query) = match rid.split_once('?') {
            Some((name, query)) => (name, query),
            None => (rid, ""),
        };
        let m = self
            .inner
            .router
            .read()
            .lookup(name)
            .ok_or_else(|| ServiceError::NoMatchingPattern(rid.to_string()))?;
        Ok(Resource::from_match(
            self.clone(),
            name.to_string(),
            query.to_string(),
            m,
        ))
    }

    fn require_stopped(&self, operation: &'static str) -> Result<(), ServiceError> {
        let state = self.inner.lifecycle.lock().state;
        if state.is_stopped() {
            Ok(())
        } else {
            Err(ServiceError::InvalidState { operation, required: "stopped", state })
        }
    }

    fn compute_topology(&self) -> Topology {
        let caps = self.inner.router.read().capability_patterns();
        let owned = self.inner.opts.lock().owned.clone();

        let mut subjects = BTreeSet::new();
        let (resources, access) = match owned {
            Some((resources, access)) => {
                for p in &resources {
                    subjects.insert(format!("get.{p}"));
                    subjects.insert(method_subject("call", p));
                    subjects.insert(method_subject("auth", p));
                }
                for p in &access {
                    subjects.insert(format!("access.{p}"));
                }
                (resources, access)
            }
            None => {
                let mut resources = Vec::new();
                let mut access = Vec::new();
                for c in &caps {
                    if c.has_get {
                        resources.push(c.pattern.clone());
                        subjects.insert(format!("get.{}", c.pattern));
                    }
                    if c.has_call {
                        subjects.insert(method_subject("call", &c.pattern));
                    }
                    if c.has_auth {
                        subjects.insert(method_subject("auth", &c.pattern));
                    }
                    if c.has_access {
                        access.push(c.pattern.clone());
                        subjects.insert(format!("access.{}", c.pattern));
                    }
                }
                (resources, access)
            }
        };
        Topology {
            reset: ResetPayload { resources, access },
            subjects: subjects.into_iter().collect(),
        }
    }

    pub(crate) fn conn(&self) -> Option<Arc<dyn Conn>> {
        self.inner.lifecycle.lock().conn.clone()
    }

    pub(crate) fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ServiceError> {
        match self.conn() {
            Some(conn) => conn.publish(subject, payload).map_err(Into::into),
            None => Err(ConnError::Closed.into()),
        }
    }

    pub(crate) fn reply_error(&self, reply_to: &str, err: ResError) {
        match Reply::Error(err).to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.publish(reply_to, bytes) {
                    warn!("failed to publish error reply on '{}': {}", reply_to, e);
                }
            }
            Err(e) => error!("failed to encode error reply: {}", e),
        }
    }

    pub(crate) fn schedule(&self, key: &str, task: Task) -> Result<(), ServiceError> {
        if self.inner.queues.run_with(key, task) {
            Ok(())
        } else {
            Err(ServiceError::InvalidState {
                operation: "schedule work",
                required: "started",
                state: self.state(),
            })
        }
    }

    /// Opens a query-event window for a resource. Called through
    /// [`Resource::query_event`].
    pub(crate) fn open_query(&self, resource: &Resource, cb: QueryFn) -> Result<(), ServiceError> {
        let (conn, tx, handle) = {
            let lc = self.inner.lifecycle.lock();
            match (&lc.conn, &lc.msg_tx, &lc.handle) {
                (Some(conn), Some(tx), Some(handle)) => {
                    (Arc::clone(conn), tx.clone(), handle.clone())
                }
                _ => return Err(ConnError::Closed.into()),
            }
        };
        let duration = self.inner.opts.lock().query_duration;

        let subject = format!("_QUERY_.{}", Uuid::new_v4().simple());
        let event_payload = serde_json::to_vec(&QueryPayload { subject: subject.clone() })?;

        let sub = conn.subscribe(&subject, tx)?;
        self.inner
            .queries
            .insert(subject.clone(), resource.clone(), cb, sub);

        // The window must be registered before the event invites queries.
        let event_subject = format!("event.{}.query", resource.rid());
        if let Err(e) = conn.publish(&event_subject, event_payload) {
            warn!("dropping event '{}': {}", event_subject, e);
        }

        let weak = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.queries.expire(&subject);
            }
        });
        Ok(())
    }

    /// Number of open query-event windows. Exposed for tests and
    /// instrumentation.
    #[must_use]
    pub fn open_queries(&self) -> usize {
        self.inner.queries.len()
    }
}

fn method_subject(rtype: &str, pattern: &str) -> String {
    if pattern == ">" || pattern.ends_with(".>") {
        format!("{rtype}.{pattern}")
    } else {
        format!("{rtype}.{pattern}.>")
    }
}

/// Routes one inbound message onto the right serialized queue.
fn dispatch(inner: &Arc<ServiceInner>, msg: Msg) {
    let service = Service::from_inner(Arc::clone(inner));

    // Transient query subjects are not request subjects; check them first.
    if let Some((resource, cb)) = inner.queries.lookup(&msg.subject) {
        let key = resource.work_key().to_string();
        let task = Box::new(move || process_query(resource, cb, msg));
        if let Err(e) = service.schedule(&key, task) {
            debug!("dropping query message: {}", e);
        }
        return;
    }

    let Some((rtype, rest)) = msg.subject.split_once('.') else {
        debug!("ignoring message on unroutable subject '{}'", msg.subject);
        return;
    };
    let (kind, rid, method) = match rtype {
        "get" => (RequestKind::Get, rest, None),
        "access" => (RequestKind::Access, rest, None),
        "call" | "auth" => {
            let Some((rid, method)) = rest.rsplit_once('.') else {
                debug!("ignoring '{}' message without a method token", rtype);
                return;
            };
            let kind = if rtype == "call" { RequestKind::Call } else { RequestKind::Auth };
            (kind, rid, Some(method.to_string()))
        }
        _ => {
            debug!("ignoring message on unroutable subject '{}'", msg.subject);
            return;
        }
    };

    let Some(reply_to) = msg.reply else {
        warn!("request on '{}' has no reply subject, dropping", msg.subject);
        return;
    };

    let Some(m) = inner.router.read().lookup(rid) else {
        debug!("no pattern matches '{}'", rid);
        let err = if kind == RequestKind::Access {
            ResError::access_denied()
        } else {
            ResError::not_found()
        };
        service.reply_error(&reply_to, err);
        return;
    };

    let key = m
        .group
        .clone()
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| rid.to_string());
    let rid = rid.to_string();
    let inner = Arc::clone(inner);
    let task = Box::new(move || {
        process_request(&inner, kind, rid, method, m, reply_to, msg.payload);
    });
    if let Err(e) = service.schedule(&key, task) {
        debug!("dropping request: {}", e);
    }
}

/// Runs one request on its resource's worker: decode, capability
/// dispatch, handler invocation, reply enforcement.
fn process_request(
    inner: &Arc<ServiceInner>,
    kind: RequestKind,
    rid: String,
    method: Option<String>,
    m: crate::router::Match,
    reply_to: String,
    payload: Vec<u8>,
) {
    let service = Service::from_inner(Arc::clone(inner));

    let meta = match RequestMeta::from_payload(&payload) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("malformed request payload on '{}': {}", rid, e);
            service.reply_error(&reply_to, ResError::internal_error());
            return;
        }
    };

    // A call for the reserved method `new` is a create request.
    let kind = match (&kind, &method) {
        (RequestKind::Call, Some(method)) if method.eq_ignore_ascii_case("new") => {
            RequestKind::New
        }
        _ => kind,
    };

    let resource = Resource::from_match(service.clone(), rid, meta.query.clone(), m);
    let request = Request::new(kind, resource, method, meta, reply_to);
    let handler = Arc::clone(request.resource().handler());

    let cb = match kind {
        RequestKind::Access => handler.access_handler().cloned(),
        RequestKind::Get => handler.get_handler().cloned(),
        RequestKind::Call => request.method().and_then(|mth| handler.call_handler(mth)).cloned(),
        RequestKind::Auth => request.method().and_then(|mth| handler.auth_handler(mth)).cloned(),
        RequestKind::New => handler.new_handler().cloned(),
    };

    let Some(cb) = cb else {
        respond_without_capability(&service, &request, kind);
        return;
    };

    match cb(&request) {
        Ok(()) => {
            if !request.replied() {
                error!("handler for '{}' returned without a response", request.rid());
                let _ = request.error(
                    ResError::internal_error().with_message("Internal error: missing response"),
                );
            }
        }
        Err(e) => {
            if request.replied() {
                error!("handler for '{}' failed after responding: {}", request.rid(), e);
            } else if let ServiceError::Protocol(res) = e {
                let _ = request.error(res);
            } else {
                error!("handler for '{}' failed: {}", request.rid(), e);
                let _ = request.error(ResError::internal_error());
            }
        }
    }
}

/// Answers a request whose handler lacks the required capability.
fn respond_without_capability(service: &Service, request: &Request, kind: RequestKind) {
    let result = match kind {
        RequestKind::Access => {
            if service.inner.opts.lock().default_access_denied {
                request.access_denied()
            } else {
                request.access_granted()
            }
        }
        RequestKind::Get => request.not_found(),
        RequestKind::Call | RequestKind::Auth | RequestKind::New => request.method_not_found(),
    };
    if let Err(e) = result {
        warn!("failed to reply to unhandled {} request: {}", kind, e);
    }
}

/// Answers one query request from the handler-supplied callback.
fn process_query(resource: Resource, cb: QueryFn, msg: Msg) {
    let service = resource.service().clone();
    let Some(reply_to) = msg.reply else {
        warn!("query message for '{}' has no reply subject, dropping", resource.rid());
        return;
    };

    let payload: QueryRequestPayload = if msg.payload.is_empty() {
        QueryRequestPayload::default()
    } else {
        match serde_json::from_slice(&msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("malformed query payload for '{}': {}", resource.rid(), e);
                service.reply_error(&reply_to, ResError::internal_error());
                return;
            }
        }
    };
    if payload.query.is_empty() {
        service.reply_error(&reply_to, ResError::invalid_query().with_message("missing query"));
        return;
    }

    let mut query_request = QueryRequest::new(
        resource.rid().to_string(),
        payload.query,
        resource.handler().resource_type(),
    );
    match cb(&mut query_request) {
        Ok(()) => {
            let events = query_request.into_events();
            match serde_json::to_value(QueryResultPayload { events }) {
                Ok(result) => match Reply::Result(result).to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = service.publish(&reply_to, bytes) {
                            warn!("failed to publish query reply: {}", e);
                        }
                    }
                    Err(e) => error!("failed to encode query reply: {}", e),
                },
                Err(e) => {
                    error!("failed to encode query events for '{}': {}", resource.rid(), e);
                    service.reply_error(&reply_to, ResError::internal_error());
                }
            }
        }
        Err(ServiceError::Protocol(res)) => service.reply_error(&reply_to, res),
        Err(e) => {
            error!("query callback for '{}' failed: {}", resource.rid(), e);
            service.reply_error(&reply_to, ResError::internal_error());
        }
    }
}
