//! RES-Service runtime.
//!
//! resly lets an application expose resources (models, collections, RPC
//! methods, authentication entry points) over a message bus, behind a
//! Resgate gateway. The gateway translates client requests into bus
//! messages; this crate receives them, routes them to registered
//! handlers, and answers in the protocol's JSON envelopes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Service                             │
//! │                                                              │
//! │  bus ──► message loop ──► pattern router ──► work queues     │
//! │              │               (trie)        (per resource)    │
//! │              │                                  │            │
//! │              ▼                                  ▼            │
//! │  query-event buffer                    Request → Handler     │
//! │  (transient subjects)                  events… then reply    │
//! └──────────────────────────────────────────────────────────────┘
//!         ▲                                        │
//!         └──────────────── Conn seam ◄────────────┘
//! ```
//!
//! - **[`Router`]**: a trie over dot-separated tokens with `$param`
//!   capture and a terminal `>` wildcard; literal beats parameter beats
//!   wildcard.
//! - **Work queues**: everything touching one resource runs serialized,
//!   in submission order; distinct resources run in parallel on a shared
//!   worker pool.
//! - **[`Request`]**: one value per inbound message, enforcing exactly
//!   one terminal reply, with pre-response events flushed ahead of it.
//! - **[`Handler`]**: an explicit capability record (access, get, call
//!   and auth methods, create, apply hooks) checked before dispatch.
//! - **[`Service`]**: lifecycle (`Stopped → Starting → Started →
//!   Stopping`), subscription topology, `system.reset` on start and on
//!   every reconnect.
//!
//! # Example
//!
//! ```no_run
//! use resly::{Handler, Service};
//! use serde_json::json;
//!
//! # async fn run(conn: resly::testing::MockConn) -> Result<(), resly::ServiceError> {
//! let service = Service::new("example");
//! service.handle(
//!     "counter",
//!     Handler::new()
//!         .model()
//!         .access(|r| r.access_granted())
//!         .get(|r| r.model(json!({ "count": 0 })))
//!         .call("inc", |r| {
//!             let mut values = std::collections::HashMap::new();
//!             values.insert("count".to_string(), json!(1).into());
//!             r.change_event(values)?;
//!             r.ok()
//!         }),
//! )?;
//! service.serve(conn).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`Service`], [`ServiceState`] — lifecycle and dispatch
//! - [`Handler`], [`ResourceType`] — capability records
//! - [`Request`], [`RequestKind`] — reply builder and state machine
//! - [`Resource`] — event emitters, in and out of request context
//! - [`Router`], [`Match`] — pattern registration and lookup
//! - [`QueryRequest`] — query-event enumeration
//! - [`Conn`], [`Subscription`], [`Msg`] — the bus seam
//! - [`testing`] — in-process mock connection
//!
//! Wire types are re-exported from [`resly_proto`] as [`proto`], with
//! the common ones ([`ResError`], [`Ref`], [`ChangeValue`]) at the root.

mod conn;
mod error;
mod handler;
mod query;
mod queue;
mod request;
mod resource;
mod router;
mod service;

pub mod testing;

pub use conn::{Conn, ConnError, Msg, MsgSender, ReconnectHandler, Subscription};
pub use error::ServiceError;
pub use handler::{
    ApplyAddHandler, ApplyChangeHandler, ApplyCreateHandler, ApplyCustomHandler,
    ApplyDeleteHandler, ApplyRemoveHandler, Handler, RequestHandler, ResourceType,
};
pub use query::QueryRequest;
pub use request::{Request, RequestKind};
pub use resource::Resource;
pub use router::{Match, Router};
pub use service::{Service, ServiceState, DEFAULT_QUERY_DURATION};

// Wire layer, re-exported for convenience.
pub use resly_proto as proto;
pub use resly_proto::{ChangeValue, Ref, ResError};
