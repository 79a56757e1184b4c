//! Wire types for the RES-Service protocol.
//!
//! This crate is the stable wire layer of the resly workspace: the JSON
//! envelopes a RES service exchanges with a gateway over the message bus,
//! and nothing else. It has no opinion on routing, scheduling or
//! lifecycle; that lives in the `resly` runtime crate.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     resly (runtime)                     │
//! │   router · work queues · requests · service lifecycle   │
//! ├─────────────────────────────────────────────────────────┤
//! │                 resly-proto  ◄── HERE                   │
//! │   request payloads · reply envelopes · event payloads   │
//! │   protocol errors · error-code interface                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Message shapes
//!
//! Inbound requests decode to [`RequestMeta`]. Replies are one of the
//! [`Reply`] envelopes. Resource events serialize through the payload
//! types in [`event`]; see that module for the per-kind table.
//!
//! # Errors
//!
//! [`ResError`] is the protocol error that travels on the wire
//! (`system.notFound` and friends). The [`ErrorCode`] trait is the
//! workspace-internal interface implemented by every Rust error enum.

mod error;
mod event;
mod reply;
mod request;

pub use error::{
    assert_error_code, assert_error_codes, ErrorCode, ResError, CODE_ACCESS_DENIED,
    CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS, CODE_INVALID_QUERY, CODE_METHOD_NOT_FOUND,
    CODE_NOT_FOUND, CODE_TIMEOUT,
};
pub use event::{
    AddPayload, ChangePayload, ChangeValue, CollectionPayload, CreatePayload, DeletePayload,
    EventEntry, ModelPayload, QueryPayload, QueryRequestPayload, QueryResultPayload,
    RemovePayload, ResetPayload, TokenPayload,
};
pub use reply::{timeout_preamble, Ref, Reply};
pub use request::RequestMeta;
