//! Bus connection seam.
//!
//! The service does not speak to any concrete message bus. It consumes
//! the [`Conn`] trait: publish a payload on a subject, subscribe a
//! subject to an inbound channel, and get told about reconnects. A NATS
//! binding implements this trait outside the workspace;
//! [`crate::testing::MockConn`] implements it in-process for tests.
//!
//! ```text
//!                  ┌──────────────────────────┐
//!  gateway ──bus──►│  Conn::subscribe(tx)     │
//!                  │        │                 │
//!                  │        ▼ Msg             │
//!                  │  service message loop    │
//!                  │        │                 │
//!                  │        ▼                 │
//!                  │  Conn::publish(reply)    │──bus──► gateway
//!                  └──────────────────────────┘
//! ```
//!
//! Delivery to the service is push-based: each subscription is handed a
//! clone of an unbounded sender, and the service's message loop drains
//! the receiving side. The loop ends when every sender is gone, which is
//! how shutdown quiesces without a dedicated stop signal.

use resly_proto::ErrorCode;
use thiserror::Error;
use tokio::sync::mpsc;

/// An inbound bus message.
#[derive(Debug, Clone)]
pub struct Msg {
    /// Subject the message arrived on.
    pub subject: String,
    /// Reply subject, when the sender expects a response.
    pub reply: Option<String>,
    /// Raw message payload.
    pub payload: Vec<u8>,
}

/// Sender half used to deliver subscribed messages to the service.
pub type MsgSender = mpsc::UnboundedSender<Msg>;

/// Callback invoked after the bus connection is re-established.
pub type ReconnectHandler = Box<dyn Fn() + Send + Sync>;

/// A message bus connection.
///
/// Implementations must be safe to share across threads; the service
/// publishes from its worker pool and from the message loop concurrently.
///
/// Subjects follow NATS conventions: dot-separated tokens, `*` matching
/// one token and a trailing `>` matching one or more.
pub trait Conn: Send + Sync {
    /// Publishes a payload on a subject.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ConnError>;

    /// Subscribes to a subject, delivering matching messages through `tx`.
    ///
    /// The returned handle keeps the subscription alive until
    /// [`Subscription::unsubscribe`] is called.
    fn subscribe(&self, subject: &str, tx: MsgSender) -> Result<Box<dyn Subscription>, ConnError>;

    /// Installs the handler invoked after every reconnect.
    ///
    /// Replaces any previously installed handler.
    fn set_reconnect_handler(&self, handler: ReconnectHandler);

    /// Returns `true` once the connection is closed.
    fn is_closed(&self) -> bool;
}

/// A live bus subscription.
pub trait Subscription: Send + Sync {
    /// The subject this subscription listens on.
    fn subject(&self) -> &str;

    /// Tears the subscription down. The sender handed to
    /// [`Conn::subscribe`] is dropped with it.
    fn unsubscribe(&self) -> Result<(), ConnError>;
}

/// Bus connection error.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | [`ConnError::Closed`] | `CONN_CLOSED` | No |
/// | [`ConnError::Publish`] | `CONN_PUBLISH_FAILED` | Yes |
/// | [`ConnError::Subscribe`] | `CONN_SUBSCRIBE_FAILED` | Yes |
#[derive(Debug, Clone, Error)]
pub enum ConnError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// A publish did not reach the bus.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A subscription could not be established or torn down.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

impl ErrorCode for ConnError {
    fn code(&self) -> &'static str {
        match self {
            Self::Closed => "CONN_CLOSED",
            Self::Publish(_) => "CONN_PUBLISH_FAILED",
            Self::Subscribe(_) => "CONN_SUBSCRIBE_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Publish and subscribe failures are typically transient bus
        // conditions; a closed connection stays closed.
        !matches!(self, Self::Closed)
    }
}
