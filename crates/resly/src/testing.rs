//! In-process test harness.
//!
//! [`MockConn`] implements [`Conn`] entirely in memory: subscriptions
//! with NATS-style wildcard matching, a log of published messages, and a
//! reconnect trigger. Integration tests drive a full service through it
//! without a broker:
//!
//! ```
//! use resly::testing::MockConn;
//! use resly::{Handler, Service};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> Result<(), resly::ServiceError> {
//! let conn = MockConn::new();
//! let service = Service::new("test");
//! service.handle(">", Handler::new().call("ping", |r| r.ok()))?;
//! service.serve(conn.clone()).await?;
//!
//! conn.request("call.test.x.ping", "_INBOX.1", &serde_json::json!({}));
//! let reply = conn.next_published().await;
//! assert_eq!(reply.subject, "_INBOX.1");
//! assert_eq!(reply.json()["result"], serde_json::Value::Null);
//! # service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::conn::{Conn, ConnError, Msg, MsgSender, ReconnectHandler, Subscription};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// A message captured from [`Conn::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMsg {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl PublishedMsg {
    /// Decodes the payload as JSON.
    ///
    /// # Panics
    ///
    /// Panics when the payload is not valid JSON; this is a test helper.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).expect("published payload should be JSON")
    }

    /// The payload as text, for non-JSON messages like the timeout
    /// preamble.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct SubEntry {
    id: u64,
    subject: String,
    tx: MsgSender,
}

#[derive(Default)]
struct PublishLog {
    msgs: Vec<PublishedMsg>,
    cursor: usize,
}

struct MockConnInner {
    subs: Mutex<Vec<SubEntry>>,
    log: Mutex<PublishLog>,
    notify: Notify,
    reconnect: Mutex<Option<Arc<ReconnectHandler>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// An in-memory bus connection for tests.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MockConn {
    inner: Arc<MockConnInner>,
}

impl MockConn {
    /// Creates an open in-memory connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockConnInner {
                subs: Mutex::new(Vec::new()),
                log: Mutex::new(PublishLog::default()),
                notify: Notify::new(),
                reconnect: Mutex::new(None),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Delivers a request message to every matching subscription,
    /// serializing `payload` as the message body.
    ///
    /// Returns the number of subscriptions it reached.
    pub fn request(&self, subject: &str, reply: &str, payload: &Value) -> usize {
        let bytes = serde_json::to_vec(payload).expect("request payload should serialize");
        self.request_raw(subject, Some(reply), bytes)
    }

    /// Delivers a raw message to every matching subscription.
    pub fn request_raw(&self, subject: &str, reply: Option<&str>, payload: Vec<u8>) -> usize {
        let targets: Vec<MsgSender> = {
            let subs = self.inner.subs.lock();
            subs.iter()
                .filter(|s| subject_matches(&s.subject, subject))
                .map(|s| s.tx.clone())
                .collect()
        };
        let mut delivered = 0;
        for tx in targets {
            let msg = Msg {
                subject: subject.to_string(),
                reply: reply.map(str::to_string),
                payload: payload.clone(),
            };
            if tx.send(msg).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Snapshot of everything published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMsg> {
        self.inner.log.lock().msgs.clone()
    }

    /// Pops the next unconsumed published message, if one is already
    /// there.
    #[must_use]
    pub fn try_next_published(&self) -> Option<PublishedMsg> {
        let mut log = self.inner.log.lock();
        if log.cursor < log.msgs.len() {
            let msg = log.msgs[log.cursor].clone();
            log.cursor += 1;
            Some(msg)
        } else {
            None
        }
    }

    /// Waits for the next unconsumed published message. Wrap in
    /// `tokio::time::timeout` to bound the wait.
    pub async fn next_published(&self) -> PublishedMsg {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(msg) = self.try_next_published() {
                return msg;
            }
            notified.await;
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.lock().len()
    }

    /// Invokes the installed reconnect handler, simulating a re-established
    /// bus connection.
    pub fn trigger_reconnect(&self) {
        let handler = self.inner.reconnect.lock().clone();
        if let Some(handler) = handler {
            (*handler)();
        }
    }

    /// Marks the connection closed; publishes and subscribes fail from
    /// here on.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for MockConn {
    fn default() -> Self {
        Self::new()
    }
}

impl Conn for MockConn {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        self.inner.log.lock().msgs.push(PublishedMsg {
            subject: subject.to_string(),
            payload,
        });
        self.inner.notify.notify_waiters();
        Ok(())
    }

    fn subscribe(&self, subject: &str, tx: MsgSender) -> Result<Box<dyn Subscription>, ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subs.lock().push(SubEntry {
            id,
            subject: subject.to_string(),
            tx,
        });
        Ok(Box::new(MockSubscription {
            id,
            subject: subject.to_string(),
            conn: Arc::downgrade(&self.inner),
        }))
    }

    fn set_reconnect_handler(&self, handler: ReconnectHandler) {
        *self.inner.reconnect.lock() = Some(Arc::new(handler));
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

struct MockSubscription {
    id: u64,
    subject: String,
    conn: Weak<MockConnInner>,
}

impl Subscription for MockSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn unsubscribe(&self) -> Result<(), ConnError> {
        if let Some(conn) = self.conn.upgrade() {
            conn.subs.lock().retain(|s| s.id != self.id);
        }
        Ok(())
    }
}

/// NATS-style subject matching: `*` matches one token, a trailing `>`
/// matches one or more.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_toks = pattern.split('.');
    let mut subject_toks = subject.split('.');
    loop {
        match (pattern_toks.next(), subject_toks.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
