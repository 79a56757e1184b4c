//! Query-event windows: transient subjects, draining, bounded lifetime.

use resly::testing::{MockConn, PublishedMsg};
use resly::{Handler, Service};
use serde_json::json;
use std::time::Duration;

async fn recv(conn: &MockConn) -> PublishedMsg {
    tokio::time::timeout(Duration::from_secs(2), conn.next_published())
        .await
        .expect("timed out waiting for a published message")
}

fn query_collection_handler() -> Handler {
    Handler::new().collection().call("push", |r| {
        r.query_event(|q| {
            if q.query() == "limit=1" {
                q.remove_event(1)?;
                q.add_event(json!("x"), 0)?;
            }
            Ok(())
        })?;
        r.ok()
    })
}

/// Drives a `push` call and returns the transient query subject.
async fn open_window(conn: &MockConn) -> String {
    conn.request("call.test.books.push", "_INBOX.call", &json!({}));

    let query_event = recv(conn).await;
    assert_eq!(query_event.subject, "event.test.books.query");
    let subject = query_event.json()["subject"]
        .as_str()
        .expect("query event should carry a subject")
        .to_string();

    let reply = recv(conn).await;
    assert_eq!(reply.subject, "_INBOX.call");
    subject
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn query_request_answered_with_events() {
    let conn = MockConn::new();
    let service = Service::new("test");
    service.handle("books", query_collection_handler()).expect("handler should register");
    service.serve(conn.clone()).await.expect("service should start");

    let subject = open_window(&conn).await;
    assert_eq!(service.open_queries(), 1);

    let delivered = conn.request(&subject, "_INBOX.q", &json!({"query": "limit=1"}));
    assert_eq!(delivered, 1);

    let reply = recv(&conn).await;
    assert_eq!(reply.subject, "_INBOX.q");
    assert_eq!(
        reply.json(),
        json!({"result": {"events": [
            {"event": "remove", "data": {"idx": 1}},
            {"event": "add", "data": {"value": "x", "idx": 0}},
        ]}})
    );

    service.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unaffected_query_gets_empty_events() {
    let conn = MockConn::new();
    let service = Service::new("test");
    service.handle("books", query_collection_handler()).expect("handler should register");
    service.serve(conn.clone()).await.expect("service should start");

    let subject = open_window(&conn).await;
    conn.request(&subject, "_INBOX.q", &json!({"query": "limit=99"}));

    let reply = recv(&conn).await;
    assert_eq!(reply.json(), json!({"result": {"events": []}}));

    service.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_query_replies_invalid_query() {
    let conn = MockConn::new();
    let service = Service::new("test");
    service.handle("books", query_collection_handler()).expect("handler should register");
    service.serve(conn.clone()).await.expect("service should start");

    let subject = open_window(&conn).await;
    conn.request(&subject, "_INBOX.q", &json!({}));

    let reply = recv(&conn).await;
    assert_eq!(reply.json()["error"]["code"], "system.invalidQuery");

    service.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn window_expires_after_query_duration() {
    let conn = MockConn::new();
    let service = Service::new("test");
    service.handle("books", query_collection_handler()).expect("handler should register");
    service
        .set_query_duration(Duration::from_millis(100))
        .expect("query duration should be configurable");
    service.serve(conn.clone()).await.expect("service should start");
    let base_subs = conn.subscription_count();

    let subject = open_window(&conn).await;
    assert_eq!(conn.subscription_count(), base_subs + 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(service.open_queries(), 0);
    assert_eq!(conn.subscription_count(), base_subs);

    // Resgate sends no queries after the window; if one strays in anyway
    // it reaches nothing.
    let delivered = conn.request(&subject, "_INBOX.late", &json!({"query": "limit=1"}));
    assert_eq!(delivered, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.try_next_published().is_none());

    service.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_open_windows() {
    let conn = MockConn::new();
    let service = Service::new("test");
    service.handle("books", query_collection_handler()).expect("handler should register");
    service
        .set_query_duration(Duration::from_secs(60))
        .expect("query duration should be configurable");
    service.serve(conn.clone()).await.expect("service should start");

    let _subject = open_window(&conn).await;
    assert_eq!(service.open_queries(), 1);

    service.shutdown().await.expect("shutdown should succeed");
    assert_eq!(service.open_queries(), 0);
    assert_eq!(conn.subscription_count(), 0);
}
