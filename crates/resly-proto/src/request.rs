//! Inbound request payload.
//!
//! Every request message the gateway publishes on a `get.*`, `call.*`,
//! `auth.*` or `access.*` subject carries a JSON object with connection
//! metadata. [`RequestMeta`] is its decoded form. All fields are optional
//! on the wire; an empty payload decodes to [`RequestMeta::default`].

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Decoded payload of an inbound request message.
///
/// ```
/// use resly_proto::RequestMeta;
///
/// let raw = r#"{"cid":"c42","params":{"value":7},"query":"limit=5"}"#;
/// let meta: RequestMeta = serde_json::from_str(raw).unwrap();
/// assert_eq!(meta.cid, "c42");
/// assert_eq!(meta.query, "limit=5");
/// assert!(meta.token.is_null());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMeta {
    /// Connection id the gateway assigned to the client.
    #[serde(default)]
    pub cid: String,

    /// Raw request parameters. `Null` when the client sent none.
    #[serde(default)]
    pub params: Value,

    /// Raw access token. `Null` when the connection has no token.
    #[serde(default)]
    pub token: Value,

    /// Query part of the resource id, without the leading `?`.
    #[serde(default)]
    pub query: String,

    /// HTTP headers of the client request, when the gateway forwards them.
    #[serde(default)]
    pub header: Option<HashMap<String, Vec<String>>>,

    /// HTTP host of the client request.
    #[serde(default)]
    pub host: Option<String>,

    /// Network address of the client.
    #[serde(default, rename = "remoteAddr")]
    pub remote_addr: Option<String>,

    /// Unmodified URI of the client's HTTP request.
    #[serde(default)]
    pub uri: Option<String>,
}

impl RequestMeta {
    /// Decodes a request payload. An empty payload is valid and yields the
    /// default meta (no cid, null params, null token).
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_full_payload() {
        let raw = serde_json::json!({
            "cid": "c1",
            "params": {"id": 3},
            "token": {"user": "admin"},
            "query": "q=books",
            "header": {"Accept": ["application/json"]},
            "host": "example.test",
            "remoteAddr": "127.0.0.1",
            "uri": "/api/books"
        });
        let meta: RequestMeta =
            serde_json::from_value(raw).expect("full payload should decode");
        assert_eq!(meta.cid, "c1");
        assert_eq!(meta.params["id"], 3);
        assert_eq!(meta.token["user"], "admin");
        assert_eq!(meta.query, "q=books");
        assert_eq!(
            meta.header.expect("header should be present")["Accept"],
            vec!["application/json"]
        );
        assert_eq!(meta.remote_addr.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn decode_empty_payload() {
        let meta = RequestMeta::from_payload(b"").expect("empty payload should decode");
        assert_eq!(meta.cid, "");
        assert!(meta.params.is_null());
        assert!(meta.token.is_null());
        assert_eq!(meta.query, "");
    }

    #[test]
    fn decode_partial_payload() {
        let meta = RequestMeta::from_payload(br#"{"cid":"c9"}"#)
            .expect("partial payload should decode");
        assert_eq!(meta.cid, "c9");
        assert!(meta.host.is_none());
    }

    #[test]
    fn malformed_payload_is_error() {
        assert!(RequestMeta::from_payload(b"{not json").is_err());
    }
}
