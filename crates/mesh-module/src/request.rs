//! Handler-facing request and response types.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{User, Verb, WireResponse, CONTENT_TYPE_JSON};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// Body used when a JSON response cannot be serialized.
const JSON_FALLBACK: &[u8] = br#"{"error":"Internal Server Error"}"#;

/// An inbound call as a handler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub verb: Verb,
    /// Percent-decoded path, without the query string.
    pub path: String,
    /// Query parameters, each key with its values in order of appearance.
    pub query: HashMap<String, Vec<String>>,
    pub content_type: String,
    pub body: Bytes,
    pub user: Option<User>,
    /// Segments bound by the route pattern's `:name` parameters.
    pub params: HashMap<String, String>,
}

impl Request {
    /// Value bound to `:name` in the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of a query parameter.
    pub fn query_values(&self, key: &str) -> &[String] {
        self.query.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A handler's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub content_type: String,
    pub body: Bytes,
}

impl Response {
    pub fn new(status_code: u16, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// JSON response. A value that fails to serialize becomes a 500 with a
    /// generic error body.
    pub fn json<T: Serialize + ?Sized>(status_code: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status_code, CONTENT_TYPE_JSON, body),
            Err(e) => {
                error!(error = %e, "Failed to serialize response body");
                Self::new(500, CONTENT_TYPE_JSON, Bytes::from_static(JSON_FALLBACK))
            }
        }
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self::new(status_code, "text/plain; charset=utf-8", body.into())
    }

    /// 204 with an empty body.
    pub fn no_content() -> Self {
        Self::new(204, "", Bytes::new())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Deserialize the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub(crate) fn to_wire(&self) -> WireResponse {
        WireResponse {
            status_code: self.status_code,
            content_type: self.content_type.clone(),
            body: self.body.to_vec(),
        }
    }
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        Self::new(wire.status_code, wire.content_type, wire.body)
    }
}

/// Result of one handler in a chain.
///
/// `Ok(None)` falls through to the next handler; `Err` ends the chain with
/// a 500 carrying the error's message.
pub type HandlerResult = anyhow::Result<Option<Response>>;

/// One link in a route's handler chain.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, request: Request) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, request: Request) -> HandlerResult {
        (self)(request).await
    }
}

/// Shared handler, as stored in a route.
pub type BoxedHandler = Arc<dyn Handler>;

/// Box a handler for registration.
pub fn handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
