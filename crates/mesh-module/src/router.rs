//! Capability router.
//!
//! Routes are kept per verb in registration order. Dispatch finds the first
//! entry whose pattern fits the path and runs its handler chain until one
//! handler answers.
//!
//! ```text
//! bus payload ──▶ content type check ──▶ Envelope::decode
//!                                           │
//!                     path + query split ◀──┘
//!                           │
//!         routes[verb] ──▶ first matching pattern ──▶ handler chain
//!                                                        │
//!   WireResponse / ErrorEnvelope ◀───────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use mesh_rpc::{panic_message, Payload, RpcHandler};
use mesh_telemetry::DISPATCHES;
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use shared_types::{is_json, Envelope, ErrorEnvelope, Verb, CONTENT_TYPE_JSON};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::RouteError;
use crate::pattern::RoutePattern;
use crate::request::{BoxedHandler, Request, Response};

struct RouteEntry {
    pattern: RoutePattern,
    handlers: Vec<BoxedHandler>,
}

/// Verb and pattern table for one module.
///
/// Cloning is cheap and clones share the same table, so routes added after
/// the router was handed to a listener are still seen.
#[derive(Clone)]
pub struct Router {
    module: Arc<str>,
    routes: Arc<RwLock<HashMap<Verb, Vec<RouteEntry>>>>,
}

impl Router {
    /// Empty router. `module` labels logs and metrics.
    pub fn new(module: &str) -> Self {
        Self {
            module: Arc::from(module),
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append a route. Duplicate patterns are accepted; the earliest one wins.
    pub fn add_handler(
        &self,
        verb: Verb,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), RouteError> {
        let pattern = RoutePattern::parse(pattern)?;
        let handlers: Vec<BoxedHandler> = handlers.into_iter().collect();
        if handlers.is_empty() {
            return Err(RouteError::EmptyChain {
                pattern: pattern.to_string(),
            });
        }

        debug!(
            module = %self.module,
            verb = %verb,
            pattern = %pattern,
            handlers = handlers.len(),
            "Route registered"
        );
        self.routes
            .write()
            .entry(verb)
            .or_default()
            .push(RouteEntry { pattern, handlers });
        Ok(())
    }

    /// Number of registered routes across all verbs.
    pub fn route_count(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    /// Answer one bus payload. Never fails: every failure becomes an error
    /// envelope.
    pub async fn dispatch(&self, content_type: &str, body: &[u8]) -> Payload {
        let reply = match self.route(content_type, body).await {
            Ok(response) => {
                self.record(response.status_code);
                match response.to_wire().encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        warn!(module = %self.module, error = %e, "Failed to encode response");
                        ErrorEnvelope::internal(e.to_string()).encode()
                    }
                }
            }
            Err(failure) => {
                self.record(failure.status_code);
                failure.encode()
            }
        };
        Payload::new(CONTENT_TYPE_JSON, reply)
    }

    async fn route(&self, content_type: &str, body: &[u8]) -> Result<Response, ErrorEnvelope> {
        if !is_json(content_type) {
            warn!(module = %self.module, content_type, "Inbound call with non-JSON content type");
            return Err(ErrorEnvelope::internal(format!(
                "invalid rpc message content type {content_type:?}"
            )));
        }

        let envelope = Envelope::decode(body).map_err(|e| {
            warn!(module = %self.module, error = %e, "Malformed envelope");
            ErrorEnvelope::internal(e.to_string())
        })?;

        let (path, query) = split_target(&envelope.path);
        let Ok(verb) = envelope.verb() else {
            debug!(module = %self.module, verb = %envelope.verb, path = %path, "Unknown verb");
            return Err(ErrorEnvelope::not_found("Not Found"));
        };
        let Some((pattern, handlers, params)) = self.resolve(verb, &path) else {
            debug!(module = %self.module, verb = %verb, path = %path, "No route matched");
            return Err(ErrorEnvelope::not_found("Not Found"));
        };

        let request = Request {
            verb,
            path,
            query,
            content_type: envelope.content_type,
            body: Bytes::from(envelope.body),
            user: envelope.user,
            params,
        };

        for (position, handler) in handlers.iter().enumerate() {
            let outcome = AssertUnwindSafe(handler.call(request.clone()))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        module = %self.module,
                        verb = %verb,
                        path = %request.path,
                        handler = position,
                        panic = %message,
                        "Handler panicked"
                    );
                    return Err(ErrorEnvelope::internal(format!("handler panicked: {message}")));
                }
            };

            match result {
                Ok(Some(response)) => {
                    debug!(
                        module = %self.module,
                        verb = %verb,
                        path = %request.path,
                        pattern = %pattern,
                        status = response.status_code,
                        "Dispatched"
                    );
                    return Ok(response);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        module = %self.module,
                        verb = %verb,
                        path = %request.path,
                        handler = position,
                        error = %e,
                        "Handler failed"
                    );
                    return Err(ErrorEnvelope::internal(format!("{e:#}")));
                }
            }
        }

        warn!(
            module = %self.module,
            verb = %verb,
            path = %request.path,
            "Handler chain produced no response"
        );
        Err(ErrorEnvelope::internal("no response produced"))
    }

    /// First entry for `verb` whose pattern fits `path`. The table lock is
    /// released before any handler runs.
    fn resolve(
        &self,
        verb: Verb,
        path: &str,
    ) -> Option<(RoutePattern, Vec<BoxedHandler>, HashMap<String, String>)> {
        let routes = self.routes.read();
        routes.get(&verb)?.iter().find_map(|entry| {
            entry
                .pattern
                .matches(path)
                .map(|params| (entry.pattern.clone(), entry.handlers.clone(), params))
        })
    }

    fn record(&self, status: u16) {
        DISPATCHES
            .with_label_values(&[self.module.as_ref(), status.to_string().as_str()])
            .inc();
    }
}

#[async_trait]
impl RpcHandler for Router {
    async fn handle(&self, request: Payload) -> Payload {
        self.dispatch(&request.content_type, &request.body).await
    }
}

/// Split an envelope path into its percent-decoded path and its query
/// parameters.
fn split_target(target: &str) -> (String, HashMap<String, Vec<String>>) {
    let without_fragment = target.split('#').next().unwrap_or_default();
    let (raw_path, raw_query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));

    let path = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();

    let mut query: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        query
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    (path, query)
}
