//! The module facade.
//!
//! A [`Module`] is one named participant on the bus. Its name is also the
//! queue it serves and the routing key other modules address it by.

use async_trait::async_trait;
use bytes::Bytes;
use mesh_rpc::{InboundListener, RpcConfig, RpcError, RpcRequester, Session, Supervisor};
use serde::Serialize;
use shared_bus::BusConnector;
use shared_types::{Envelope, ReplyBody, User, Verb, CONTENT_TYPE_JSON};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, Instrument, Span};

use crate::error::ModuleError;
use crate::request::{BoxedHandler, Response};
use crate::router::Router;

/// A named service on the bus.
pub struct Module {
    name: String,
    config: RpcConfig,
    connector: Arc<dyn BusConnector>,
    router: Router,
    requester: Mutex<Option<Arc<RpcRequester>>>,
    listening: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    span: Span,
}

impl Module {
    /// Create a module and connect its outbound requester.
    ///
    /// Dialing follows `config.retry`; running out of attempts is returned
    /// as `ConnectExhausted`.
    pub async fn register(
        name: &str,
        config: RpcConfig,
        connector: Arc<dyn BusConnector>,
    ) -> Result<Self, ModuleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModuleError::EmptyName);
        }
        config.validate()?;

        let span = info_span!("module", module = %name);
        let requester = connect_requester(name, &config, connector.as_ref())
            .instrument(span.clone())
            .await?;
        let (shutdown, _) = watch::channel(false);

        span.in_scope(|| info!(broker = %redact(&config.broker_uri), "Module registered"));

        Ok(Self {
            name: name.to_string(),
            config,
            connector,
            router: Router::new(name),
            requester: Mutex::new(Some(Arc::new(requester))),
            listening: Arc::new(AtomicBool::new(false)),
            shutdown,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// The route table. Shared with the listener once [`Self::listen`] runs.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// True while the listener has a consumer on the module's queue.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Register a handler chain for `verb` and `pattern`.
    pub fn on_verb(
        &self,
        verb: Verb,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), ModuleError> {
        Ok(self.router.add_handler(verb, pattern, handlers)?)
    }

    pub fn get(
        &self,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), ModuleError> {
        self.on_verb(Verb::Get, pattern, handlers)
    }

    pub fn post(
        &self,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), ModuleError> {
        self.on_verb(Verb::Post, pattern, handlers)
    }

    pub fn put(
        &self,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), ModuleError> {
        self.on_verb(Verb::Put, pattern, handlers)
    }

    pub fn delete(
        &self,
        pattern: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<(), ModuleError> {
        self.on_verb(Verb::Delete, pattern, handlers)
    }

    /// Serve inbound calls until [`Self::shutdown`] or until connecting
    /// runs out of attempts.
    pub async fn listen(&self) -> Result<(), ModuleError> {
        let session = ListenSession {
            queue: self.name.clone(),
            broker_uri: self.config.broker_uri.clone(),
            connector: self.connector.clone(),
            router: self.router.clone(),
            max_in_flight: self.config.max_in_flight,
            listening: self.listening.clone(),
        };
        let supervisor = Supervisor::new(self.name.clone(), self.config.retry);

        info!(parent: &self.span, routes = self.router.route_count(), "Listening");
        let outcome = supervisor
            .run(&session, self.shutdown.subscribe())
            .instrument(self.span.clone())
            .await;
        self.listening.store(false, Ordering::SeqCst);
        outcome?;
        info!(parent: &self.span, "Stopped listening");
        Ok(())
    }

    /// Ask [`Self::listen`] to return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Call another module's capability.
    ///
    /// The target module is the first segment of `path`. An error envelope
    /// from the target comes back as a `Response` with its status code;
    /// only transport and protocol failures are errors.
    pub async fn call(
        &self,
        verb: Verb,
        path: &str,
        content_type: &str,
        body: impl Into<Bytes>,
        user: Option<User>,
    ) -> Result<Response, ModuleError> {
        let routing_key = routing_key(path)?;
        let body: Bytes = body.into();
        let envelope = Envelope::new(verb, path, content_type, body.to_vec(), user);
        let encoded = Bytes::from(envelope.encode()?);

        async {
            let requester = self.requester().await?;
            let reply = match self.config.call_timeout {
                Some(deadline) => {
                    requester
                        .call_with_deadline(&routing_key, CONTENT_TYPE_JSON, encoded, deadline)
                        .await?
                }
                None => requester.call(&routing_key, CONTENT_TYPE_JSON, encoded).await?,
            };

            let response = match ReplyBody::decode(&reply.body)? {
                ReplyBody::Response(wire) => Response::from(wire),
                ReplyBody::Error(failure) => {
                    Response::new(failure.status_code, CONTENT_TYPE_JSON, failure.encode())
                }
            };
            debug!(verb = %verb, path, status = response.status_code, "Call answered");
            Ok::<_, ModuleError>(response)
        }
        .instrument(self.span.clone())
        .await
    }

    /// [`Self::call`] with `value` encoded as a JSON body.
    pub async fn call_json<T: Serialize + ?Sized>(
        &self,
        verb: Verb,
        path: &str,
        value: &T,
        user: Option<User>,
    ) -> Result<Response, ModuleError> {
        let body = serde_json::to_vec(value).map_err(shared_types::WireError::Encode)?;
        self.call(verb, path, CONTENT_TYPE_JSON, body, user).await
    }

    /// The live requester, reconnecting first if its connection died.
    async fn requester(&self) -> Result<Arc<RpcRequester>, ModuleError> {
        let mut current = self.requester.lock().await;
        if let Some(requester) = current.as_ref().filter(|r| !r.is_closed()) {
            return Ok(requester.clone());
        }

        info!("Outbound connection lost, reconnecting");
        *current = None;
        let fresh = Arc::new(
            connect_requester(&self.name, &self.config, self.connector.as_ref()).await?,
        );
        *current = Some(fresh.clone());
        Ok(fresh)
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Dial and set up a requester, retrying per the config.
async fn connect_requester(
    label: &str,
    config: &RpcConfig,
    connector: &dyn BusConnector,
) -> Result<RpcRequester, RpcError> {
    config
        .retry
        .retry(label, || async {
            let channel = connector.dial(&config.broker_uri).await?;
            RpcRequester::connect(channel).await
        })
        .await
}

/// The module's inbound side, as the supervisor sees it.
struct ListenSession {
    queue: String,
    broker_uri: String,
    connector: Arc<dyn BusConnector>,
    router: Router,
    max_in_flight: usize,
    listening: Arc<AtomicBool>,
}

#[async_trait]
impl Session for ListenSession {
    type Connection = InboundListener;

    async fn connect(&self) -> Result<InboundListener, RpcError> {
        let channel = self.connector.dial(&self.broker_uri).await?;
        let listener = InboundListener::bind(
            channel,
            &self.queue,
            Arc::new(self.router.clone()),
            self.max_in_flight,
        )
        .await?;
        self.listening.store(true, Ordering::SeqCst);
        Ok(listener)
    }

    async fn serve(&self, listener: InboundListener) -> Result<(), RpcError> {
        let served = listener.serve().await;
        self.listening.store(false, Ordering::SeqCst);
        served
    }
}

/// Module name addressed by `path`: its first segment.
fn routing_key(path: &str) -> Result<String, ModuleError> {
    let target = path.split(['?', '#']).next().unwrap_or_default();
    let key = target
        .strip_prefix('/')
        .and_then(|rest| rest.split('/').next())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| ModuleError::NoRoutingKey(path.to_string()))?;

    Ok(percent_encoding::percent_decode_str(key)
        .decode_utf8_lossy()
        .into_owned())
}

/// Broker URI with any password masked, for logging.
fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return uri.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => uri.to_string(),
    }
}
