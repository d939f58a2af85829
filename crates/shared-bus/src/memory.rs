//! # In-Memory Broker
//!
//! A single-process broker with the queue semantics modules expect from
//! AMQP:
//!
//! - the default exchange routes a message to the queue named by its
//!   routing key, and a message with no such queue is dropped;
//! - consumers of one queue share its messages round-robin;
//! - exclusive queues die with their connection;
//! - deliveries that were never acknowledged go back to the front of their
//!   queue, flagged `redelivered`, when their connection closes.
//!
//! [`InMemoryBroker::set_available`] and [`InMemoryBroker::sever_connections`]
//! simulate an unreachable broker and a dropped network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{check_uri, BusChannel, BusConnector, Publishing, QueueSpec, DEFAULT_EXCHANGE};
use crate::delivery::{Acker, Delivery, DeliveryStream};
use crate::error::BusError;

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    available: AtomicBool,
    dials: AtomicU64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    next_tag: u64,
}

struct Queue {
    owner: Option<u64>,
    auto_delete: bool,
    ready: VecDeque<Ready>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

struct Ready {
    message: Publishing,
    redelivered: bool,
}

struct Consumer {
    connection: u64,
    auto_ack: bool,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Connection {
    unacked: HashMap<u64, Unacked>,
}

struct Unacked {
    queue: String,
    message: Publishing,
}

impl State {
    fn ensure_open(&self, connection: u64) -> Result<(), BusError> {
        if self.connections.contains_key(&connection) {
            Ok(())
        } else {
            Err(BusError::ConnectionClosed)
        }
    }

    fn declare(&mut self, connection: u64, spec: QueueSpec) -> Result<String, BusError> {
        self.ensure_open(connection)?;

        let name = match spec.name {
            Some(name) if !name.is_empty() => name,
            _ => format!("amq.gen-{}", Uuid::new_v4().simple()),
        };

        if let Some(existing) = self.queues.get(&name) {
            return match existing.owner {
                Some(owner) if owner != connection => Err(BusError::ResourceLocked(name)),
                _ => Ok(name),
            };
        }

        self.queues.insert(
            name.clone(),
            Queue {
                owner: spec.exclusive.then_some(connection),
                auto_delete: spec.auto_delete,
                ready: VecDeque::new(),
                consumers: Vec::new(),
                cursor: 0,
            },
        );
        debug!(queue = %name, exclusive = spec.exclusive, "Queue declared");
        Ok(name)
    }

    fn publish(
        &mut self,
        connection: u64,
        exchange: &str,
        routing_key: &str,
        message: Publishing,
        shared: &Weak<Shared>,
    ) -> Result<(), BusError> {
        self.ensure_open(connection)?;
        if exchange != DEFAULT_EXCHANGE {
            return Err(BusError::ExchangeNotFound(exchange.to_string()));
        }

        let Some(queue) = self.queues.get_mut(routing_key) else {
            debug!(routing_key, "Message unroutable, dropped");
            return Ok(());
        };
        queue.ready.push_back(Ready {
            message,
            redelivered: false,
        });
        self.pump(routing_key, shared);
        Ok(())
    }

    fn consume(
        &mut self,
        connection: u64,
        queue_name: &str,
        auto_ack: bool,
        shared: &Weak<Shared>,
    ) -> Result<DeliveryStream, BusError> {
        self.ensure_open(connection)?;
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BusError::QueueNotFound(queue_name.to_string()))?;
        if queue.owner.is_some_and(|owner| owner != connection) {
            return Err(BusError::ResourceLocked(queue_name.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        queue.consumers.push(Consumer {
            connection,
            auto_ack,
            sender,
        });
        self.pump(queue_name, shared);
        Ok(DeliveryStream::new(receiver))
    }

    /// Hand ready messages to consumers until one side runs out.
    fn pump(&mut self, queue_name: &str, shared: &Weak<Shared>) {
        let State {
            queues,
            connections,
            next_tag,
            ..
        } = self;
        let Some(queue) = queues.get_mut(queue_name) else {
            return;
        };

        while !queue.consumers.is_empty() {
            let Some(ready) = queue.ready.pop_front() else {
                break;
            };
            let index = queue.cursor % queue.consumers.len();
            let connection = queue.consumers[index].connection;
            let auto_ack = queue.consumers[index].auto_ack;

            *next_tag += 1;
            let tag = *next_tag;
            let acker = if auto_ack {
                None
            } else {
                Some(Arc::new(MemoryAcker {
                    shared: shared.clone(),
                    connection,
                }) as Arc<dyn Acker>)
            };
            let delivery = Delivery::new(tag, ready.redelivered, ready.message.clone(), acker);

            if queue.consumers[index].sender.send(delivery).is_err() {
                // Stream dropped by its owner: cancel the consumer.
                queue.consumers.remove(index);
                queue.ready.push_front(ready);
                continue;
            }

            if !auto_ack {
                if let Some(conn) = connections.get_mut(&connection) {
                    conn.unacked.insert(
                        tag,
                        Unacked {
                            queue: queue_name.to_string(),
                            message: ready.message,
                        },
                    );
                }
            }
            queue.cursor = index + 1;
        }
    }

    fn settle(
        &mut self,
        connection: u64,
        tag: u64,
        requeue: bool,
        shared: &Weak<Shared>,
    ) -> Result<(), BusError> {
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(BusError::ConnectionClosed)?;
        let unacked = conn
            .unacked
            .remove(&tag)
            .ok_or(BusError::UnknownDeliveryTag(tag))?;

        if requeue {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                queue.ready.push_front(Ready {
                    message: unacked.message,
                    redelivered: true,
                });
                self.pump(&unacked.queue, shared);
            }
        }
        Ok(())
    }

    /// Tear down a connection. Returns false if it was already closed.
    fn close_connection(&mut self, connection: u64, shared: &Weak<Shared>) -> bool {
        let Some(conn) = self.connections.remove(&connection) else {
            return false;
        };

        self.queues.retain(|name, queue| {
            let had_consumers = !queue.consumers.is_empty();
            queue.consumers.retain(|c| c.connection != connection);
            let orphaned = queue.auto_delete && had_consumers && queue.consumers.is_empty();
            let keep = queue.owner != Some(connection) && !orphaned;
            if !keep {
                debug!(queue = %name, "Queue deleted with its connection");
            }
            keep
        });

        let mut unacked: Vec<(u64, Unacked)> = conn.unacked.into_iter().collect();
        unacked.sort_by_key(|(tag, _)| *tag);

        let mut touched = Vec::new();
        for (_, entry) in unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                queue.ready.push_front(Ready {
                    message: entry.message,
                    redelivered: true,
                });
                touched.push(entry.queue);
            }
        }
        touched.sort();
        touched.dedup();
        for name in touched {
            self.pump(&name, shared);
        }
        true
    }
}

struct MemoryAcker {
    shared: Weak<Shared>,
    connection: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BusError> {
        let shared = self.shared.upgrade().ok_or(BusError::ConnectionClosed)?;
        let mut state = shared.state.lock();
        state.settle(self.connection, delivery_tag, false, &self.shared)
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BusError> {
        let shared = self.shared.upgrade().ok_or(BusError::ConnectionClosed)?;
        let mut state = shared.state.lock();
        state.settle(self.connection, delivery_tag, requeue, &self.shared)
    }
}

/// Channel on one in-memory connection. Dropping it closes the connection.
struct MemoryChannel {
    shared: Arc<Shared>,
    connection: u64,
}

impl MemoryChannel {
    fn weak(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn shutdown(&self) -> bool {
        let closed = self
            .shared
            .state
            .lock()
            .close_connection(self.connection, &self.weak());
        if closed {
            debug!(connection = self.connection, "Connection closed");
        }
        closed
    }
}

#[async_trait]
impl BusChannel for MemoryChannel {
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BusError> {
        self.shared.state.lock().declare(self.connection, spec)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publishing,
    ) -> Result<(), BusError> {
        let weak = self.weak();
        self.shared
            .state
            .lock()
            .publish(self.connection, exchange, routing_key, message, &weak)
    }

    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BusError> {
        let weak = self.weak();
        self.shared
            .state
            .lock()
            .consume(self.connection, queue, auto_ack, &weak)
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.shutdown() {
            Ok(())
        } else {
            Err(BusError::ConnectionClosed)
        }
    }

    fn is_open(&self) -> bool {
        self.shared
            .state
            .lock()
            .connections
            .contains_key(&self.connection)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                available: AtomicBool::new(true),
                dials: AtomicU64::new(0),
            }),
        }
    }

    /// While unavailable every dial fails. Open connections are unaffected.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
        info!(available, "Broker availability changed");
    }

    /// Close every open connection, as a network drop would. Returns how many
    /// were closed.
    pub fn sever_connections(&self) -> usize {
        let weak = Arc::downgrade(&self.shared);
        let mut state = self.shared.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        let closed = ids
            .into_iter()
            .filter(|id| state.close_connection(*id, &weak))
            .count();
        warn!(closed, "Broker severed all connections");
        closed
    }

    /// Dial attempts so far, successful or not.
    #[must_use]
    pub fn dial_count(&self) -> u64 {
        self.shared.dials.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().connections.len()
    }

    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.shared.state.lock().queues.contains_key(name)
    }

    /// Messages waiting in `queue` that no consumer holds.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusConnector for InMemoryBroker {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn BusChannel>, BusError> {
        self.shared.dials.fetch_add(1, Ordering::SeqCst);

        check_uri(uri)?;
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(BusError::Dial {
                uri: uri.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let connection = {
            let mut state = self.shared.state.lock();
            state.next_connection += 1;
            let id = state.next_connection;
            state.connections.insert(id, Connection::default());
            id
        };
        debug!(connection, "Connection opened");

        Ok(Arc::new(MemoryChannel {
            shared: self.shared.clone(),
            connection,
        }))
    }
}
