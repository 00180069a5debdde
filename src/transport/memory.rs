// src/transport/memory.rs

//! In-memory transport implementation.
//!
//! This file contains the concrete implementation of the collaborator
//! traits (`ConnectionFactory`, `Connection`, `Session`, `Producer`,
//! `Consumer`) using in-process data structures only.
//!
//! The memory transport is the **reference implementation** of transport
//! semantics. Other transports are expected to approximate this behavior
//! as closely as their underlying systems allow.
//!
//! ## Semantics
//!
//! - Consumers receive every payload injected or sent on their channel
//!   after registration, in injection order.
//! - Producer sends resolve when the simulated acknowledgement completes;
//!   per-send delays can be scripted for ordering tests.
//! - Connection close drops every registered consumer inbox.
//!
//! ## Test handle
//!
//! `create_memory_factory()` also returns a [`MemoryBroker`] handle that
//! can inject inbound payloads, raise asynchronous connection errors, and
//! observe sends, in-flight concurrency, and consumer closes.
//!
//! ## Non-goals
//!
//! - Persistence or durability
//! - Network behavior beyond the scripted failures above
//! - Emulation of any specific broker's wire semantics

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::lock::lock_ignore_poison;
use crate::{
    //
    ChannelId,
    Connection,
    ConnectionFactory,
    ConnectionFactoryPtr,
    ConnectionPtr,
    Consumer,
    ConsumerPtr,
    ContextConfig,
    Error,
    Payload,
    Producer,
    ProducerPtr,
    Result,
    Session,
    SessionPtr,
};

type ConsumerRegistry = HashMap<ChannelId, Vec<(u64, mpsc::UnboundedSender<Payload>)>>;

struct BrokerInner {
    // ---
    started: AtomicBool,
    closed: AtomicBool,

    /// Registered consumer inboxes per channel.
    consumers: Mutex<ConsumerRegistry>,
    next_consumer_id: AtomicU64,

    /// Error listener channel, installed by `take_error_events()`.
    error_tx: Mutex<Option<mpsc::UnboundedSender<Error>>>,

    // Scripted failures.
    refuse_connect: AtomicBool,
    refuse_sessions: AtomicBool,
    refuse_endpoints: AtomicBool,
    fail_next_send: AtomicBool,
    send_delays: Mutex<VecDeque<Duration>>,

    // Observations.
    sent: Mutex<Vec<(ChannelId, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    consumer_closes: AtomicUsize,
    connection_closes: AtomicUsize,
}

impl BrokerInner {
    /// Deliver one payload to every consumer registered on `channel`.
    fn deliver(&self, channel: &ChannelId, payload: Payload) {
        // ---
        let targets: Vec<mpsc::UnboundedSender<Payload>> = {
            let consumers = lock_ignore_poison(&self.consumers);
            consumers
                .get(channel)
                .map(|entries| entries.iter().map(|(_, tx)| tx.clone()).collect())
                .unwrap_or_default()
        };

        for tx in targets {
            // A closed inbox means the consumer was closed concurrently.
            let _ = tx.send(payload.clone());
        }
    }
}

/// Test and demo handle onto the in-memory broker.
///
/// Cheap to clone; all clones observe the same broker state.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Inject an inbound text payload on `channel`.
    pub fn inject_text(&self, channel: impl Into<ChannelId>, text: impl Into<String>) {
        self.inner.deliver(&channel.into(), Payload::Text(text.into()));
    }

    /// Inject an inbound structured map payload on `channel`.
    pub fn inject_map(&self, channel: impl Into<ChannelId>, map: Map<String, Value>) {
        self.inner.deliver(&channel.into(), Payload::Map(map));
    }

    /// Raise an asynchronous connection error, as a broker client would
    /// from its exception listener.
    pub fn raise_error(&self, message: impl Into<String>) {
        // ---
        let error_tx = lock_ignore_poison(&self.inner.error_tx);
        if let Some(tx) = error_tx.as_ref() {
            let _ = tx.send(Error::Transport(message.into()));
        }
    }

    /// Make the next `create_connection()` call fail.
    pub fn refuse_connections(&self) {
        self.inner.refuse_connect.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_session()` call fail.
    pub fn refuse_sessions(&self) {
        self.inner.refuse_sessions.store(true, Ordering::SeqCst);
    }

    /// Make producer/consumer creation fail until cleared.
    pub fn refuse_endpoints(&self, refuse: bool) {
        self.inner.refuse_endpoints.store(refuse, Ordering::SeqCst);
    }

    /// Make the next producer send report failure.
    pub fn fail_next_send(&self) {
        self.inner.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Script an acknowledgement delay for the next send (FIFO per call).
    pub fn push_send_delay(&self, delay: Duration) {
        lock_ignore_poison(&self.inner.send_delays).push_back(delay);
    }

    /// Every acknowledged send so far, in acknowledgement order.
    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        lock_ignore_poison(&self.inner.sent).clone()
    }

    /// Number of sends in flight right now.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of sends that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of consumers currently registered on `channel`.
    pub fn open_consumers(&self, channel: impl Into<ChannelId>) -> usize {
        // ---
        let consumers = lock_ignore_poison(&self.inner.consumers);
        consumers.get(&channel.into()).map_or(0, Vec::len)
    }

    /// Total `Consumer::close()` calls that performed work.
    pub fn consumer_close_count(&self) -> usize {
        self.inner.consumer_closes.load(Ordering::SeqCst)
    }

    /// Total connection closes that performed work.
    pub fn connection_close_count(&self) -> usize {
        self.inner.connection_closes.load(Ordering::SeqCst)
    }
}

struct MemoryConnectionFactory {
    inner: Arc<BrokerInner>,
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create_connection(&self, config: &ContextConfig) -> Result<ConnectionPtr> {
        // ---
        if self.inner.refuse_connect.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "broker refused connection for {}",
                config.context_id
            )));
        }

        let (error_tx, error_rx) = mpsc::unbounded_channel();
        *lock_ignore_poison(&self.inner.error_tx) = Some(error_tx);

        Ok(Arc::new(MemoryConnection {
            broker: self.inner.clone(),
            error_rx: Mutex::new(Some(error_rx)),
        }))
    }
}

struct MemoryConnection {
    // ---
    broker: Arc<BrokerInner>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn start(&self) -> Result<()> {
        // ---
        if self.broker.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection already closed".to_string()));
        }
        self.broker.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.broker.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.broker.connection_closes.fetch_add(1, Ordering::SeqCst);

        // Dropping the senders ends every consumer inbox.
        lock_ignore_poison(&self.broker.consumers).clear();
        *lock_ignore_poison(&self.broker.error_tx) = None;
        Ok(())
    }

    async fn create_session(&self) -> Result<SessionPtr> {
        // ---
        if !self.broker.started.load(Ordering::SeqCst) {
            return Err(Error::Connection(
                "session requested before connection start".to_string(),
            ));
        }
        if self.broker.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection already closed".to_string()));
        }
        if self.broker.refuse_sessions.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection(
                "broker refused session creation".to_string(),
            ));
        }
        Ok(Arc::new(MemorySession {
            broker: self.broker.clone(),
        }))
    }

    fn take_error_events(&self) -> Option<mpsc::UnboundedReceiver<Error>> {
        lock_ignore_poison(&self.error_rx).take()
    }
}

struct MemorySession {
    broker: Arc<BrokerInner>,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession").finish_non_exhaustive()
    }
}

impl MemorySession {
    fn check_open(&self, channel: &ChannelId) -> Result<()> {
        // ---
        if self.broker.closed.load(Ordering::SeqCst) {
            return Err(Error::Endpoint {
                channel: channel.clone(),
                reason: "connection already closed".to_string(),
            });
        }
        if self.broker.refuse_endpoints.load(Ordering::SeqCst) {
            return Err(Error::Endpoint {
                channel: channel.clone(),
                reason: "broker refused endpoint creation".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    async fn create_producer(&self, channel: &ChannelId) -> Result<ProducerPtr> {
        // ---
        self.check_open(channel)?;
        Ok(Arc::new(MemoryProducer {
            broker: self.broker.clone(),
            channel: channel.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(&self, channel: &ChannelId) -> Result<ConsumerPtr> {
        // ---
        self.check_open(channel)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.broker.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        lock_ignore_poison(&self.broker.consumers)
            .entry(channel.clone())
            .or_default()
            .push((id, tx));

        Ok(Arc::new(MemoryConsumer {
            broker: self.broker.clone(),
            channel: channel.clone(),
            id,
            closed: AtomicBool::new(false),
            inbox: Mutex::new(Some(rx)),
        }))
    }
}

struct MemoryProducer {
    // ---
    broker: Arc<BrokerInner>,
    channel: ChannelId,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Producer for MemoryProducer {
    /// Send one payload: mark it in flight, honor any scripted
    /// acknowledgement delay, then deliver and acknowledge.
    async fn send(&self, payload: Payload) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) || self.broker.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("send on closed producer".to_string()));
        }

        let in_flight = self.broker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.broker.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = lock_ignore_poison(&self.broker.send_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = if self.broker.fail_next_send.swap(false, Ordering::SeqCst) {
            Err(Error::Transport("send failed".to_string()))
        } else {
            match payload.clone().into_text() {
                Ok(text) => {
                    lock_ignore_poison(&self.broker.sent).push((self.channel.clone(), text));
                    self.broker.deliver(&self.channel, payload);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        self.broker.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConsumer {
    // ---
    broker: Arc<BrokerInner>,
    channel: ChannelId,
    id: u64,
    closed: AtomicBool,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Payload>>>,
}

#[async_trait::async_trait]
impl Consumer for MemoryConsumer {
    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Payload>> {
        lock_ignore_poison(&self.inbox).take()
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.broker.consumer_closes.fetch_add(1, Ordering::SeqCst);

        let mut consumers = lock_ignore_poison(&self.broker.consumers);
        if let Some(entries) = consumers.get_mut(&self.channel) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                consumers.remove(&self.channel);
            }
        }
        Ok(())
    }
}

/// Create a new in-memory connection factory plus its broker handle.
///
/// The factory is always available and requires no external resources.
pub fn create_memory_factory() -> (ConnectionFactoryPtr, MemoryBroker) {
    // ---
    let inner = Arc::new(BrokerInner {
        started: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        consumers: Mutex::new(HashMap::new()),
        next_consumer_id: AtomicU64::new(0),
        error_tx: Mutex::new(None),
        refuse_connect: AtomicBool::new(false),
        refuse_sessions: AtomicBool::new(false),
        refuse_endpoints: AtomicBool::new(false),
        fail_next_send: AtomicBool::new(false),
        send_delays: Mutex::new(VecDeque::new()),
        sent: Mutex::new(Vec::new()),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        consumer_closes: AtomicUsize::new(0),
        connection_closes: AtomicUsize::new(0),
    });

    let factory = Arc::new(MemoryConnectionFactory {
        inner: inner.clone(),
    });

    (factory, MemoryBroker { inner })
}
