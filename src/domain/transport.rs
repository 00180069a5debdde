// src/domain/transport.rs

//! Transport collaborator abstractions.
//!
//! This module defines the capability set the messaging core requires from
//! an underlying connection-oriented pub/sub transport. It intentionally
//! avoids any reference to concrete protocols, brokers, or client libraries;
//! the core only manages connection, session, producer, and consumer
//! lifecycles and never touches a wire format.
//!
//! Callback-style listener registration in classic messaging APIs
//! (`setMessageListener`, `setExceptionListener`) is expressed here as
//! taking a channel receiver exactly once: the owning side calls
//! `take_inbox()` / `take_error_events()` and drives the receiver from a
//! background task. Taking twice returns `None`, which preserves the
//! single-listener invariant.
//!
//! Concrete implementations live under `src/transport/`. The in-memory
//! transport provides the reference semantics.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{ContextConfig, Error, Result};

/// A channel identifier.
///
/// A `ChannelId` names a publish/subscribe topic. Its interpretation is
/// transport-specific; the core treats it as an opaque identifier. Many
/// publisher and subscriber endpoints may reference the same identifier
/// independently.
///
/// Channel identifiers are immutable, cheap to clone, and safe to share
/// across threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Arc<str>);

impl<T> From<T> for ChannelId
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        ChannelId(value.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transport message payload.
///
/// The transport delivers two recognized shapes: plain text, and a
/// structured key/value map. The subscriber core flattens map payloads to
/// a JSON object string before fan-out so downstream consumers always
/// observe a uniform text-shaped message.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Plain text payload, forwarded as-is.
    Text(String),

    /// Structured key/value payload, flattened to JSON text before
    /// delivery to sinks.
    Map(Map<String, Value>),
}

impl Payload {
    /// Flatten this payload to its uniform text form.
    ///
    /// Text payloads pass through untouched; map payloads are encoded as
    /// a single JSON object string.
    pub fn into_text(self) -> Result<String> {
        // ---
        match self {
            Payload::Text(text) => Ok(text),
            Payload::Map(map) => serde_json::to_string(&Value::Object(map))
                .map_err(|e| Error::Decode(e.to_string())),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

/// Factory for establishing transport connections.
///
/// Implementations interpret the [`ContextConfig`] into concrete connection
/// settings (broker URI, keep-alive, etc.). A factory may be invoked more
/// than once; each call yields an independent connection.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establish a new, not-yet-started connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the transport cannot be reached or
    /// the configuration is invalid. Synchronous construction failures in
    /// the underlying client must surface here as well, so callers never
    /// need a separate synchronous error path.
    async fn create_connection(&self, config: &ContextConfig) -> Result<ConnectionPtr>;
}

/// An established (but possibly not yet started) transport connection.
///
/// Exactly one messaging context owns a connection. The connection is
/// started once, may carry at most one error listener, and is closed
/// exactly once.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Start the connection. Sessions must not be created before start
    /// reports success.
    async fn start(&self) -> Result<()>;

    /// Close the connection and release transport resources.
    ///
    /// Implementations must tolerate repeated calls; only the first close
    /// performs work.
    async fn close(&self) -> Result<()>;

    /// Create a session on this started connection.
    async fn create_session(&self) -> Result<SessionPtr>;

    /// Take the stream of asynchronous transport errors.
    ///
    /// The connection supports at most one error listener: the first call
    /// returns the receiver, every later call returns `None`.
    fn take_error_events(&self) -> Option<mpsc::UnboundedReceiver<Error>>;
}

/// A session minting per-channel producers and consumers.
#[async_trait::async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Create a producer bound to `channel`.
    async fn create_producer(&self, channel: &ChannelId) -> Result<ProducerPtr>;

    /// Create a consumer bound to `channel`.
    async fn create_consumer(&self, channel: &ChannelId) -> Result<ConsumerPtr>;
}

/// An outbound endpoint for one channel.
///
/// Producers support at most one unacknowledged send at a time; `send()`
/// resolves when the transport acknowledges the message. Serializing sends
/// against that constraint is the publisher endpoint's job, not the
/// producer's.
#[async_trait::async_trait]
pub trait Producer: Send + Sync {
    /// Send one payload and wait for the transport acknowledgement.
    async fn send(&self, payload: Payload) -> Result<()>;

    /// Close the producer. Idempotent; no sends may follow.
    async fn close(&self) -> Result<()>;
}

/// An inbound endpoint for one channel.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    /// Take the inbound message stream.
    ///
    /// Single-listener invariant: the first call returns the receiver,
    /// every later call returns `None`. The receiver ends when the
    /// consumer or its connection closes.
    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Payload>>;

    /// Close the consumer and stop inbound delivery. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Shared connection-factory pointer.
pub type ConnectionFactoryPtr = Arc<dyn ConnectionFactory>;

/// Shared connection pointer.
pub type ConnectionPtr = Arc<dyn Connection>;

/// Shared session pointer.
pub type SessionPtr = Arc<dyn Session>;

/// Shared producer pointer.
pub type ProducerPtr = Arc<dyn Producer>;

/// Shared consumer pointer.
pub type ConsumerPtr = Arc<dyn Consumer>;
