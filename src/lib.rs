//! Channel-scoped publishers and push streams over message-oriented
//! pub/sub transports.
//!
//! This library turns a connection-oriented, callback-driven messaging
//! transport into a small set of composable primitives:
//!
//! - a [`Context`] owning one connection and session,
//! - named [`Publisher`] sinks that deliver values to a channel strictly
//!   in submission order with at most one send in flight,
//! - named [`Subscriber`] endpoints whose [`MessageStream`] attachments
//!   fan every inbound message out to any number of independent
//!   consumers over a single underlying subscription,
//! - a transient/fatal classification of asynchronous transport errors,
//!   so broker self-healing never destroys in-flight streams while
//!   unrecoverable failures fully unwind.
//!
//! Streams implement [`futures::Stream`], so downstream composition
//! (filter, map, buffering, merging) is ordinary `StreamExt` usage.

// Import all sub modules once...
mod config;
mod context;
mod context_builder;
mod domain;
mod error;
mod lock;
mod macros;
mod publisher;
mod subscriber;
mod transport;

// Re-export main types
pub use context::Context;
pub use context_builder::ContextBuilder;
pub use publisher::Publisher;
pub use subscriber::{MessageStream, Subscriber};

pub use config::ContextConfig;
pub use error::{Error, ErrorClass, Result};

pub use transport::{create_memory_factory, MemoryBroker};

// --- public re-exports
pub use domain::{
    //
    ChannelId,
    Connection,
    ConnectionFactory,
    ConnectionFactoryPtr,
    ConnectionPtr,
    Consumer,
    ConsumerPtr,
    Payload,
    Producer,
    ProducerPtr,
    Session,
    SessionPtr,
};

/// Select a connection factory for `config`.
///
/// Only the in-memory transport is bundled; broker-backed factories are
/// supplied by callers via [`Context::with_factory`]. A broker URI in
/// `config` therefore has no bundled interpretation and is rejected.
pub fn create_connection_factory(config: &ContextConfig) -> Result<ConnectionFactoryPtr> {
    // ---
    match config.transport_uri.as_deref() {
        None | Some("memory://") => Ok(create_memory_factory().0),
        Some(other) => Err(Error::Config(format!(
            "no bundled transport for uri {other:?}; supply a factory via Context::with_factory"
        ))),
    }
}
