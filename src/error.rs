// src/error.rs

//! Error taxonomy and transport error classification.
//!
//! Every variant carries owned string data so the enum stays `Clone`;
//! a single fatal transport error is fanned out to many subscriber sinks.

use thiserror::Error;

use crate::ChannelId;

/// Errors that can occur while operating a messaging context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connection establishment failed. Surfaced by `Context::open()`;
    /// no partial context is ever exposed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Asynchronous error raised by the transport on an established
    /// connection. Subject to transient/fatal classification.
    #[error("transport error: {0}")]
    Transport(String),

    /// Creating a producer or consumer for one channel failed. Local to
    /// that endpoint; the context does not register a broken endpoint.
    #[error("endpoint creation failed on channel {channel}: {reason}")]
    Endpoint { channel: ChannelId, reason: String },

    /// A publisher's transport send failed. The endpoint stops draining
    /// its queue and refuses further values.
    #[error("publisher on channel {0} failed; value not accepted")]
    PublisherFailed(ChannelId),

    /// Operation attempted on a disposed context or endpoint.
    #[error("context or endpoint already disposed")]
    Disposed,

    /// An inbound map payload could not be flattened to text.
    #[error("malformed map payload: {0}")]
    Decode(String),

    /// Invalid or incomplete builder/connection configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for messaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of classifying an asynchronous transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The transport is recovering on its own; swallow the error and
    /// leave every endpoint untouched.
    Transient,

    /// Unrecoverable. Every subscriber sink observes a terminal error and
    /// all endpoints are torn down.
    Fatal,
}

/// Message fragments that mark a transport error as self-healing.
///
/// These cover the connection drop / interrupt / reconnect / restore
/// signals a broker client emits while its link recovers, plus the
/// acknowledgement-receipt timeout seen on an otherwise healthy link.
/// Matching is case-insensitive substring search.
const TRANSIENT_PATTERNS: [&str; 5] = [
    "connection dropped",
    "connection interrupted",
    "attempting to reconnect",
    "connection restored",
    "message receipt was not received",
];

impl Error {
    /// Classify this error as transient or fatal.
    ///
    /// Only asynchronous transport errors can be transient; every other
    /// variant reaching the classifier is fatal by construction.
    pub fn classify(&self) -> ErrorClass {
        // ---
        let message = match self {
            Error::Transport(msg) => msg,
            _ => return ErrorClass::Fatal,
        };

        let lowered = message.to_ascii_lowercase();
        if TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }
}
