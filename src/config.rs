// src/config.rs

//! Public, transport-agnostic context configuration.
//!
//! This type intentionally contains no transport-specific concepts.
//! Transport layers are responsible for interpreting this config into
//! concrete connection settings.

/// Connection parameters for opening a messaging context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Transport connection URI.
    ///
    /// For broker-based transports this names the broker address
    /// (e.g. `"mqtt://localhost:1883"`). For the in-memory transport it
    /// may be `None`.
    pub transport_uri: Option<String>,

    /// Identifier for this context instance, used for logging and for
    /// transport client identification.
    pub context_id: String,

    /// Broker connection keep-alive interval in seconds (`None` leaves
    /// the transport default in place).
    pub keep_alive_secs: Option<u16>,
}

impl ContextConfig {
    /// Configuration for the in-memory transport.
    ///
    /// Useful in tests and examples; no external resources are required.
    pub fn memory(context_id: impl Into<String>) -> Self {
        // ---
        Self {
            transport_uri: None,
            context_id: context_id.into(),
            keep_alive_secs: None,
        }
    }

    /// Configuration for a broker-based transport at `uri`.
    pub fn with_uri(uri: impl Into<String>, context_id: impl Into<String>) -> Self {
        // ---
        Self {
            transport_uri: Some(uri.into()),
            context_id: context_id.into(),
            keep_alive_secs: None,
        }
    }
}
