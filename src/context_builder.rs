// src/context_builder.rs

//! Fluent builder for opening a messaging context.
//!
//! Thin sugar over [`ContextConfig`] plus [`Context::open`] /
//! [`Context::with_factory`], with required-field validation at
//! `build()` time.

use crate::{ConnectionFactoryPtr, Context, ContextConfig, Error, Result};

/// Builder for [`Context`] instances.
///
/// # Examples
///
/// ## Default (in-memory) transport
/// ```no_run
/// use mom_streams::ContextBuilder;
///
/// # async fn example() -> mom_streams::Result<()> {
/// let context = ContextBuilder::new()
///     .context_id("ticker-app")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Broker transport with keep-alive
/// ```no_run
/// use mom_streams::ContextBuilder;
///
/// # async fn example() -> mom_streams::Result<()> {
/// let context = ContextBuilder::new()
///     .uri("mqtt://localhost:1883")
///     .context_id("ticker-app")
///     .keep_alive_secs(30)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    // ---
    uri: Option<String>,
    context_id: Option<String>,
    keep_alive_secs: Option<u16>,
    factory: Option<ConnectionFactoryPtr>,
}

impl ContextBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport URI. Optional; omitting it selects the
    /// in-memory transport.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the context identifier (required).
    pub fn context_id(mut self, id: impl Into<String>) -> Self {
        self.context_id = Some(id.into());
        self
    }

    /// Set the broker keep-alive interval in seconds.
    pub fn keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Supply an explicit connection factory instead of the
    /// crate-default selection. Intended for tests and custom
    /// transport implementations.
    pub fn factory(mut self, factory: ConnectionFactoryPtr) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate the configuration and open the context.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `context_id` was not set.
    /// - Any error from [`Context::open`].
    pub async fn build(self) -> Result<Context> {
        // ---
        let context_id = self
            .context_id
            .ok_or_else(|| Error::Config("context_id is required".to_string()))?;

        let config = ContextConfig {
            transport_uri: self.uri,
            context_id,
            keep_alive_secs: self.keep_alive_secs,
        };

        match self.factory {
            Some(factory) => Context::with_factory(factory, config).await,
            None => Context::open(config).await,
        }
    }
}
