// src/context.rs

//! Messaging context: owns one connection, one session, and every
//! publisher/subscriber endpoint derived from them.
//!
//! # Architecture
//!
//! `Context::open()` establishes the connection, starts it, creates the
//! session, and installs the connection's single error listener. A
//! background task classifies each asynchronous transport error:
//!
//! - *transient* (the transport is recovering on its own) — swallowed;
//!   no endpoint is notified, in-flight streams keep running across the
//!   transport's self-healing window;
//! - *fatal* (anything else) — every subscriber sink observes a terminal
//!   error, then every publisher and subscriber endpoint is disposed.
//!
//! `dispose()` tears down all endpoints first and closes the connection
//! last; its result is the connection close outcome. Both the fatal path
//! and `dispose()` are idempotent, so a fatal error followed by an
//! explicit dispose never double-closes anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;

use crate::lock::lock_ignore_poison;
use crate::macros::{log_debug, log_error, log_info, log_warn};
use crate::{
    //
    ChannelId,
    Connection,
    ConnectionFactory,
    ConnectionFactoryPtr,
    ConnectionPtr,
    ContextConfig,
    Error,
    ErrorClass,
    Publisher,
    Result,
    Session,
    SessionPtr,
    Subscriber,
};

/// Top-level messaging handle.
///
/// Cheap to clone (internally `Arc`-backed); all clones share one
/// connection and one set of endpoints.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

struct ContextInner {
    // ---
    connection: ConnectionPtr,
    session: SessionPtr,

    publishers: Mutex<Vec<Publisher>>,
    subscribers: Mutex<Vec<Subscriber>>,

    /// Set once endpoints have been torn down (fatal error or dispose).
    endpoints_down: AtomicBool,

    /// Error-classification loop handle, aborted on dispose.
    error_task: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    /// Open a context using the crate-default connection factory.
    ///
    /// Resolves once the transport reports a started connection and the
    /// session is ready. Construction failures inside the transport
    /// surface through the same `Result`, so callers never need a
    /// separate synchronous error path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if establishment fails; no partial
    /// context is exposed.
    pub async fn open(config: ContextConfig) -> Result<Self> {
        // ---
        let factory = crate::create_connection_factory(&config)?;
        Self::with_factory(factory, config).await
    }

    /// Open a context over an explicitly provided connection factory.
    ///
    /// This is the constructor you want for tests and for advanced users
    /// supplying their own transport implementation.
    pub async fn with_factory(factory: ConnectionFactoryPtr, config: ContextConfig) -> Result<Self> {
        // ---
        let connection = factory.create_connection(&config).await?;

        // Once the connection exists, every establishment failure must
        // close it before the error is returned; the caller never gets a
        // handle to it.
        let bootstrap = async {
            connection.start().await?;
            let session = connection.create_session().await?;
            // The context owns the connection's one error listener.
            let errors = connection.take_error_events().ok_or_else(|| {
                Error::Connection("connection error listener already installed".to_string())
            })?;
            Ok::<_, Error>((session, errors))
        };

        let (session, mut errors) = match bootstrap.await {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(_close_err) = connection.close().await {
                    log_warn!("closing connection after failed establishment: {_close_err}");
                }
                return Err(err);
            }
        };
        log_info!("messaging context {} connected", config.context_id);

        let inner = Arc::new_cyclic(|weak: &Weak<ContextInner>| {
            // ---
            let weak = weak.clone();

            let error_task = tokio::spawn(async move {
                // ---
                while let Some(err) = errors.recv().await {
                    match err.classify() {
                        ErrorClass::Transient => {
                            // Transport self-healing in progress; leave
                            // every endpoint untouched.
                            log_debug!("ignoring transient transport error: {err}");
                        }
                        ErrorClass::Fatal => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            log_error!("fatal transport error, tearing down endpoints: {err}");
                            let context = Context { inner };
                            context.tear_down_endpoints(Some(&err)).await;
                        }
                    }
                }
            });

            ContextInner {
                // ---
                connection,
                session,
                publishers: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                endpoints_down: AtomicBool::new(false),
                error_task: Mutex::new(Some(error_task)),
            }
        });

        Ok(Self { inner })
    }

    /// Create and register a publisher endpoint for `channel`.
    ///
    /// # Errors
    ///
    /// - `Error::Disposed` once the context has been torn down.
    /// - `Error::Endpoint` if producer creation fails; the context does
    ///   not register a broken endpoint.
    pub async fn new_publisher(&self, channel: impl Into<ChannelId>) -> Result<Publisher> {
        // ---
        if self.inner.endpoints_down.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }

        let channel = channel.into();
        let producer = self.inner.session.create_producer(&channel).await?;

        let publisher = Publisher::spawn(channel, producer);
        lock_ignore_poison(&self.inner.publishers).push(publisher.clone());
        Ok(publisher)
    }

    /// Create and register a subscriber endpoint for `channel`.
    ///
    /// Consumer creation is deferred until the first stream attaches, so
    /// this registers instantly; a later `attach()` may still fail with
    /// `Error::Endpoint`.
    pub async fn new_subscriber(&self, channel: impl Into<ChannelId>) -> Result<Subscriber> {
        // ---
        if self.inner.endpoints_down.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }

        let subscriber = Subscriber::new(channel.into(), self.inner.session.clone());
        lock_ignore_poison(&self.inner.subscribers).push(subscriber.clone());
        Ok(subscriber)
    }

    /// Dispose every live endpoint, then close the connection.
    ///
    /// Endpoint disposal always completes regardless of the close
    /// outcome; the returned result is the connection close result.
    /// Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        // ---
        self.tear_down_endpoints(None).await;

        let error_task = lock_ignore_poison(&self.inner.error_task).take();
        if let Some(error_task) = error_task {
            error_task.abort();
        }

        self.inner.connection.close().await
    }

    /// Tear down all endpoints exactly once.
    ///
    /// With `err` set (fatal path) every subscriber's sinks observe the
    /// terminal error before any endpoint is disposed. Per-endpoint
    /// disposal failures are logged, never propagated; already-inert
    /// endpoints are skipped by their own idempotence guards.
    async fn tear_down_endpoints(&self, err: Option<&Error>) {
        // ---
        if self.inner.endpoints_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let publishers: Vec<Publisher> =
            std::mem::take(&mut *lock_ignore_poison(&self.inner.publishers));
        let subscribers: Vec<Subscriber> =
            std::mem::take(&mut *lock_ignore_poison(&self.inner.subscribers));

        if let Some(err) = err {
            for subscriber in &subscribers {
                subscriber.notify_error(err);
            }
        }

        for subscriber in subscribers {
            if let Err(_err) = subscriber.dispose().await {
                log_warn!("subscriber disposal failed: {_err}");
            }
        }
        for publisher in publishers {
            if let Err(_err) = publisher.dispose().await {
                log_warn!("publisher disposal failed: {_err}");
            }
        }
    }
}
