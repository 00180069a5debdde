// src/publisher.rs

//! Publisher endpoint: an ordered sink over one transport producer.
//!
//! # Ordering model
//!
//! The transport supports at most one unacknowledged send per producer, so
//! the endpoint serializes all outbound values through a dedicated worker
//! task. `send()` enqueues and returns immediately; the worker takes one
//! value at a time and awaits the transport acknowledgement before taking
//! the next. FIFO order and the single-in-flight constraint both fall out
//! of that loop structure, and every `.await` yields to the scheduler, so
//! bursty input cannot grow the call stack.
//!
//! # Send failure
//!
//! A failed send marks the endpoint failed and stops the worker. Values
//! still queued at that point are discarded, and every subsequent `send()`
//! returns [`Error::PublisherFailed`]. The original transport error is
//! logged at warn level. (The alternative of silently leaving the queue
//! stalled hides the fault from the producer side entirely.)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lock::lock_ignore_poison;
use crate::macros::log_warn;
use crate::{ChannelId, Error, Payload, Producer, ProducerPtr, Result};

/// Ordered sink bound to one channel.
///
/// Cheap to clone (internally `Arc`-backed); all clones feed the same
/// queue and share the same lifecycle.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

struct PublisherInner {
    // ---
    channel: ChannelId,
    producer: ProducerPtr,

    /// Taken (and dropped) on dispose so the worker's `recv()` ends.
    queue_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,

    /// Set when a transport send fails; the endpoint refuses further values.
    failed: AtomicBool,

    /// Set by `dispose()`; checked before `failed` so a disposed endpoint
    /// reports `Disposed` rather than a stale failure.
    disposed: AtomicBool,

    /// Queue worker handle, taken (and awaited) on dispose.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    /// Build a publisher around an existing producer and spawn its queue
    /// worker. Called by the context; not part of the public surface.
    pub(crate) fn spawn(channel: ChannelId, producer: ProducerPtr) -> Self {
        // ---
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<String>();

        let inner = Arc::new_cyclic(|weak: &Weak<PublisherInner>| {
            // ---
            let weak = weak.clone();
            let worker_producer = producer.clone();
            let worker_channel = channel.clone();

            // One value in flight at a time: the next queued value is not
            // taken until the transport acknowledges the previous send.
            // Disposal is observed between sends, never mid-send, so an
            // in-flight acknowledgement always settles.
            let worker = tokio::spawn(async move {
                // ---
                while let Some(value) = queue_rx.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    if inner.disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(_err) = worker_producer.send(Payload::Text(value)).await {
                        log_warn!("send on channel {worker_channel} failed: {_err}");
                        inner.failed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            });

            PublisherInner {
                // ---
                channel,
                producer,
                queue_tx: Mutex::new(Some(queue_tx)),
                failed: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                worker: Mutex::new(Some(worker)),
            }
        });

        Self { inner }
    }

    /// Channel this publisher is bound to.
    pub fn channel(&self) -> &ChannelId {
        &self.inner.channel
    }

    /// Enqueue one value for ordered delivery.
    ///
    /// Returns immediately; delivery happens asynchronously in submission
    /// order with at most one send in flight.
    ///
    /// # Errors
    ///
    /// - `Error::Disposed` after `dispose()`.
    /// - `Error::PublisherFailed` once a transport send has failed.
    pub fn send(&self, value: impl Into<String>) -> Result<()> {
        // ---
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        if self.inner.failed.load(Ordering::SeqCst) {
            return Err(Error::PublisherFailed(self.inner.channel.clone()));
        }

        let queue_tx = lock_ignore_poison(&self.inner.queue_tx);
        match queue_tx.as_ref() {
            Some(tx) => tx
                .send(value.into())
                .map_err(|_| Error::PublisherFailed(self.inner.channel.clone())),
            None => Err(Error::Disposed),
        }
    }

    /// Dispose this endpoint: stop the queue worker, discard any pending
    /// values, and close the transport producer.
    ///
    /// A send already in flight is allowed to settle before the producer
    /// closes; only queued-but-unsent values are discarded.
    ///
    /// Idempotent; disposing an already-inert endpoint is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        // ---
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the sender ends the worker's `recv()` once the current
        // send settles; the `disposed` flag makes it discard whatever is
        // still queued. No durability guarantee covers those values.
        lock_ignore_poison(&self.inner.queue_tx).take();

        let worker = lock_ignore_poison(&self.inner.worker).take();
        if let Some(worker) = worker {
            if let Err(_err) = worker.await {
                log_warn!("publisher worker on {} ended abnormally: {_err}", self.inner.channel);
            }
        }

        self.inner.producer.close().await
    }
}
