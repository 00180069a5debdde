// src/subscriber.rs

//! Subscriber endpoint: a lazy, multi-consumer push stream over one
//! transport consumer.
//!
//! # Fan-out model
//!
//! Each attachment registers a sink in the endpoint's registry. The
//! transport consumer is created on the first attachment and closed when
//! the last sink detaches; the endpoint itself stays reusable, so a later
//! attachment reopens the consumer. One dispatch task reads the consumer
//! inbox and forwards every decoded message to all currently attached
//! sinks, so any number of independent streams ride a single underlying
//! subscription.
//!
//! All notification paths snapshot the sink registry before iterating.
//! A sink may detach itself from inside its own handler without
//! corrupting dispatch.
//!
//! # Reentrancy and locking
//!
//! Attachments (which may await consumer creation) are serialized through
//! an async gate; the registry itself sits behind a plain mutex so that
//! detach stays synchronous and usable from `Drop`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lock::lock_ignore_poison;
use crate::macros::{log_debug, log_warn};
use crate::{ChannelId, Consumer, ConsumerPtr, Error, Payload, Result, Session, SessionPtr};

/// Event delivered to an attached sink.
enum StreamEvent {
    /// One decoded inbound message.
    Message(String),

    /// Terminal error; the stream yields it once and ends.
    Error(Error),

    /// Terminal completion from endpoint disposal.
    Completed,
}

type SinkSender = mpsc::UnboundedSender<StreamEvent>;

struct FanoutState {
    // ---
    next_sink_id: u64,
    sinks: HashMap<u64, SinkSender>,

    /// Transport consumer; present iff `sinks` is non-empty (modulo the
    /// instant between first-sink insertion and consumer installation,
    /// which both happen under the attach gate).
    consumer: Option<ConsumerPtr>,

    /// Dispatch loop handle, aborted when the consumer closes.
    dispatch: Option<JoinHandle<()>>,

    disposed: bool,
}

pub(crate) struct SubscriberShared {
    // ---
    channel: ChannelId,
    session: SessionPtr,

    /// Serializes attachments and disposal so at most one task is ever
    /// creating or installing a consumer.
    attach_gate: tokio::sync::Mutex<()>,

    state: Mutex<FanoutState>,
}

/// Multi-consumer stream endpoint bound to one channel.
///
/// Cheap to clone (internally `Arc`-backed); all clones share one sink
/// registry and one underlying consumer.
#[derive(Clone)]
pub struct Subscriber {
    shared: Arc<SubscriberShared>,
}

impl Subscriber {
    /// Build a subscriber for `channel`. Consumer creation is deferred
    /// until the first attachment. Called by the context.
    pub(crate) fn new(channel: ChannelId, session: SessionPtr) -> Self {
        // ---
        Self {
            shared: Arc::new(SubscriberShared {
                channel,
                session,
                attach_gate: tokio::sync::Mutex::new(()),
                state: Mutex::new(FanoutState {
                    next_sink_id: 0,
                    sinks: HashMap::new(),
                    consumer: None,
                    dispatch: None,
                    disposed: false,
                }),
            }),
        }
    }

    /// Channel this subscriber is bound to.
    pub fn channel(&self) -> &ChannelId {
        &self.shared.channel
    }

    /// Attach a new sink and return its stream.
    ///
    /// The first attachment creates the transport consumer; later ones
    /// reuse it. Every attached stream receives every inbound message.
    ///
    /// # Errors
    ///
    /// - `Error::Disposed` after `dispose()`.
    /// - `Error::Endpoint` if consumer creation fails; the endpoint is
    ///   left without the new sink and without a consumer.
    pub async fn attach(&self) -> Result<MessageStream> {
        // ---
        let _gate = self.shared.attach_gate.lock().await;

        // The sink is registered in the same lock scope that inspects the
        // consumer slot, so a concurrent last-detach can never observe an
        // empty registry while this attachment is in progress.
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink_id, needs_consumer) = {
            let mut state = lock_ignore_poison(&self.shared.state);
            if state.disposed {
                return Err(Error::Disposed);
            }
            let id = state.next_sink_id;
            state.next_sink_id += 1;
            state.sinks.insert(id, tx);
            (id, state.consumer.is_none())
        };

        if needs_consumer {
            if let Err(err) = self.open_consumer().await {
                lock_ignore_poison(&self.shared.state).sinks.remove(&sink_id);
                return Err(err);
            }
        }

        Ok(MessageStream {
            shared: Arc::downgrade(&self.shared),
            sink_id,
            inbox: rx,
            terminated: false,
        })
    }

    /// Create the transport consumer and start its dispatch loop.
    ///
    /// Caller holds the attach gate.
    async fn open_consumer(&self) -> Result<()> {
        // ---
        let consumer = self.shared.session.create_consumer(&self.shared.channel).await?;

        let Some(inbox) = consumer.take_inbox() else {
            if let Err(_err) = consumer.close().await {
                log_warn!("closing inbox-less consumer on {}: {_err}", self.shared.channel);
            }
            return Err(Error::Endpoint {
                channel: self.shared.channel.clone(),
                reason: "consumer inbox already taken".to_string(),
            });
        };

        let dispatch = tokio::spawn(run_dispatch(Arc::downgrade(&self.shared), inbox));

        let mut state = lock_ignore_poison(&self.shared.state);
        state.consumer = Some(consumer);
        state.dispatch = Some(dispatch);
        Ok(())
    }

    /// Deliver a terminal error to every currently attached sink.
    ///
    /// Sinks are snapshotted before iteration; membership is not changed
    /// here (teardown follows separately).
    pub(crate) fn notify_error(&self, err: &Error) {
        // ---
        let sinks: Vec<SinkSender> = {
            let state = lock_ignore_poison(&self.shared.state);
            state.sinks.values().cloned().collect()
        };

        for sink in sinks {
            let _ = sink.send(StreamEvent::Error(err.clone()));
        }
    }

    /// Dispose this endpoint: signal completion to every attached sink,
    /// detach them all, and close the consumer if one is open.
    ///
    /// Idempotent; disposing an already-inert endpoint is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        // ---
        let _gate = self.shared.attach_gate.lock().await;

        let (sinks, consumer, dispatch) = {
            let mut state = lock_ignore_poison(&self.shared.state);
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
            let sinks: Vec<SinkSender> = state.sinks.drain().map(|(_, tx)| tx).collect();
            (sinks, state.consumer.take(), state.dispatch.take())
        };

        for sink in sinks {
            let _ = sink.send(StreamEvent::Completed);
        }
        if let Some(dispatch) = dispatch {
            dispatch.abort();
        }
        match consumer {
            Some(consumer) => consumer.close().await,
            None => Ok(()),
        }
    }
}

/// Dispatch loop: forward each decoded inbound message to a snapshot of
/// the attached sinks. Ends when the consumer inbox closes or the
/// endpoint is dropped.
async fn run_dispatch(shared: Weak<SubscriberShared>, mut inbox: mpsc::UnboundedReceiver<Payload>) {
    // ---
    while let Some(payload) = inbox.recv().await {
        let text = match payload.into_text() {
            Ok(text) => text,
            Err(_err) => {
                log_warn!("dropping undecodable inbound payload: {_err}");
                continue;
            }
        };

        let Some(shared) = shared.upgrade() else {
            break;
        };

        let sinks: Vec<SinkSender> = {
            let state = lock_ignore_poison(&shared.state);
            state.sinks.values().cloned().collect()
        };
        for sink in sinks {
            // A closed inbox just means the stream was dropped between
            // snapshot and send.
            let _ = sink.send(StreamEvent::Message(text.clone()));
        }
    }

    log_debug!("subscriber dispatch loop ended");
}

/// Remove one sink; closing the consumer when the registry empties.
///
/// Synchronous and idempotent: removing a sink that is already gone is a
/// no-op. The consumer close itself runs on a background task so this
/// stays callable from `Drop`.
fn detach_sink(shared: &Arc<SubscriberShared>, sink_id: u64) {
    // ---
    let (consumer, dispatch) = {
        let mut state = lock_ignore_poison(&shared.state);
        if state.sinks.remove(&sink_id).is_none() {
            return;
        }
        if state.sinks.is_empty() && !state.disposed {
            (state.consumer.take(), state.dispatch.take())
        } else {
            (None, None)
        }
    };

    if let Some(dispatch) = dispatch {
        dispatch.abort();
    }
    if let Some(consumer) = consumer {
        // Outside a runtime (process teardown) the close is skipped; the
        // transport reclaims the consumer with the connection.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(_err) = consumer.close().await {
                    log_warn!("consumer close after last detach failed: {_err}");
                }
            });
        }
    }
}

/// One attachment's view of a subscriber endpoint.
///
/// Yields each inbound message as `Ok(text)`. A fatal transport error
/// surfaces as a single `Err` item, after which the stream ends; endpoint
/// disposal ends the stream without an error. Dropping the stream
/// detaches its sink.
pub struct MessageStream {
    // ---
    shared: Weak<SubscriberShared>,
    sink_id: u64,
    inbox: mpsc::UnboundedReceiver<StreamEvent>,
    terminated: bool,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

impl MessageStream {
    /// Detach this sink from its endpoint. Idempotent; also performed on
    /// drop. Detaching the last sink closes the underlying consumer.
    pub fn detach(&mut self) {
        // ---
        if let Some(shared) = self.shared.upgrade() {
            detach_sink(&shared, self.sink_id);
        }
        self.shared = Weak::new();
        self.inbox.close();
    }
}

impl Stream for MessageStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        // ---
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        match this.inbox.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Message(text))) => Poll::Ready(Some(Ok(text))),
            Poll::Ready(Some(StreamEvent::Error(err))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(StreamEvent::Completed)) | Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.detach();
    }
}
