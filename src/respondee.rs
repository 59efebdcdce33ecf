//! Addressable response endpoints for pipelines running on another node.
//!
//! Where a [`ResponseSlot`](crate::slot::ResponseSlot) is a process-local
//! cell, a respondee is a short-lived mailbox task with an address that can be
//! handed to a remote pipeline stage. The wire message set is exactly
//! [`RespondeeMsg::Response`] and [`RespondeeMsg::Stop`]; everything else
//! (deadline, promise) stays on the asking side, owned by the task.
//!
//! Lifecycle: fresh -> responded | timed-out | stopped. A respondee that is
//! stopped (or lost with a killed pipeline) abandons its promise; the asker
//! observes [`Error::Shutdown`](crate::error::Error::Shutdown) or the
//! deadline, never a hang.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::error::Error;
use crate::slot::ResponseFuture;

/// Messages a respondee accepts. This is the full over-the-wire set.
#[derive(Debug)]
pub enum RespondeeMsg<S> {
    /// Deliver the response for the request this respondee was created for
    Response(S),
    /// Stop without responding; the asker's promise is abandoned
    Stop,
}

/// The address of a respondee.
///
/// Clonable and sendable across task boundaries; embedded in the envelope
/// routed to the pipeline so any stage, local or remote, can resolve the
/// caller's response.
pub struct RespondeeRef<S> {
    address: mpsc::Sender<RespondeeMsg<S>>,
}

impl<S> RespondeeRef<S> {
    /// Deliver the response. Returns `false` when the respondee already
    /// settled or stopped.
    pub fn respond(&self, value: S) -> bool {
        self.address.try_send(RespondeeMsg::Response(value)).is_ok()
    }

    /// Stop the respondee without responding.
    pub fn stop(&self) -> bool {
        self.address.try_send(RespondeeMsg::Stop).is_ok()
    }

    /// Whether the respondee task is still accepting messages.
    pub fn is_live(&self) -> bool {
        !self.address.is_closed()
    }
}

impl<S> Clone for RespondeeRef<S> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
        }
    }
}

/// Creates respondees on behalf of askers.
///
/// `create` spawns the mailbox task, arms its deadline, and hands back the
/// address plus the future the asker awaits. The deadline is enforced by the
/// respondee itself, so a remote resolver needs no clock agreement with the
/// asker.
pub struct RespondeeFactory<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S: Send + 'static> RespondeeFactory<S> {
    /// Create a new factory.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Create a respondee with the given deadline and diagnostic tag.
    ///
    /// Must be called from within a Tokio runtime, which hosts the mailbox
    /// task.
    pub fn create(
        &self,
        timeout: Duration,
        tag: impl Into<String>,
    ) -> (RespondeeRef<S>, ResponseFuture<S>) {
        // Capacity 2 absorbs a Response/Stop race without blocking either sender.
        let (address, mut mailbox) = mpsc::channel(2);
        let (promise, outcome) = oneshot::channel();
        let tag = tag.into();

        tokio::spawn(async move {
            tokio::select! {
                msg = mailbox.recv() => match msg {
                    Some(RespondeeMsg::Response(value)) => {
                        let _ = promise.send(Ok(value));
                    }
                    Some(RespondeeMsg::Stop) | None => {
                        // Abandon the promise; the asker sees Shutdown.
                    }
                },
                _ = sleep(timeout) => {
                    let _ = promise.send(Err(Error::timeout(tag)));
                }
            }
        });

        (RespondeeRef { address }, ResponseFuture::from_receiver(outcome))
    }
}

impl<S: Send + 'static> Default for RespondeeFactory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for RespondeeFactory<S> {
    fn clone(&self) -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}
