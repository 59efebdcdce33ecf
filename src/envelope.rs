//! The unit that traverses a processor's input queue: a request paired with
//! the handle its response is delivered through.

use crate::error::Error;
use crate::respondee::RespondeeRef;
use crate::slot::ResponseSlot;

/// Where a response gets delivered: a local one-shot slot or the address of a
/// remote respondee.
pub enum Responder<S> {
    /// In-process delivery through a [`ResponseSlot`]
    Local(ResponseSlot<S>),
    /// Cross-node delivery through a [`RespondeeRef`]
    Remote(RespondeeRef<S>),
}

impl<S: Send + 'static> Responder<S> {
    /// Deliver the response. Returns `false` when the responder already
    /// settled.
    pub fn complete(&self, value: S) -> bool {
        match self {
            Responder::Local(slot) => slot.complete(value),
            Responder::Remote(respondee) => respondee.respond(value),
        }
    }

    /// Fail the responder.
    ///
    /// Failure kinds do not cross the wire: a remote responder is stopped
    /// instead, and the asker observes its deadline or
    /// [`Error::Shutdown`].
    pub fn fail(&self, error: Error) -> bool {
        match self {
            Responder::Local(slot) => slot.fail(error),
            Responder::Remote(respondee) => respondee.stop(),
        }
    }

    /// Whether a response is still awaited.
    pub fn is_pending(&self) -> bool {
        match self {
            Responder::Local(slot) => !slot.is_terminal(),
            Responder::Remote(respondee) => respondee.is_live(),
        }
    }
}

impl<S> Clone for Responder<S> {
    fn clone(&self) -> Self {
        match self {
            Responder::Local(slot) => Responder::Local(slot.clone()),
            Responder::Remote(respondee) => Responder::Remote(respondee.clone()),
        }
    }
}

/// A request plus its response handle.
pub struct Envelope<R, S> {
    /// The user request
    pub request: R,
    /// The handle the response is delivered through
    pub responder: Responder<S>,
}

impl<R, S> Envelope<R, S> {
    /// Wrap a request for in-process delivery.
    pub fn local(request: R, slot: ResponseSlot<S>) -> Self {
        Self {
            request,
            responder: Responder::Local(slot),
        }
    }

    /// Wrap a request for delivery through a respondee address.
    pub fn remote(request: R, respondee: RespondeeRef<S>) -> Self {
        Self {
            request,
            responder: Responder::Remote(respondee),
        }
    }
}
