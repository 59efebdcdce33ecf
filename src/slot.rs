//! One-shot response cells with a bound deadline.
//!
//! A [`ResponseSlot`] is the delivery half of a pending request: the pipeline
//! completes it with a value, fails it with a typed error, or the deadline
//! timer expires it. Whichever happens first wins; the cell never transitions
//! twice. The submitter observes the outcome through the paired
//! [`ResponseFuture`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::sleep;

use crate::error::{Error, Result};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FAILED: u8 = 2;

/// The write end of a one-shot response cell.
///
/// States: pending, then exactly one of completed or failed. The terminal
/// transition is serialized by a compare-and-set on a single state word, so
/// [`complete`](ResponseSlot::complete), [`fail`](ResponseSlot::fail) and the
/// deadline timer may race freely.
pub struct ResponseSlot<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Result<S>>>>,
    timer: Mutex<Option<AbortHandle>>,
    tag: String,
}

impl<S: Send + 'static> ResponseSlot<S> {
    /// Create a pending slot whose deadline timer fires after `timeout`.
    ///
    /// The `tag` is opaque diagnostic text included in the timeout failure.
    /// Returns the write end and the future the submitter awaits. Must be
    /// called from within a Tokio runtime, which owns the timer.
    pub fn expiring(timeout: Duration, tag: impl Into<String>) -> (Self, ResponseFuture<S>) {
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(sender)),
            timer: Mutex::new(None),
            tag: tag.into(),
        });

        let timer_shared = Arc::clone(&shared);
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            let tag = timer_shared.tag.clone();
            timer_shared.transition(FAILED, Err(Error::timeout(tag)));
        });
        *shared.timer.lock().unwrap() = Some(timer.abort_handle());

        (Self { shared }, ResponseFuture { receiver })
    }

    /// Transition pending -> completed.
    ///
    /// Returns `false` when the slot already reached a terminal state.
    pub fn complete(&self, value: S) -> bool {
        self.shared.transition(COMPLETED, Ok(value))
    }

    /// Transition pending -> failed.
    ///
    /// Returns `false` when the slot already reached a terminal state.
    pub fn fail(&self, error: Error) -> bool {
        self.shared.transition(FAILED, Err(error))
    }

    /// Whether the slot has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) != PENDING
    }

    /// The diagnostic tag captured at creation.
    pub fn tag(&self) -> &str {
        &self.shared.tag
    }
}

impl<S> Clone for ResponseSlot<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Shared<S> {
    /// Claim the terminal transition. The winner delivers the result and
    /// cancels the deadline timer; losers observe `false`.
    fn transition(&self, next: u8, result: Result<S>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(result);
        }
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.abort();
        }
        true
    }
}

/// The read end of a response cell.
///
/// Resolves with the value or typed failure the slot settled with. A write
/// end dropped before settling resolves to [`Error::Shutdown`].
pub struct ResponseFuture<S> {
    receiver: oneshot::Receiver<Result<S>>,
}

impl<S> ResponseFuture<S> {
    pub(crate) fn from_receiver(receiver: oneshot::Receiver<Result<S>>) -> Self {
        Self { receiver }
    }
}

impl<S> Future for ResponseFuture<S> {
    type Output = Result<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_once() {
        let (slot, future) = ResponseSlot::expiring(Duration::from_secs(60), "one");
        assert!(!slot.is_terminal());
        assert!(slot.complete(1));
        assert!(!slot.complete(2));
        assert!(!slot.fail(Error::Shutdown));
        assert!(slot.is_terminal());
        assert_eq!(future.await, Ok(1));
    }

    #[tokio::test]
    async fn fail_beats_complete() {
        let (slot, future) = ResponseSlot::<i32>::expiring(Duration::from_secs(60), "two");
        assert!(slot.fail(Error::Shutdown));
        assert!(!slot.complete(7));
        assert_eq!(future.await, Err(Error::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_pending_slot() {
        let (slot, future) = ResponseSlot::<u32>::expiring(Duration::from_millis(100), "late");
        let result = future.await;
        assert_eq!(result, Err(Error::timeout("late")));
        assert!(slot.is_terminal());
        assert!(!slot.complete(3));
    }

    #[tokio::test(start_paused = true)]
    async fn early_completion_cancels_timer() {
        let (slot, future) = ResponseSlot::expiring(Duration::from_millis(100), "fast");
        assert!(slot.complete("done"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(future.await, Ok("done"));
    }

    #[tokio::test]
    async fn dropped_writer_resolves_shutdown() {
        let (sender, receiver) = oneshot::channel::<Result<u32>>();
        drop(sender);
        let future = ResponseFuture::from_receiver(receiver);
        assert_eq!(future.await, Err(Error::Shutdown));
    }
}
