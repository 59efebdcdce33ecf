//! Splicing an upstream sequence into a shared pipeline.
//!
//! The splice operator feeds every upstream element into a processor's sink
//! and yields the matching responses downstream, in upstream order, with a
//! bounded number of outstanding awaits. Dropping the spliced stream stops
//! listening but does not reach into the shared pipeline: elements already
//! offered complete normally.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::processor::{IntoableSink, OfferResult};
use crate::respondee::RespondeeFactory;
use crate::slot::ResponseFuture;

/// Extension trait attaching upstream sequences to shared pipelines.
pub trait SpliceExt: Stream {
    /// Route this stream's elements into the pipeline behind `sink` and yield
    /// the responses in order, with at most `parallelism` outstanding awaits.
    ///
    /// Each yielded item is the per-element outcome; failed elements
    /// (`Unavailable`, `Timeout`, ...) do not end the stream.
    fn splice_into<S>(self, sink: IntoableSink<Self::Item, S>, parallelism: usize) -> Spliced<S>
    where
        Self: Sized + Send + 'static,
        Self::Item: fmt::Debug + Send + 'static,
        S: Send + 'static,
    {
        spawn_driver(self, parallelism, move |element| {
            Outstanding::Waiting(sink.submit(element))
        })
    }

    /// Like [`splice_into`](SpliceExt::splice_into), but responses are
    /// delivered through respondees created by `factory`, so a pipeline on
    /// another node can resolve them. The response deadline is enforced by
    /// each respondee, not locally.
    fn splice_into_remote<S>(
        self,
        sink: IntoableSink<Self::Item, S>,
        factory: RespondeeFactory<S>,
        response_timeout: Duration,
        parallelism: usize,
    ) -> Spliced<S>
    where
        Self: Sized + Send + 'static,
        Self::Item: fmt::Debug + Send + 'static,
        S: Send + 'static,
    {
        spawn_driver(self, parallelism, move |element| {
            let tag = format!("{:?}", element);
            let (respondee, future) = factory.create(response_timeout, tag);
            match sink.offer(Envelope::remote(element, respondee)) {
                OfferResult::Enqueued => Outstanding::Waiting(future),
                OfferResult::Dropped(envelope) => {
                    envelope.responder.fail(Error::Shutdown);
                    Outstanding::Ready(Err(Error::unavailable(sink.name())))
                }
                OfferResult::Closed(envelope) => {
                    envelope.responder.fail(Error::Shutdown);
                    Outstanding::Ready(Err(Error::Shutdown))
                }
                OfferResult::Failure(envelope) => {
                    envelope.responder.fail(Error::Shutdown);
                    Outstanding::Ready(Err(Error::unexpected_offer(
                        "input queue dropped without shutdown",
                    )))
                }
            }
        })
    }
}

impl<T> SpliceExt for T where T: Stream {}

/// A response either already known (the offer failed locally) or pending.
enum Outstanding<S> {
    Ready(Result<S>),
    Waiting(ResponseFuture<S>),
}

impl<S> Outstanding<S> {
    async fn resolve(self) -> Result<S> {
        match self {
            Outstanding::Ready(result) => result,
            Outstanding::Waiting(future) => future.await,
        }
    }
}

fn spawn_driver<A, S>(
    upstream: impl Stream<Item = A> + Send + 'static,
    parallelism: usize,
    mut attach: impl FnMut(A) -> Outstanding<S> + Send + 'static,
) -> Spliced<S>
where
    A: Send + 'static,
    S: Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(parallelism.max(1));
    tokio::spawn(async move {
        if parallelism == 0 {
            let _ = out_tx
                .send(Err(Error::invalid_argument("parallelism must be at least 1")))
                .await;
            return;
        }
        let mut outstanding: VecDeque<Outstanding<S>> = VecDeque::with_capacity(parallelism);
        tokio::pin!(upstream);
        while let Some(element) = upstream.next().await {
            if outstanding.len() == parallelism {
                if let Some(next) = outstanding.pop_front() {
                    if out_tx.send(next.resolve().await).await.is_err() {
                        // Downstream stopped listening; in-flight elements
                        // stay with the pipeline.
                        return;
                    }
                }
            }
            outstanding.push_back(attach(element));
        }
        for next in outstanding {
            if out_tx.send(next.resolve().await).await.is_err() {
                return;
            }
        }
    });
    Spliced {
        inner: ReceiverStream::new(out_rx),
    }
}

/// The downstream of a splice: one `Result` per upstream element, in order.
pub struct Spliced<S> {
    inner: ReceiverStream<Result<S>>,
}

impl<S> Stream for Spliced<S> {
    type Item = Result<S>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
