//! The shared pipeline instance callers submit requests into.
//!
//! An [`IntoableProcessor`] owns a bounded input queue and two cooperating
//! tasks: intake runs the user process over admitted requests, delivery pairs
//! emitted responses with pending responders. Backpressure is drop-newest at
//! the queue; element failures are absorbed by resume supervision; shutdown
//! closes the queue, drains what was admitted, and fails the rest.

use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::pairing::{
    log_element_failure, run_delivery, Admitted, Correlation, Delivery, Pairing, ProcessorStats,
    Stats,
};
use crate::process::Process;
use crate::slot::{ResponseFuture, ResponseSlot};

/// Configuration for a processor instance
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Diagnostic identifier; appears in failure payloads and logs
    pub name: String,
    /// Capacity of the bounded input queue
    pub buffer_size: usize,
    /// Per-request deadline applied to each slot at admission
    pub timeout: Duration,
    /// Bound on elements admitted but not yet paired; defaults to `buffer_size`
    pub max_in_flight: Option<usize>,
}

impl ProcessorConfig {
    /// Create a configuration from the required entries.
    pub fn new(name: impl Into<String>, buffer_size: usize, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            buffer_size,
            timeout,
            max_in_flight: None,
        }
    }

    /// Set the in-flight bound independently of the queue capacity
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    fn validate(&self) -> Result<usize> {
        if self.buffer_size == 0 {
            return Err(Error::invalid_argument("buffer_size must be at least 1"));
        }
        match self.max_in_flight {
            Some(0) => Err(Error::invalid_argument("max_in_flight must be at least 1")),
            Some(max) => Ok(max),
            None => Ok(self.buffer_size),
        }
    }
}

/// Outcome of offering an envelope to a processor's input queue.
///
/// Non-enqueued outcomes hand the envelope back so the caller decides how to
/// settle its responder.
pub enum OfferResult<R, S> {
    /// The envelope was admitted
    Enqueued,
    /// The queue was full; drop-newest refused the envelope
    Dropped(Envelope<R, S>),
    /// The processor has shut down
    Closed(Envelope<R, S>),
    /// The queue vanished without a shutdown; a defensive guard
    Failure(Envelope<R, S>),
}

/// The write end of a processor's bounded input queue.
///
/// Clonable; used directly by the splice operator and indirectly by
/// [`submit`](IntoableSink::submit).
pub struct IntoableSink<R, S> {
    tx: mpsc::Sender<Envelope<R, S>>,
    token: CancellationToken,
    name: Arc<str>,
    timeout: Duration,
}

impl<R, S> Clone for IntoableSink<R, S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
            name: Arc::clone(&self.name),
            timeout: self.timeout,
        }
    }
}

impl<R, S> IntoableSink<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    /// Offer an envelope to the input queue without waiting.
    pub fn offer(&self, envelope: Envelope<R, S>) -> OfferResult<R, S> {
        if self.token.is_cancelled() {
            return OfferResult::Closed(envelope);
        }
        match self.tx.try_send(envelope) {
            Ok(()) => OfferResult::Enqueued,
            Err(mpsc::error::TrySendError::Full(envelope)) => OfferResult::Dropped(envelope),
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                if self.token.is_cancelled() {
                    OfferResult::Closed(envelope)
                } else {
                    OfferResult::Failure(envelope)
                }
            }
        }
    }

    /// Submit a request and receive the future of its response.
    ///
    /// The future resolves with the pipeline's response, or with
    /// `Unavailable` (queue full), `Timeout` (deadline elapsed), `Shutdown`,
    /// or `NotCorrelated` under checked pairing.
    pub fn submit(&self, request: R) -> ResponseFuture<S>
    where
        R: fmt::Debug,
    {
        let tag = format!("{:?}", request);
        let (slot, future) = ResponseSlot::expiring(self.timeout, tag);
        match self.offer(Envelope::local(request, slot)) {
            OfferResult::Enqueued => {}
            OfferResult::Dropped(envelope) => {
                envelope.responder.fail(Error::unavailable(self.name.as_ref()));
            }
            OfferResult::Closed(envelope) => {
                envelope.responder.fail(Error::Shutdown);
            }
            OfferResult::Failure(envelope) => {
                envelope
                    .responder
                    .fail(Error::unexpected_offer("input queue dropped without shutdown"));
            }
        }
        future
    }

    /// The processor name this sink feeds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-request deadline applied at admission.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A clonable handle onto a running processor's lifecycle.
pub struct ProcessorHandle {
    name: Arc<str>,
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

impl Clone for ProcessorHandle {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            token: self.token.clone(),
            done: self.done.clone(),
        }
    }
}

impl ProcessorHandle {
    /// Close the input queue and wait for admitted requests to drain.
    ///
    /// Idempotent: every call observes the same completion signal.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.when_done().await;
    }

    /// Resolve once the pipeline has fully drained after shutdown.
    pub async fn when_done(&self) {
        let mut done = self.done.clone();
        // An error means the delivery task is gone, which is equally done.
        let _ = done.wait_for(|flag| *flag).await;
    }

    /// The processor's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A long-running in-process pipeline serving request/response callers.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use streamgate::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> streamgate::Result<()> {
///     let config = ProcessorConfig::new("length", 16, Duration::from_secs(1));
///     let processor = IntoableProcessor::spawn(MapProcess::new(|s: String| s.len()), config)?;
///
///     let len = processor.submit("abc".to_string()).await?;
///     assert_eq!(len, 3);
///
///     processor.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct IntoableProcessor<R, S> {
    sink: IntoableSink<R, S>,
    handle: ProcessorHandle,
    stats: Arc<Stats>,
    intake: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

impl<R, S> IntoableProcessor<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    /// Spawn a processor whose process is order-preserving and one-to-one.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `InvalidArgument` when `buffer_size` or `max_in_flight` is zero.
    pub fn spawn<P>(process: P, config: ProcessorConfig) -> Result<Self>
    where
        P: Process<Request = R, Response = S> + 'static,
    {
        Self::spawn_inner::<P, ()>(
            process,
            config,
            Pairing::Positional,
            AdmitFns {
                key_of: None,
                keep: None,
            },
        )
    }

    /// Spawn a processor that verifies each positionally paired response
    /// against its request, failing mismatches with `NotCorrelated`.
    pub fn spawn_checked<P, F>(process: P, config: ProcessorConfig, correlated: F) -> Result<Self>
    where
        P: Process<Request = R, Response = S> + 'static,
        F: Fn(&R, &S) -> bool + Send + Sync + 'static,
        R: Clone + fmt::Debug,
        S: fmt::Debug,
    {
        let check = Arc::new(move |request: &R, response: &S| {
            if correlated(request, response) {
                None
            } else {
                Some(Error::not_correlated(
                    format!("{:?}", request),
                    format!("{:?}", response),
                ))
            }
        });
        Self::spawn_inner::<P, ()>(
            process,
            config,
            Pairing::Checked(check),
            AdmitFns {
                key_of: None,
                keep: Some(Arc::new(|request: &R| request.clone())),
            },
        )
    }

    /// Spawn a processor whose process may reorder or drop elements;
    /// responses are matched to callers through the correlation keys.
    pub fn spawn_correlated<P, K>(
        process: P,
        config: ProcessorConfig,
        correlation: Correlation<R, S, K>,
    ) -> Result<Self>
    where
        P: Process<Request = R, Response = S> + 'static,
        K: Hash + Eq + Send + 'static,
    {
        let key_of = Arc::clone(&correlation.key_of_request);
        Self::spawn_inner::<P, K>(
            process,
            config,
            Pairing::Correlated(correlation),
            AdmitFns {
                key_of: Some(key_of),
                keep: None,
            },
        )
    }

    fn spawn_inner<P, K>(
        process: P,
        config: ProcessorConfig,
        pairing: Pairing<R, S, K>,
        admit: AdmitFns<R, K>,
    ) -> Result<Self>
    where
        P: Process<Request = R, Response = S> + 'static,
        K: Hash + Eq + Send + 'static,
    {
        let max_in_flight = config.validate()?;
        let name: Arc<str> = config.name.into();
        let token = CancellationToken::new();
        let stats = Arc::new(Stats::default());

        let (input_tx, input_rx) = mpsc::channel(config.buffer_size);
        let (admitted_tx, admitted_rx) = mpsc::channel(max_in_flight);
        let (delivery_tx, delivery_rx) = mpsc::channel(max_in_flight);
        let (done_tx, done_rx) = watch::channel(false);

        let intake = tokio::spawn(run_intake(
            process,
            input_rx,
            admitted_tx,
            delivery_tx,
            admit,
            token.clone(),
            Arc::clone(&name),
            Arc::clone(&stats),
        ));
        let delivery = tokio::spawn(run_delivery(
            admitted_rx,
            delivery_rx,
            pairing,
            Arc::clone(&name),
            Arc::clone(&stats),
            done_tx,
        ));

        info!(name = %name, buffer_size = config.buffer_size, max_in_flight, "processor started");

        Ok(Self {
            sink: IntoableSink {
                tx: input_tx,
                token: token.clone(),
                name: Arc::clone(&name),
                timeout: config.timeout,
            },
            handle: ProcessorHandle {
                name,
                token,
                done: done_rx,
            },
            stats,
            intake,
            delivery,
        })
    }

    /// Submit a request and receive the future of its response.
    pub fn submit(&self, request: R) -> ResponseFuture<S>
    where
        R: fmt::Debug,
    {
        self.sink.submit(request)
    }

    /// A write end of the input queue, for splicing upstream sequences in.
    pub fn sink(&self) -> IntoableSink<R, S> {
        self.sink.clone()
    }

    /// A clonable lifecycle handle, e.g. for shutdown coordination.
    pub fn handle(&self) -> ProcessorHandle {
        self.handle.clone()
    }

    /// Close the input queue and wait for admitted requests to drain.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
    }

    /// Resolve once the pipeline has fully drained after shutdown.
    pub async fn when_done(&self) {
        self.handle.when_done().await;
    }

    /// Kill the pipeline without draining.
    ///
    /// Requests still in flight are lost; their responders observe `Shutdown`
    /// or their deadline.
    pub fn abort(&self) {
        self.handle.token.cancel();
        self.intake.abort();
        self.delivery.abort();
    }

    /// A snapshot of the processor's diagnostic counters.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.snapshot()
    }

    /// The processor's diagnostic name.
    pub fn name(&self) -> &str {
        self.handle.name()
    }
}

/// Admission-time hooks: the correlation key extractor and, under checked
/// pairing, the request copier.
struct AdmitFns<R, K> {
    key_of: Option<Arc<dyn Fn(&R) -> K + Send + Sync>>,
    keep: Option<Arc<dyn Fn(&R) -> R + Send + Sync>>,
}

/// The intake side: admit envelopes until shutdown, drain the queue, flush
/// the process, then hang up so delivery can settle the rest.
async fn run_intake<P, R, S, K>(
    mut process: P,
    mut input: mpsc::Receiver<Envelope<R, S>>,
    admitted_tx: mpsc::Sender<Admitted<R, S, K>>,
    delivery_tx: mpsc::Sender<Delivery<S>>,
    admit: AdmitFns<R, K>,
    token: CancellationToken,
    name: Arc<str>,
    stats: Arc<Stats>,
) where
    P: Process<Request = R, Response = S>,
    R: Send + 'static,
    S: Send + 'static,
    K: Send + 'static,
{
    loop {
        let envelope = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            envelope = input.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if !handle_element(
            &mut process,
            envelope,
            &admitted_tx,
            &delivery_tx,
            &admit,
            &name,
            &stats,
        )
        .await
        {
            return;
        }
    }

    // No further admissions; whatever was already accepted still drains.
    input.close();
    while let Some(envelope) = input.recv().await {
        if !handle_element(
            &mut process,
            envelope,
            &admitted_tx,
            &delivery_tx,
            &admit,
            &name,
            &stats,
        )
        .await
        {
            return;
        }
    }

    match AssertUnwindSafe(process.finish()).catch_unwind().await {
        Ok(Ok(responses)) => {
            for response in responses {
                if delivery_tx.send(Delivery::Item(response)).await.is_err() {
                    return;
                }
            }
        }
        Ok(Err(error)) => log_element_failure(&name, Some(&error)),
        Err(_) => log_element_failure(&name, None),
    }
    debug!(name = %name, "intake drained");
}

/// Run one element through the process under resume supervision.
///
/// Returns `false` when the delivery side is gone and intake should stop.
async fn handle_element<P, R, S, K>(
    process: &mut P,
    envelope: Envelope<R, S>,
    admitted_tx: &mpsc::Sender<Admitted<R, S, K>>,
    delivery_tx: &mpsc::Sender<Delivery<S>>,
    admit: &AdmitFns<R, K>,
    name: &Arc<str>,
    stats: &Arc<Stats>,
) -> bool
where
    P: Process<Request = R, Response = S>,
    R: Send + 'static,
    S: Send + 'static,
    K: Send + 'static,
{
    let Envelope { request, responder } = envelope;
    let key = admit.key_of.as_ref().map(|key_of| key_of(&request));
    let kept = admit.keep.as_ref().map(|keep| keep(&request));
    let admitted = Admitted {
        request: kept,
        key,
        responder,
    };
    // Register before processing so delivery always sees the admission first.
    if admitted_tx.send(admitted).await.is_err() {
        return false;
    }

    match AssertUnwindSafe(process.apply(request)).catch_unwind().await {
        Ok(Ok(responses)) => {
            for response in responses {
                if delivery_tx.send(Delivery::Item(response)).await.is_err() {
                    return false;
                }
            }
        }
        Ok(Err(error)) => {
            stats.dropped_elements.fetch_add(1, Ordering::Relaxed);
            log_element_failure(name, Some(&error));
            if delivery_tx.send(Delivery::Dropped).await.is_err() {
                return false;
            }
        }
        Err(_) => {
            stats.dropped_elements.fetch_add(1, Ordering::Relaxed);
            log_element_failure(name, None);
            if delivery_tx.send(Delivery::Dropped).await.is_err() {
                return false;
            }
        }
    }
    true
}
