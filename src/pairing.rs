//! Pairing of pipeline outputs with pending responders.
//!
//! Three policies cover the ways a process relates outputs to inputs:
//!
//! - **Positional**: the process is order-preserving and one-to-one. Each
//!   emitted response completes the oldest pending responder; a dropped
//!   element abandons its responder so pairing stays aligned.
//! - **Checked**: positional, plus a predicate over `(request, response)`.
//!   A mismatch fails the responder with `NotCorrelated`.
//! - **Correlated**: the process may reorder or drop elements. Responses are
//!   matched to responders through user-supplied keys; a sweeper reclaims
//!   table entries whose responders already settled.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::envelope::Responder;
use crate::error::Error;

/// Key-based matching of responses to pending requests, for processes that do
/// not preserve order.
pub struct Correlation<R, S, K> {
    pub(crate) key_of_request: Arc<dyn Fn(&R) -> K + Send + Sync>,
    pub(crate) key_of_response: Arc<dyn Fn(&S) -> K + Send + Sync>,
    pub(crate) sweep_interval: Duration,
}

impl<R, S, K> Correlation<R, S, K> {
    /// Create a correlation from the two key functions and the interval at
    /// which settled entries are swept from the table.
    pub fn new(
        key_of_request: impl Fn(&R) -> K + Send + Sync + 'static,
        key_of_response: impl Fn(&S) -> K + Send + Sync + 'static,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            key_of_request: Arc::new(key_of_request),
            key_of_response: Arc::new(key_of_response),
            sweep_interval,
        }
    }
}

impl<R, S, K> Clone for Correlation<R, S, K> {
    fn clone(&self) -> Self {
        Self {
            key_of_request: Arc::clone(&self.key_of_request),
            key_of_response: Arc::clone(&self.key_of_response),
            sweep_interval: self.sweep_interval,
        }
    }
}

/// How the delivery side pairs responses with responders.
pub(crate) enum Pairing<R, S, K> {
    Positional,
    /// The closure returns the prebuilt mismatch error, or `None` on a match.
    Checked(Arc<dyn Fn(&R, &S) -> Option<Error> + Send + Sync>),
    Correlated(Correlation<R, S, K>),
}

/// An admitted request as the delivery side sees it: the responder, plus the
/// request copy (checked pairing) or correlation key computed at admission.
pub(crate) struct Admitted<R, S, K> {
    pub request: Option<R>,
    pub key: Option<K>,
    pub responder: Responder<S>,
}

/// What the intake side forwards for each processed element: a response, or a
/// sentinel marking an element that was dropped by resume supervision.
pub(crate) enum Delivery<S> {
    Item(S),
    Dropped,
}

/// Diagnostic counters shared between the pipeline tasks and the handle.
#[derive(Default)]
pub(crate) struct Stats {
    pub dropped_elements: AtomicU64,
    pub unmatched_responses: AtomicU64,
}

/// A point-in-time snapshot of a processor's diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Elements dropped by resume supervision
    pub dropped_elements: u64,
    /// Responses that matched no pending correlation entry
    pub unmatched_responses: u64,
}

impl Stats {
    pub(crate) fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            dropped_elements: self.dropped_elements.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
        }
    }
}

/// Run the delivery side of a pipeline until the intake side hangs up, then
/// fail whatever is still pending with `Shutdown` and signal completion.
pub(crate) async fn run_delivery<R, S, K>(
    admitted_rx: mpsc::Receiver<Admitted<R, S, K>>,
    delivery_rx: mpsc::Receiver<Delivery<S>>,
    pairing: Pairing<R, S, K>,
    name: Arc<str>,
    stats: Arc<Stats>,
    done: watch::Sender<bool>,
) where
    R: Send + 'static,
    S: Send + 'static,
    K: Hash + Eq + Send + 'static,
{
    match pairing {
        Pairing::Positional => {
            run_positional(admitted_rx, delivery_rx, None, name, stats).await;
        }
        Pairing::Checked(check) => {
            run_positional(admitted_rx, delivery_rx, Some(check), name, stats).await;
        }
        Pairing::Correlated(correlation) => {
            run_correlated(admitted_rx, delivery_rx, correlation, name, stats).await;
        }
    }
    let _ = done.send(true);
}

/// Positional delivery: the admission channel is the in-order buffer of
/// pending responders; each delivery pops exactly one.
async fn run_positional<R, S, K>(
    mut admitted_rx: mpsc::Receiver<Admitted<R, S, K>>,
    mut delivery_rx: mpsc::Receiver<Delivery<S>>,
    check: Option<Arc<dyn Fn(&R, &S) -> Option<Error> + Send + Sync>>,
    name: Arc<str>,
    stats: Arc<Stats>,
) where
    S: Send + 'static,
    K: Hash + Eq,
{
    while let Some(delivery) = delivery_rx.recv().await {
        // The intake side registers every element before forwarding anything
        // for it, so a matching admission is always ahead of its delivery.
        let admitted = match admitted_rx.recv().await {
            Some(admitted) => admitted,
            None => break,
        };
        match delivery {
            Delivery::Item(response) => {
                if let (Some(check), Some(request)) = (&check, &admitted.request) {
                    if let Some(mismatch) = check(request, &response) {
                        stats.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                        if !admitted.responder.fail(mismatch) {
                            debug!(name = %name, "mismatched response arrived after the responder settled");
                        }
                        continue;
                    }
                }
                if !admitted.responder.complete(response) {
                    debug!(name = %name, "response arrived after the responder settled");
                }
            }
            Delivery::Dropped => {
                // Element lost to resume supervision; its responder expires
                // on its own deadline.
            }
        }
    }
    fail_pending(admitted_rx, None::<HashMap<K, Responder<S>>>).await;
}

/// Correlated delivery: responders live in a key table; responses complete
/// whichever entry their key selects, and a sweeper reclaims settled entries.
async fn run_correlated<R, S, K>(
    mut admitted_rx: mpsc::Receiver<Admitted<R, S, K>>,
    mut delivery_rx: mpsc::Receiver<Delivery<S>>,
    correlation: Correlation<R, S, K>,
    name: Arc<str>,
    stats: Arc<Stats>,
) where
    R: Send + 'static,
    S: Send + 'static,
    K: Hash + Eq + Send + 'static,
{
    let mut table: HashMap<K, Responder<S>> = HashMap::new();
    let mut sweep = tokio::time::interval(correlation.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut admissions_open = true;

    loop {
        // Admissions drain first: an element is always registered before any
        // of its responses are forwarded, so consuming pending admissions
        // ahead of responses keeps lookups from racing their own inserts.
        tokio::select! {
            biased;
            admitted = admitted_rx.recv(), if admissions_open => match admitted {
                Some(admitted) => insert_admission(&mut table, admitted, &name),
                None => admissions_open = false,
            },
            delivery = delivery_rx.recv() => match delivery {
                Some(Delivery::Item(response)) => {
                    let key = (correlation.key_of_response)(&response);
                    match table.get(&key) {
                        Some(responder) => {
                            if !responder.complete(response) {
                                debug!(name = %name, "response arrived after the responder settled");
                            }
                        }
                        None => {
                            stats.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                            debug!(name = %name, "response matched no pending entry");
                        }
                    }
                }
                Some(Delivery::Dropped) => {}
                None => break,
            },
            _ = sweep.tick() => {
                table.retain(|_, responder| responder.is_pending());
            }
        }
    }

    fail_pending(admitted_rx, Some(table)).await;
}

fn insert_admission<R, S, K>(
    table: &mut HashMap<K, Responder<S>>,
    admitted: Admitted<R, S, K>,
    name: &Arc<str>,
) where
    K: Hash + Eq,
{
    match admitted.key {
        // Last write wins: a duplicate key re-targets the entry at the most
        // recent responder, and the displaced one expires on its deadline.
        Some(key) => {
            table.insert(key, admitted.responder);
        }
        None => warn!(name = %name, "admission without a correlation key"),
    }
}

/// Drain leftover admissions and fail every still-pending responder with
/// `Shutdown`.
async fn fail_pending<R, S, K>(
    mut admitted_rx: mpsc::Receiver<Admitted<R, S, K>>,
    table: Option<HashMap<K, Responder<S>>>,
) where
    S: Send + 'static,
    K: Hash + Eq,
{
    admitted_rx.close();
    let mut leftover: Vec<Responder<S>> = Vec::new();
    while let Some(admitted) = admitted_rx.recv().await {
        leftover.push(admitted.responder);
    }
    if let Some(table) = table {
        leftover.extend(table.into_values());
    }
    for responder in leftover {
        if responder.is_pending() {
            responder.fail(Error::Shutdown);
        }
    }
}

/// Log an element failure at the standard level with the processor name.
pub(crate) fn log_element_failure(name: &Arc<str>, error: Option<&Error>) {
    match error {
        Some(error) => {
            error!(name = %name, error = %error, "element processing failed; resuming")
        }
        None => error!(name = %name, "element processing panicked; resuming"),
    }
}
