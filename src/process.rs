//! The user-supplied transformation a processor runs end-to-end.
//!
//! A process consumes requests and emits responses. Returning an empty Vec
//! means the request was absorbed for now (batching, throttling); `finish`
//! lets a process flush whatever it buffered when the pipeline drains.
//!
//! A process that returns `Err` (or panics) for an element does not
//! terminate the pipeline: the element is dropped and its caller observes a
//! timeout. See the resume supervision notes on
//! [`IntoableProcessor`](crate::processor::IntoableProcessor).

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::Result;

/// Transforms request elements into response elements.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use streamgate::error::Result;
/// use streamgate::process::Process;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Process for Shout {
///     type Request = String;
///     type Response = String;
///
///     async fn apply(&mut self, request: String) -> Result<Vec<String>> {
///         Ok(vec![request.to_uppercase()])
///     }
/// }
/// ```
#[async_trait]
pub trait Process: Send {
    /// The type of requests this process accepts
    type Request: Send + 'static;
    /// The type of responses this process emits
    type Response: Send + 'static;

    /// Process one request and emit zero or more responses.
    ///
    /// An order-preserving one-to-one process emits exactly one response per
    /// request; a batching or reordering process may defer emission to later
    /// calls or to [`finish`](Process::finish).
    async fn apply(&mut self, request: Self::Request) -> Result<Vec<Self::Response>>;

    /// Called when the input has drained, allowing final responses.
    async fn finish(&mut self) -> Result<Vec<Self::Response>> {
        Ok(vec![])
    }
}

/// A process that maps requests through a function, one response per request.
pub struct MapProcess<F, R, S> {
    f: F,
    _phantom: PhantomData<(R, S)>,
}

impl<F, R, S> MapProcess<F, R, S> {
    /// Create a new map process
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, R, S> Process for MapProcess<F, R, S>
where
    F: FnMut(R) -> S + Send + Sync + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    type Request = R;
    type Response = S;

    async fn apply(&mut self, request: Self::Request) -> Result<Vec<Self::Response>> {
        Ok(vec![(self.f)(request)])
    }
}

/// Helper function to create a process from an async function
pub fn process_fn<F, Fut, R, S>(f: F) -> FnProcess<F, Fut, R, S>
where
    F: FnMut(R) -> Fut + Send,
    Fut: Future<Output = Result<Vec<S>>> + Send,
    R: Send + 'static,
    S: Send + 'static,
{
    FnProcess {
        f,
        _phantom: PhantomData,
    }
}

/// A process created from an async function
pub struct FnProcess<F, Fut, R, S>
where
    F: FnMut(R) -> Fut + Send,
    Fut: Future<Output = Result<Vec<S>>> + Send,
    R: Send + 'static,
    S: Send + 'static,
{
    f: F,
    _phantom: PhantomData<(Fut, R, S)>,
}

#[async_trait]
impl<F, Fut, R, S> Process for FnProcess<F, Fut, R, S>
where
    F: FnMut(R) -> Fut + Send,
    Fut: Future<Output = Result<Vec<S>>> + Send,
    R: Send + 'static,
    S: Send + 'static,
{
    type Request = R;
    type Response = S;

    async fn apply(&mut self, request: Self::Request) -> Result<Vec<Self::Response>> {
        (self.f)(request).await
    }
}
