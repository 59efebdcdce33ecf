//! # Request/Response Bridging onto Streaming Pipelines
//!
//! This crate adapts a request/response programming model onto a long-running
//! streaming pipeline shared by all callers. A caller submits a request; the
//! request flows through the pipeline; when the pipeline emits the matching
//! result, the caller's pending response resolves.
//!
//! ## Core Concepts
//!
//! - **Process**: the user-supplied transformation from request to response
//! - **IntoableProcessor**: a running pipeline instance with a bounded input
//!   queue, per-request deadlines, and drop-newest backpressure
//! - **ResponseSlot / Respondee**: one-shot response cells, local and
//!   addressable
//! - **Splice**: routes a whole upstream sequence into a shared pipeline and
//!   yields the responses downstream in order
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use streamgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> streamgate::Result<()> {
//!     let config = ProcessorConfig::new("length", 16, Duration::from_secs(1));
//!     let processor = IntoableProcessor::spawn(MapProcess::new(|s: String| s.len()), config)?;
//!
//!     let len = processor.submit("abc".to_string()).await?;
//!     assert_eq!(len, 3);
//!
//!     processor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! A request that cannot be admitted (queue full) fails fast with
//! `Unavailable`; one the pipeline never answers fails with `Timeout`; a
//! failing element is dropped and the pipeline keeps serving everyone else.

pub mod envelope;
pub mod error;
pub mod pairing;
pub mod process;
pub mod processor;
pub mod respondee;
pub mod shutdown;
pub mod slot;
pub mod splice;

// Re-export commonly used items
pub mod prelude {
    pub use crate::envelope::{Envelope, Responder};
    pub use crate::error::{Error, Result};
    pub use crate::pairing::{Correlation, ProcessorStats};
    pub use crate::process::{process_fn, MapProcess, Process};
    pub use crate::processor::{
        IntoableProcessor, IntoableSink, OfferResult, ProcessorConfig, ProcessorHandle,
    };
    pub use crate::respondee::{RespondeeFactory, RespondeeRef};
    pub use crate::shutdown::{
        ShutdownCoordinator, PHASE_SERVICE_REQUESTS_DONE, PHASE_SERVICE_STOP,
    };
    pub use crate::slot::{ResponseFuture, ResponseSlot};
    pub use crate::splice::{Spliced, SpliceExt};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
