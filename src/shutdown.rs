//! Coordinated shutdown across components, in ordered named phases.
//!
//! Processors register a drain task in the `service-requests-done` phase:
//! the phase closes their input queues and waits for `when_done`, so later
//! phases (unbinding listeners, closing stores) only run after every admitted
//! request reached a terminal state.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::processor::ProcessorHandle;

/// Phase in which request intake stops and admitted requests drain.
pub const PHASE_SERVICE_REQUESTS_DONE: &str = "service-requests-done";
/// Phase for stopping what the drained services still hold onto.
pub const PHASE_SERVICE_STOP: &str = "service-stop";

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Registration {
    name: String,
    task: Box<dyn FnOnce() -> BoxedTask + Send>,
}

struct Phase {
    name: String,
    registrations: Vec<Registration>,
}

/// Runs registered shutdown tasks phase by phase.
///
/// Tasks within a phase run concurrently; a phase completes when all of its
/// tasks finish or the phase timeout elapses, whichever comes first. Phases
/// run strictly in order.
pub struct ShutdownCoordinator {
    phases: Vec<Phase>,
    phase_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the default phases
    /// (`service-requests-done`, then `service-stop`).
    pub fn new(phase_timeout: Duration) -> Self {
        Self::with_phases(
            &[PHASE_SERVICE_REQUESTS_DONE, PHASE_SERVICE_STOP],
            phase_timeout,
        )
    }

    /// Create a coordinator with custom phases, run in the given order.
    pub fn with_phases(phases: &[&str], phase_timeout: Duration) -> Self {
        Self {
            phases: phases
                .iter()
                .map(|name| Phase {
                    name: (*name).to_string(),
                    registrations: Vec::new(),
                })
                .collect(),
            phase_timeout,
        }
    }

    /// Register a task to run in the given phase.
    ///
    /// Fails with `InvalidArgument` when the phase does not exist.
    pub fn register<F, Fut>(&mut self, phase: &str, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let slot = self
            .phases
            .iter_mut()
            .find(|candidate| candidate.name == phase)
            .ok_or_else(|| Error::invalid_argument(format!("unknown shutdown phase '{}'", phase)))?;
        slot.registrations.push(Registration {
            name: name.into(),
            task: Box::new(move || Box::pin(task())),
        });
        Ok(())
    }

    /// Register a processor drain in the `service-requests-done` phase.
    pub fn register_drain(&mut self, handle: ProcessorHandle) -> Result<()> {
        let name = handle.name().to_string();
        self.register(PHASE_SERVICE_REQUESTS_DONE, name, move || async move {
            handle.shutdown().await;
        })
    }

    /// Run all phases in order.
    pub async fn run(self) {
        for phase in self.phases {
            if phase.registrations.is_empty() {
                continue;
            }
            info!(
                phase = %phase.name,
                tasks = phase.registrations.len(),
                "running shutdown phase"
            );
            let phase_name = phase.name;
            let timeout = self.phase_timeout;
            let tasks = phase.registrations.into_iter().map(|registration| {
                let task_name = registration.name;
                let phase_name = phase_name.clone();
                async move {
                    if tokio::time::timeout(timeout, (registration.task)())
                        .await
                        .is_err()
                    {
                        warn!(
                            phase = %phase_name,
                            task = %task_name,
                            "shutdown task timed out"
                        );
                    }
                }
            });
            join_all(tasks).await;
        }
        info!("shutdown complete");
    }
}
